//! Bounded integer handler

use super::{parse_config, trim_input, Handler};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_yaml::Mapping;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IntegerConfig {
    #[serde(default = "min_default")]
    min: i64,
    #[serde(default = "max_default")]
    max: i64,
    #[serde(default)]
    current: i64,
}

fn min_default() -> i64 {
    i64::MIN
}

fn max_default() -> i64 {
    i64::MAX
}

/// Integer value constrained to `min..=max`, rendered as `"{value}\n"`
#[derive(Debug)]
pub struct IntegerHandler {
    min: i64,
    max: i64,
    current: RwLock<i64>,
}

impl Default for IntegerHandler {
    fn default() -> Self {
        Self {
            min: i64::MIN,
            max: i64::MAX,
            current: RwLock::new(0),
        }
    }
}

impl IntegerHandler {
    pub fn current(&self) -> i64 {
        *self.current.read()
    }
}

impl Handler for IntegerHandler {
    fn get(&self) -> Result<Vec<u8>> {
        Ok(format!("{}\n", self.current()).into_bytes())
    }

    fn set(&self, data: &[u8]) -> Result<()> {
        let text = trim_input(data)?;
        let value: i64 = text
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("not an integer: {:?}", text)))?;

        if value < self.min || value > self.max {
            return Err(Error::InvalidArgument(format!(
                "{} outside {}..={}",
                value, self.min, self.max
            )));
        }

        *self.current.write() = value;
        Ok(())
    }

    fn load(&mut self, config: &Mapping) -> Result<()> {
        let config: IntegerConfig = parse_config(config)?;

        if config.min > config.max {
            return Err(Error::InvalidConfig(format!(
                "integer min {} greater than max {}",
                config.min, config.max
            )));
        }
        if config.current < config.min || config.current > config.max {
            return Err(Error::InvalidConfig(format!(
                "integer current {} outside {}..={}",
                config.current, config.min, config.max
            )));
        }

        self.min = config.min;
        self.max = config.max;
        *self.current.get_mut() = config.current;
        Ok(())
    }
}
