//! Constant-content handler

use super::{parse_config, Handler};
use crate::error::{Error, Result};
use base64::Engine;
use serde::Deserialize;
use serde_yaml::Mapping;

/// Encoding of the configured `value`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    String,
    Base64,
    Hex,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FixedConfig {
    value: String,
    #[serde(default)]
    value_type: ValueType,
    #[serde(default = "allow_reads_default")]
    allow_reads: bool,
    #[serde(default)]
    allow_writes: bool,
}

fn allow_reads_default() -> bool {
    true
}

/// Serves a constant byte string. Accepted writes are discarded.
#[derive(Debug)]
pub struct FixedHandler {
    value: Vec<u8>,
    allow_reads: bool,
    allow_writes: bool,
}

impl Default for FixedHandler {
    fn default() -> Self {
        Self {
            value: Vec::new(),
            allow_reads: true,
            allow_writes: false,
        }
    }
}

impl Handler for FixedHandler {
    fn get(&self) -> Result<Vec<u8>> {
        if !self.allow_reads {
            return Err(Error::InvalidArgument("reads are disabled".to_string()));
        }
        Ok(self.value.clone())
    }

    fn set(&self, _data: &[u8]) -> Result<()> {
        if !self.allow_writes {
            return Err(Error::InvalidArgument("writes are disabled".to_string()));
        }
        Ok(())
    }

    fn load(&mut self, config: &Mapping) -> Result<()> {
        let config: FixedConfig = parse_config(config)?;

        self.value = match config.value_type {
            ValueType::String => config.value.into_bytes(),
            ValueType::Base64 => base64::engine::general_purpose::STANDARD
                .decode(config.value.as_bytes())
                .map_err(|e| Error::InvalidConfig(format!("bad base64 value: {}", e)))?,
            ValueType::Hex => hex::decode(&config.value)
                .map_err(|e| Error::InvalidConfig(format!("bad hex value: {}", e)))?,
        };
        self.allow_reads = config.allow_reads;
        self.allow_writes = config.allow_writes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(yaml: &str) -> Result<FixedHandler> {
        let mut handler = FixedHandler::default();
        handler.load(&serde_yaml::from_str(yaml).unwrap())?;
        Ok(handler)
    }

    #[test]
    fn test_string_value() {
        let handler = load("{value: \"hello\\n\"}").unwrap();
        assert_eq!(handler.get().unwrap(), b"hello\n");
        assert!(matches!(handler.set(b"x"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_encoded_values() {
        let handler = load("{value: aGk=, value_type: base64}").unwrap();
        assert_eq!(handler.get().unwrap(), b"hi");

        let handler = load("{value: 00ff10, value_type: hex}").unwrap();
        assert_eq!(handler.get().unwrap(), vec![0x00, 0xff, 0x10]);
    }

    #[test]
    fn test_bad_encodings_fail_load() {
        assert!(matches!(
            load("{value: zz, value_type: hex}"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            load("{value: \"!!\", value_type: base64}"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            load("{value: x, value_type: rot13}"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_access_flags() {
        let handler = load("{value: secret, allow_reads: false, allow_writes: true}").unwrap();
        assert!(matches!(handler.get(), Err(Error::InvalidArgument(_))));
        handler.set(b"anything").unwrap();
    }

    #[test]
    fn test_value_required() {
        assert!(matches!(load("{}"), Err(Error::InvalidConfig(_))));
    }
}
