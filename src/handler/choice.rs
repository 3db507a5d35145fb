//! Selection-from-a-list handler, rendered the way sysfs shows schedulers

use super::{parse_config, trim_input, Handler};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_yaml::Mapping;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChoiceConfig {
    choices: Vec<String>,
    #[serde(default)]
    selected: Option<String>,
}

/// One selected entry out of a fixed list; reads as `a [b] c\n`
#[derive(Debug, Default)]
pub struct ChoiceHandler {
    choices: Vec<String>,
    selected: RwLock<usize>,
}

impl ChoiceHandler {
    /// The current choice, `None` before a successful load
    pub fn selected(&self) -> Option<&str> {
        self.choices.get(*self.selected.read()).map(String::as_str)
    }
}

impl Handler for ChoiceHandler {
    fn get(&self) -> Result<Vec<u8>> {
        let selected = *self.selected.read();
        let rendered: Vec<String> = self
            .choices
            .iter()
            .enumerate()
            .map(|(i, choice)| {
                if i == selected {
                    format!("[{}]", choice)
                } else {
                    choice.clone()
                }
            })
            .collect();

        Ok(format!("{}\n", rendered.join(" ")).into_bytes())
    }

    fn set(&self, data: &[u8]) -> Result<()> {
        let text = trim_input(data)?;
        let index = self
            .choices
            .iter()
            .position(|choice| choice == text)
            .ok_or_else(|| Error::InvalidArgument(format!("not a valid choice: {:?}", text)))?;

        *self.selected.write() = index;
        Ok(())
    }

    fn load(&mut self, config: &Mapping) -> Result<()> {
        let config: ChoiceConfig = parse_config(config)?;

        if config.choices.is_empty() {
            return Err(Error::InvalidConfig("choice list is empty".to_string()));
        }

        let selected = match config.selected {
            Some(selected) => config
                .choices
                .iter()
                .position(|choice| *choice == selected)
                .ok_or_else(|| {
                    Error::InvalidConfig(format!("selected {:?} is not one of the choices", selected))
                })?,
            None => 0,
        };

        self.choices = config.choices;
        *self.selected.get_mut() = selected;
        Ok(())
    }
}
