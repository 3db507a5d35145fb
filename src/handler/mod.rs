//! Synthetic value handlers
//!
//! A handler owns the authoritative value behind one synthetic file. The
//! overlay only ever talks to it through [`Handler`]: `get` renders the
//! current value, `set` validates and stores a replacement, and `load` reads
//! the handler's typed configuration once, before the mount starts serving.
//!
//! Handlers are called from concurrent FUSE requests and synchronize their
//! own state.

mod choice;
mod fixed;
mod integer;

pub use choice::ChoiceHandler;
pub use fixed::FixedHandler;
pub use integer::IntegerHandler;

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::str::FromStr;

/// Capability contract implemented by every handler kind
pub trait Handler: Send + Sync {
    /// Render the current value
    fn get(&self) -> Result<Vec<u8>>;

    /// Validate and store a replacement value
    fn set(&self, data: &[u8]) -> Result<()>;

    /// Load configuration; called exactly once, before mounting
    fn load(&mut self, config: &Mapping) -> Result<()>;
}

/// The closed set of handler kinds a configuration can name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Fixed,
    Integer,
    Choice,
}

impl HandlerKind {
    /// Create an unconfigured handler of this kind
    pub fn create(self) -> Box<dyn Handler> {
        match self {
            HandlerKind::Fixed => Box::<FixedHandler>::default(),
            HandlerKind::Integer => Box::<IntegerHandler>::default(),
            HandlerKind::Choice => Box::<ChoiceHandler>::default(),
        }
    }

    /// Create a handler and load its configuration
    pub fn load(self, config: &Mapping) -> Result<Box<dyn Handler>> {
        let mut handler = self.create();
        handler.load(config)?;
        Ok(handler)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Fixed => "fixed",
            HandlerKind::Integer => "integer",
            HandlerKind::Choice => "choice",
        }
    }
}

impl FromStr for HandlerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed" => Ok(HandlerKind::Fixed),
            "integer" => Ok(HandlerKind::Integer),
            "choice" => Ok(HandlerKind::Choice),
            other => Err(Error::Config(format!("unknown handler type: {}", other))),
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deserialize a handler's key/value configuration into its typed form
pub(crate) fn parse_config<T: DeserializeOwned>(config: &Mapping) -> Result<T> {
    serde_yaml::from_value(Value::Mapping(config.clone()))
        .map_err(|e| Error::InvalidConfig(format!("handler configuration: {}", e)))
}

/// Strip the surrounding whitespace a shell `echo` leaves on written values
pub(crate) fn trim_input(data: &[u8]) -> Result<&str> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::InvalidArgument("value is not valid UTF-8".to_string()))?;
    Ok(text.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n')))
}
