//! fakerfs - synthetic control files over a real directory
//!
//! This library provides a FUSE filesystem that mirrors a backing directory
//! and overlays configured sysfs-style files on top of it. Reads and writes
//! of those files are served by handlers instead of the disk.

pub mod config;
pub mod daemon;
pub mod error;
pub mod fs;
pub mod handler;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::fs::OverlayFs;
    pub use crate::handler::{Handler, HandlerKind};
}
