//! Error types for fakerfs

use std::io;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the overlay, the handlers and startup
#[derive(Error, Debug)]
pub enum Error {
    /// Backing store or process I/O failure
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two configured entries claim the same node
    #[error("Path collision: {0}")]
    PathCollision(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Inode not found: {0}")]
    InodeNotFound(u64),

    #[error("Invalid file handle: {0}")]
    InvalidHandle(u64),

    #[error("Not a directory")]
    NotADirectory,

    #[error("Is a directory")]
    IsADirectory,

    #[error("Operation not permitted: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Extended attribute query on a synthetic node
    #[error("No such attribute")]
    NoData,

    #[error("Not a symbolic link")]
    NotALink,

    #[error("Operation not supported")]
    NotSupported,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map to the errno reported back to the kernel
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::Io(e) => match e.raw_os_error() {
                Some(errno) => errno,
                None if e.kind() == io::ErrorKind::Unsupported => libc::ENOTSUP,
                None => libc::EIO,
            },
            Error::PathNotFound(_) | Error::InodeNotFound(_) => libc::ENOENT,
            Error::InvalidHandle(_) => libc::EBADF,
            Error::NotADirectory => libc::ENOTDIR,
            Error::IsADirectory => libc::EISDIR,
            Error::PermissionDenied(_) => libc::EPERM,
            Error::InvalidArgument(_)
            | Error::Config(_)
            | Error::InvalidConfig(_)
            | Error::PathCollision(_) => libc::EINVAL,
            Error::NoData => libc::ENODATA,
            Error::NotALink => libc::ENOLINK,
            Error::NotSupported => libc::ENOTSUP,
            Error::Internal(_) => libc::EIO,
        }
    }

    /// Whether the error is a "not found" signal from the backing store
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            Error::PathNotFound(_) => true,
            _ => false,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Io(io::Error::from_raw_os_error(e as i32))
    }
}
