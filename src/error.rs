//! Error types for the siltdb storage substrate.

use std::fmt;
use std::io;

/// The result type used throughout siltdb.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for table and log operations.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred.
    Io(io::Error),

    /// Data corruption was detected: checksum mismatch, bad varint, bad
    /// magic number, truncated block, or an unknown compression or record
    /// type.
    Corruption(String),

    /// The requested entity was not found.
    NotFound(String),

    /// An invalid argument was provided, e.g. out-of-order keys handed to a
    /// builder.
    InvalidArgument(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Returns true if this error is a corruption error.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            // io::Error does not implement Clone; preserve kind and message.
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::Corruption(msg) => Error::Corruption(msg.clone()),
            Error::NotFound(msg) => Error::NotFound(msg.clone()),
            Error::InvalidArgument(msg) => Error::InvalidArgument(msg.clone()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Corruption(msg) => write!(f, "Corruption: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
