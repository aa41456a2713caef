use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// EmberDB errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Decoded bytes are inconsistent with their header, or an offset points
    /// outside the mapped file. The store should be treated as read-only once
    /// this surfaces.
    Corrupt(String),
    /// An IO error from the underlying file or memory map.
    IO(String),
    /// Invalid user input, such as an empty key or malformed configuration.
    InvalidInput(String),
    /// A key longer than 255 bytes was supplied.
    KeyTooLong(usize),
    /// The key was not found. Only produced by `delete` in strict mode;
    /// `get` reports an absent key as `Ok(None)`.
    NotFound,
    /// Growing the data file would exceed the configured maximum size.
    OutOfSpace,
    /// A write was attempted through a read transaction.
    ReadOnly,
    /// A value too large for the node encoding was supplied.
    ValueTooLong(usize),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corrupt(msg) => write!(f, "corrupt node: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::KeyTooLong(len) => write!(f, "key of {len} bytes exceeds 255 byte limit"),
            Error::NotFound => write!(f, "key not found"),
            Error::OutOfSpace => write!(f, "data file growth exceeds configured maximum"),
            Error::ReadOnly => write!(f, "write attempted through a read transaction"),
            Error::ValueTooLong(len) => write!(f, "value of {len} bytes exceeds node capacity"),
        }
    }
}

/// Constructs an Error::Corrupt for the given format string.
#[macro_export]
macro_rules! errcorrupt {
    ($($args:tt)*) => { $crate::error::Error::Corrupt(format!($($args)*)).into() };
}

/// Constructs an Error::InvalidInput for the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidInput(format!($($args)*)).into() };
}

/// An EmberDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::KeyTooLong(300).to_string(),
            "key of 300 bytes exceeds 255 byte limit"
        );
        assert_eq!(Error::NotFound.to_string(), "key not found");
        assert_eq!(
            Error::Corrupt("short node".to_string()).to_string(),
            "corrupt node: short node"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IO(_)));
    }

    #[test]
    fn test_macros() {
        let err: Result<()> = errcorrupt!("bad length {}", 7);
        assert_eq!(err, Err(Error::Corrupt("bad length 7".to_string())));

        let err: Result<()> = errinput!("empty key");
        assert_eq!(err, Err(Error::InvalidInput("empty key".to_string())));
    }
}
