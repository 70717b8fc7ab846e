//! Error types for the cache client.

use thiserror::Error;

/// Result type alias for cache client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cache client.
///
/// Configuration errors (`Config`, `PipelineFull`, `InvalidKey`, `InvalidBKey`,
/// `BKeyMismatch`, `ElementTooLarge`) are raised synchronously at call time and
/// are never worth retrying. Everything else surfaces through an
/// [`OperationFuture`](crate::operation::OperationFuture).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// A pipeline batch already holds the maximum number of commands.
    #[error("pipeline full: at most {max} commands per batch")]
    PipelineFull { max: usize },

    /// The cache key is not acceptable on the wire.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The B-tree key is malformed.
    #[error("invalid bkey: {0}")]
    InvalidBKey(String),

    /// Two B-tree keys of different kinds were combined.
    #[error("bkey type mismatch: integer and byte-array bkeys cannot be mixed")]
    BKeyMismatch,

    /// An encoded element exceeds the transcoder limit.
    #[error("element too large: {size} bytes (max {max})")]
    ElementTooLarge { size: usize, max: usize },

    /// The hash ring has no node to route to.
    #[error("no node available")]
    NoNodeAvailable,

    /// Redirect recovery gave up while the topology was still converging.
    #[error("redirect limit exceeded after {attempts} attempts for keys {keys:?}")]
    RedirectLimitExceeded { attempts: u32, keys: Vec<String> },

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The operation was cancelled.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// The server response could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Value encoding or decoding failed.
    #[error("transcode error: {0}")]
    Transcode(String),

    /// The transport rejected an operation.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Check if this error was raised synchronously from bad input.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::PipelineFull { .. }
                | Error::InvalidKey(_)
                | Error::InvalidBKey(_)
                | Error::BKeyMismatch
                | Error::ElementTooLarge { .. }
        )
    }

    /// Check if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Transcode(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Error::Transcode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_classification() {
        assert!(Error::PipelineFull { max: 500 }.is_config());
        assert!(Error::BKeyMismatch.is_config());
        assert!(!Error::Timeout.is_config());
        assert!(!Error::RedirectLimitExceeded { attempts: 5, keys: vec![] }.is_config());
    }

    #[test]
    fn test_redirect_limit_is_not_timeout() {
        let err = Error::RedirectLimitExceeded {
            attempts: 3,
            keys: vec!["k".to_string()],
        };
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("3 attempts"));
    }
}
