//! Per-command response status.

use std::fmt;

/// Classified server response, plus client-side terminal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Stored,
    CreatedStored,
    Replaced,
    Deleted,
    DeletedDropped,
    Updated,
    /// Numeric result of an incr/decr.
    Value,
    /// Every command in a batch succeeded.
    End,
    /// A batch finished with at least one failed command.
    FailedEnd,
    NotFound,
    NotFoundElement,
    NothingToUpdate,
    ElementExists,
    Overflowed,
    OutOfRange,
    TypeMismatch,
    BKeyMismatch,
    EflagMismatch,
    Unreadable,
    NotSupported,
    /// Relocation signal; never delivered to callers.
    NotMyKey,
    ServerError,
    ClientError,
    Error,
    /// The pipeline was aborted before this command got a status.
    PipeError,
    Cancelled,
    TimedOut,
    Undefined,
}

impl StatusCode {
    /// Check if the code counts as success for the command that produced it.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StatusCode::Stored
                | StatusCode::CreatedStored
                | StatusCode::Replaced
                | StatusCode::Deleted
                | StatusCode::DeletedDropped
                | StatusCode::Updated
                | StatusCode::Value
                | StatusCode::End
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StatusCode::Stored => "STORED",
            StatusCode::CreatedStored => "CREATED_STORED",
            StatusCode::Replaced => "REPLACED",
            StatusCode::Deleted => "DELETED",
            StatusCode::DeletedDropped => "DELETED_DROPPED",
            StatusCode::Updated => "UPDATED",
            StatusCode::Value => "VALUE",
            StatusCode::End => "END",
            StatusCode::FailedEnd => "FAILED_END",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::NotFoundElement => "NOT_FOUND_ELEMENT",
            StatusCode::NothingToUpdate => "NOTHING_TO_UPDATE",
            StatusCode::ElementExists => "ELEMENT_EXISTS",
            StatusCode::Overflowed => "OVERFLOWED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::TypeMismatch => "TYPE_MISMATCH",
            StatusCode::BKeyMismatch => "BKEY_MISMATCH",
            StatusCode::EflagMismatch => "EFLAG_MISMATCH",
            StatusCode::Unreadable => "UNREADABLE",
            StatusCode::NotSupported => "NOT_SUPPORTED",
            StatusCode::NotMyKey => "NOT_MY_KEY",
            StatusCode::ServerError => "SERVER_ERROR",
            StatusCode::ClientError => "CLIENT_ERROR",
            StatusCode::Error => "ERROR",
            StatusCode::PipeError => "PIPE_ERROR",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::TimedOut => "TIMED_OUT",
            StatusCode::Undefined => "UNDEFINED",
        };
        f.write_str(text)
    }
}

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    /// Classified code.
    pub code: StatusCode,
    /// Raw response line or client-side reason.
    pub message: String,
    /// Numeric payload for incr/decr.
    pub value: Option<u64>,
}

impl OperationStatus {
    /// Create a status with the given code and message.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            value: None,
        }
    }

    /// Create a numeric incr/decr result.
    pub fn value(value: u64) -> Self {
        Self {
            code: StatusCode::Value,
            message: value.to_string(),
            value: Some(value),
        }
    }

    /// Create a cancelled status.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, reason)
    }

    /// Create a timed-out status.
    pub fn timed_out() -> Self {
        Self::new(StatusCode::TimedOut, "operation timed out")
    }

    /// Check if the command succeeded.
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}
