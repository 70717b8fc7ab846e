//! Line grammar of a piped response.
//!
//! ```text
//! RESPONSE <n>
//! <status line> x n
//! END | PIPE_ERROR <reason>
//! ```

use crate::error::{Error, Result};
use crate::operation::{OperationStatus, StatusCode};

/// One classified response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResponseLine {
    /// `RESPONSE <n>`.
    Header(usize),
    /// A per-command outcome.
    Status(OperationStatus),
    /// `NOT_MY_KEY <min> <max>`; the range is not used.
    Relocated,
    /// `END`.
    End,
    /// `PIPE_ERROR <reason>`.
    PipeError(String),
}

/// Classify a line with its terminator already stripped.
pub(crate) fn parse_line(line: &str) -> Result<ResponseLine> {
    let (head, rest) = match line.split_once(' ') {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let code = match head {
        "" => return Err(Error::Protocol("empty response line".to_string())),
        "RESPONSE" => {
            return rest
                .parse::<usize>()
                .map(ResponseLine::Header)
                .map_err(|_| Error::Protocol(format!("bad response count: {:?}", line)));
        }
        "END" => return Ok(ResponseLine::End),
        "PIPE_ERROR" => return Ok(ResponseLine::PipeError(rest.to_string())),
        "NOT_MY_KEY" => return Ok(ResponseLine::Relocated),
        "STORED" => StatusCode::Stored,
        "CREATED_STORED" => StatusCode::CreatedStored,
        "REPLACED" => StatusCode::Replaced,
        "DELETED" => StatusCode::Deleted,
        "DELETED_DROPPED" => StatusCode::DeletedDropped,
        "UPDATED" => StatusCode::Updated,
        "NOT_FOUND" => StatusCode::NotFound,
        "NOT_FOUND_ELEMENT" => StatusCode::NotFoundElement,
        "NOTHING_TO_UPDATE" => StatusCode::NothingToUpdate,
        "ELEMENT_EXISTS" => StatusCode::ElementExists,
        "OVERFLOWED" => StatusCode::Overflowed,
        "OUT_OF_RANGE" => StatusCode::OutOfRange,
        "TYPE_MISMATCH" => StatusCode::TypeMismatch,
        "BKEY_MISMATCH" => StatusCode::BKeyMismatch,
        "EFLAG_MISMATCH" => StatusCode::EflagMismatch,
        "UNREADABLE" => StatusCode::Unreadable,
        "NOT_SUPPORTED" => StatusCode::NotSupported,
        "SERVER_ERROR" => StatusCode::ServerError,
        "CLIENT_ERROR" => StatusCode::ClientError,
        "ERROR" => StatusCode::Error,
        numeric if numeric.bytes().all(|b| b.is_ascii_digit()) => {
            let value = numeric
                .parse::<u64>()
                .map_err(|_| Error::Protocol(format!("bad numeric result: {:?}", line)))?;
            return Ok(ResponseLine::Status(OperationStatus::value(value)));
        }
        _ => StatusCode::Undefined,
    };

    Ok(ResponseLine::Status(OperationStatus::new(code, line)))
}
