//! Wire state machine for one piped request.
//!
//! A [`PipelineOperation`] carries up to 500 commands bound for one node. It
//! writes them as a single framed request and parses the framed response
//! line by line, reporting each command's status to its
//! [`PipelineCallback`] in request order.
//!
//! A `NOT_MY_KEY` line marks its position as relocated. Once the response
//! ends, an operation with relocated positions finishes in `REDIRECT` and
//! stores a [`RedirectHandler`] for the caller to collect.

use super::redirect::RedirectHandler;
use super::response::{parse_line, ResponseLine};
use crate::collection::CollectionCommand;
use crate::error::{Error, Result};
use crate::operation::{Operation, OperationCore, OperationState, OperationStatus, StatusCode};
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Receives the outcome of a [`PipelineOperation`].
pub trait PipelineCallback: Send + Sync {
    /// A command got its final status. `index` is the command's position in
    /// the caller's batch.
    fn received_status(&self, index: usize, status: OperationStatus);

    /// The operation reached `COMPLETE`, `REDIRECT` or `CANCELLED`. Called
    /// exactly once.
    fn complete(self: Arc<Self>, op: &PipelineOperation);
}

/// A command as carried by a pipeline operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipedCommand {
    /// Position in the caller's batch.
    pub index: usize,
    /// Key the command targets.
    pub key: String,
    /// Command to encode on the wire.
    pub command: CollectionCommand,
    /// Times this command has been resubmitted after a redirect.
    pub redirects: u32,
}

impl PipedCommand {
    /// Create a command that has not been redirected yet.
    pub fn new(index: usize, key: String, command: CollectionCommand) -> Self {
        Self {
            index,
            key,
            command,
            redirects: 0,
        }
    }

    /// Copy for resubmission after a redirect.
    pub(crate) fn redirected(&self) -> Self {
        Self {
            redirects: self.redirects + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Default)]
struct ParseState {
    /// Announced status count; `None` until the header is read.
    expected: Option<usize>,
    /// Next position to receive a status.
    position: usize,
    relocated: Vec<usize>,
    /// Bytes of a line whose terminator has not arrived yet.
    partial: BytesMut,
}

enum Outcome {
    Complete,
    Redirect(Vec<usize>),
}

/// One framed request of piped collection commands.
pub struct PipelineOperation {
    core: OperationCore,
    commands: Vec<PipedCommand>,
    buffer: Mutex<Bytes>,
    parser: Mutex<ParseState>,
    redirect: Mutex<Option<RedirectHandler>>,
    callback: Arc<dyn PipelineCallback>,
}

impl PipelineOperation {
    /// Create an operation; `commands` must hold at most 500 entries.
    pub fn new(commands: Vec<PipedCommand>, callback: Arc<dyn PipelineCallback>) -> Self {
        Self {
            core: OperationCore::new(),
            commands,
            buffer: Mutex::new(Bytes::new()),
            parser: Mutex::new(ParseState::default()),
            redirect: Mutex::new(None),
            callback,
        }
    }

    /// Commands in wire order.
    pub fn commands(&self) -> &[PipedCommand] {
        &self.commands
    }

    /// Command at a wire position.
    pub fn command_at(&self, position: usize) -> Option<&PipedCommand> {
        self.commands.get(position)
    }

    /// Take the redirect handler produced by the last response.
    ///
    /// Returns it once; later calls return `None` until another redirect.
    pub fn get_and_clear_redirect_handler(&self) -> Option<RedirectHandler> {
        self.redirect.lock().take()
    }

    fn deliver(&self, position: usize, status: OperationStatus) {
        if self.core.is_cancelled() {
            return;
        }
        if let Some(command) = self.commands.get(position) {
            self.callback.received_status(command.index, status);
        }
    }

    fn handle_line(&self, state: &mut ParseState, line: &str) -> Result<Option<Outcome>> {
        trace!(line, position = state.position, "Pipeline response line");
        let parsed = parse_line(line)?;

        let Some(expected) = state.expected else {
            return match parsed {
                ResponseLine::Header(count) if count > self.commands.len() => {
                    Err(Error::Protocol(format!(
                        "response announces {} statuses for {} commands",
                        count,
                        self.commands.len()
                    )))
                }
                ResponseLine::Header(count) => {
                    state.expected = Some(count);
                    Ok(None)
                }
                ResponseLine::PipeError(reason) => Ok(Some(self.close(state, Some(reason)))),
                _ => Err(Error::Protocol(format!(
                    "expected RESPONSE header, got {:?}",
                    line
                ))),
            };
        };

        match parsed {
            ResponseLine::End => Ok(Some(self.close(state, None))),
            ResponseLine::PipeError(reason) => Ok(Some(self.close(state, Some(reason)))),
            ResponseLine::Header(_) => Err(Error::Protocol("repeated RESPONSE header".to_string())),
            _ if state.position >= expected => Err(Error::Protocol(format!(
                "more than {} status lines",
                expected
            ))),
            ResponseLine::Relocated => {
                state.relocated.push(state.position);
                state.position += 1;
                Ok(None)
            }
            ResponseLine::Status(status) => {
                self.deliver(state.position, status);
                state.position += 1;
                Ok(None)
            }
        }
    }

    /// Account for positions the server never answered and pick the outcome.
    fn close(&self, state: &mut ParseState, pipe_error: Option<String>) -> Outcome {
        let unanswered = state.position..self.commands.len();
        match pipe_error {
            Some(reason) => {
                debug!(reason = %reason, unanswered = unanswered.len(), "Pipeline aborted by server");
                for position in unanswered {
                    self.deliver(position, OperationStatus::new(StatusCode::PipeError, reason.clone()));
                }
            }
            // a node that stopped after NOT_MY_KEY did not own the rest either
            None if !state.relocated.is_empty() => state.relocated.extend(unanswered),
            None => {
                for position in unanswered {
                    self.deliver(position, OperationStatus::new(StatusCode::PipeError, "no response"));
                }
            }
        }

        state.expected = None;
        state.position = 0;
        let relocated = std::mem::take(&mut state.relocated);
        if relocated.is_empty() {
            Outcome::Complete
        } else {
            Outcome::Redirect(relocated)
        }
    }

    fn finish(&self, outcome: Outcome) {
        if self.core.is_cancelled() {
            return;
        }
        match outcome {
            Outcome::Complete => {
                if self.core.transition(OperationState::Complete) {
                    Arc::clone(&self.callback).complete(self);
                }
            }
            Outcome::Redirect(positions) => {
                let handler = RedirectHandler::from_positions(&self.commands, positions);
                debug!(
                    node = ?self.handling_node().map(|n| n.name().to_string()),
                    keys = handler.keys().len(),
                    positions = handler.positions().len(),
                    single_key = handler.is_single_key(),
                    "Pipeline redirected"
                );
                *self.redirect.lock() = Some(handler);
                if self.core.transition(OperationState::Redirect) {
                    Arc::clone(&self.callback).complete(self);
                }
            }
        }
    }
}

impl Operation for PipelineOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn initialize(&self) {
        let mut buf = BytesMut::with_capacity(64 * self.commands.len().max(1));
        buf.put_slice(format!("PIPE {}\r\n", self.commands.len()).as_bytes());
        for piped in &self.commands {
            piped.command.write_to(&piped.key, &mut buf);
        }
        *self.buffer.lock() = buf.freeze();
        *self.parser.lock() = ParseState::default();
    }

    fn write_buffer(&self) -> Bytes {
        self.buffer.lock().clone()
    }

    fn read_from_buffer(&self, buf: &mut BytesMut) -> Result<bool> {
        let mut state = self.parser.lock();
        let outcome = loop {
            let Some(newline) = buf.iter().position(|b| *b == b'\n') else {
                state.partial.extend_from_slice(&buf[..]);
                buf.clear();
                return Ok(false);
            };

            let chunk = buf.split_to(newline + 1);
            state.partial.extend_from_slice(&chunk);
            let raw = state.partial.split();
            let line = std::str::from_utf8(&raw)
                .map_err(|e| Error::Protocol(format!("non-UTF-8 response line: {}", e)))?
                .trim_end_matches(&['\r', '\n'][..]);

            if let Some(outcome) = self.handle_line(&mut state, line)? {
                break outcome;
            }
        };
        drop(state);

        self.finish(outcome);
        Ok(true)
    }

    fn cancel(&self, reason: &str) -> bool {
        match self.core.mark_cancelled(reason) {
            Some(not_started) => {
                debug!(reason, not_started, commands = self.commands.len(), "Pipeline operation cancelled");
                Arc::clone(&self.callback).complete(self);
                not_started
            }
            None => false,
        }
    }
}

impl fmt::Debug for PipelineOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOperation")
            .field("state", &self.core.state())
            .field("commands", &self.commands.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CachedData;

    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<(usize, StatusCode)>>,
        completions: Mutex<Vec<OperationState>>,
    }

    impl PipelineCallback for Recorder {
        fn received_status(&self, index: usize, status: OperationStatus) {
            self.statuses.lock().push((index, status.code));
        }

        fn complete(self: Arc<Self>, op: &PipelineOperation) {
            self.completions.lock().push(op.state());
        }
    }

    fn op_for(keys: &[&str]) -> (Arc<PipelineOperation>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let commands = keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                PipedCommand::new(
                    i,
                    key.to_string(),
                    CollectionCommand::SetInsert {
                        value: CachedData::new(0, b"v".to_vec()),
                        attributes: None,
                    },
                )
            })
            .collect();
        let op = Arc::new(PipelineOperation::new(commands, recorder.clone()));
        op.initialize();
        op.transition_state(OperationState::Writing);
        op.write_complete();
        (op, recorder)
    }

    fn feed(op: &PipelineOperation, text: &str) -> bool {
        let mut buf = BytesMut::from(text.as_bytes());
        op.read_from_buffer(&mut buf).unwrap()
    }

    #[test]
    fn test_write_buffer() {
        let (op, _) = op_for(&["a", "b"]);
        assert_eq!(
            &op.write_buffer()[..],
            b"PIPE 2\r\nsop insert a 1\r\nv\r\nsop insert b 1\r\nv\r\n"
        );
    }

    #[test]
    fn test_all_stored() {
        let (op, recorder) = op_for(&["a", "b"]);
        assert!(feed(&op, "RESPONSE 2\r\nSTORED\r\nELEMENT_EXISTS\r\nEND\r\n"));

        assert_eq!(op.state(), OperationState::Complete);
        assert_eq!(
            *recorder.statuses.lock(),
            vec![(0, StatusCode::Stored), (1, StatusCode::ElementExists)]
        );
        assert_eq!(*recorder.completions.lock(), vec![OperationState::Complete]);
        assert!(op.get_and_clear_redirect_handler().is_none());
    }

    #[test]
    fn test_multi_key_redirect() {
        let (op, recorder) = op_for(&["k1", "k2", "k3", "k4"]);
        assert!(feed(
            &op,
            "RESPONSE 4\r\nSTORED\r\nNOT_MY_KEY 100 200\r\nSTORED\r\nNOT_MY_KEY 100 200\r\nEND\r\n"
        ));

        assert_eq!(op.state(), OperationState::Redirect);
        assert_eq!(
            *recorder.statuses.lock(),
            vec![(0, StatusCode::Stored), (2, StatusCode::Stored)]
        );

        let handler = op.get_and_clear_redirect_handler().unwrap();
        assert!(!handler.is_single_key());
        assert_eq!(handler.keys(), vec!["k2", "k4"]);
        assert_eq!(handler.positions(), &[1, 3]);
        assert!(op.get_and_clear_redirect_handler().is_none());
    }

    #[test]
    fn test_single_key_redirect_with_short_response() {
        let (op, recorder) = op_for(&["same", "same", "same", "same"]);
        assert!(feed(&op, "RESPONSE 2\r\nSTORED\r\nNOT_MY_KEY 1 2\r\nEND\r\n"));

        assert_eq!(op.state(), OperationState::Redirect);
        assert_eq!(*recorder.statuses.lock(), vec![(0, StatusCode::Stored)]);

        let handler = op.get_and_clear_redirect_handler().unwrap();
        assert_eq!(
            handler,
            RedirectHandler::SingleKey {
                key: "same".to_string(),
                positions: vec![1, 2, 3]
            }
        );
    }

    #[test]
    fn test_short_response_without_redirect() {
        let (op, recorder) = op_for(&["a", "b"]);
        assert!(feed(&op, "RESPONSE 1\r\nSTORED\r\nEND\r\n"));
        assert_eq!(
            *recorder.statuses.lock(),
            vec![(0, StatusCode::Stored), (1, StatusCode::PipeError)]
        );
        assert_eq!(op.state(), OperationState::Complete);
    }

    #[test]
    fn test_pipe_error() {
        let (op, recorder) = op_for(&["a", "b", "c"]);
        assert!(feed(&op, "RESPONSE 3\r\nSTORED\r\nPIPE_ERROR bad data chunk\r\n"));
        assert_eq!(
            *recorder.statuses.lock(),
            vec![
                (0, StatusCode::Stored),
                (1, StatusCode::PipeError),
                (2, StatusCode::PipeError)
            ]
        );
        assert_eq!(op.state(), OperationState::Complete);
    }

    #[test]
    fn test_split_lines_and_trailing_bytes() {
        let (op, recorder) = op_for(&["a"]);
        let mut buf = BytesMut::from(&b"RESPONSE 1\r\nSTO"[..]);
        assert!(!op.read_from_buffer(&mut buf).unwrap());
        assert!(buf.is_empty());

        buf.extend_from_slice(b"RED\r");
        assert!(!op.read_from_buffer(&mut buf).unwrap());
        buf.extend_from_slice(b"\nEND\r\nRESPONSE 9\r\n");
        assert!(op.read_from_buffer(&mut buf).unwrap());

        assert_eq!(*recorder.statuses.lock(), vec![(0, StatusCode::Stored)]);
        // bytes after END belong to the next operation
        assert_eq!(&buf[..], b"RESPONSE 9\r\n");
    }

    #[test]
    fn test_protocol_errors() {
        let (op, _) = op_for(&["a"]);
        let mut buf = BytesMut::from(&b"RESPONSE 2\r\n"[..]);
        assert!(matches!(op.read_from_buffer(&mut buf), Err(Error::Protocol(_))));

        let (op, _) = op_for(&["a"]);
        let mut buf = BytesMut::from(&b"STORED\r\n"[..]);
        assert!(op.read_from_buffer(&mut buf).is_err());

        let (op, _) = op_for(&["a"]);
        let mut buf = BytesMut::from(&b"RESPONSE 1\r\nSTORED\r\nSTORED\r\n"[..]);
        assert!(op.read_from_buffer(&mut buf).is_err());
    }

    #[test]
    fn test_cancel_before_write() {
        let recorder = Arc::new(Recorder::default());
        let op = PipelineOperation::new(Vec::new(), recorder.clone());
        assert!(op.cancel("caller"));
        assert_eq!(op.state(), OperationState::Cancelled);
        assert_eq!(*recorder.completions.lock(), vec![OperationState::Cancelled]);
        assert!(!op.cancel("again"));
    }

    #[test]
    fn test_cancel_in_flight_discards_results() {
        let (op, recorder) = op_for(&["a", "b"]);
        assert!(!op.cancel("caller"));

        // the response is still consumed so the next operation stays aligned
        let mut buf = BytesMut::from(&b"RESPONSE 2\r\nSTORED\r\nSTORED\r\nEND\r\nNEXT"[..]);
        assert!(op.read_from_buffer(&mut buf).unwrap());
        assert_eq!(&buf[..], b"NEXT");

        assert!(recorder.statuses.lock().is_empty());
        assert_eq!(op.state(), OperationState::Cancelled);
        assert_eq!(*recorder.completions.lock(), vec![OperationState::Cancelled]);
    }
}
