//! Incremental Server-Sent-Events line parser.
//!
//! A pure state machine: raw byte chunks in, complete `(name, data)` events
//! out.  No I/O, so the parser is testable without an HTTP transport and the
//! streaming worker owns all connection handling.
//!
//! # Line grammar
//! - `:` prefix: comment, ignored.
//! - `event:` prefix: sets the pending event name (one optional leading
//!   space trimmed).
//! - `data:` prefix: appends to the pending body; multiple `data:` lines
//!   join with `\n`.
//! - empty line: dispatches the pending event and resets.  If either the
//!   name or the body is missing, the event is dropped with a warning.
//!
//! The parser refuses to buffer more than `max_pending` bytes for a single
//! event; a stream that never terminates an event surfaces
//! [`SseOverflowError`] instead of growing without bound.

use tracing::warn;

/// Default cap on bytes buffered for one unterminated event.
pub const DEFAULT_MAX_PENDING: usize = 8 * 1024 * 1024;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub name: String,
    pub data: String,
}

#[derive(Debug, thiserror::Error)]
#[error("server-sent event exceeded {limit} bytes without terminating")]
pub struct SseOverflowError {
    pub limit: usize,
}

pub struct SseParser {
    buffer: Vec<u8>,
    event_name: Option<String>,
    event_data: Option<String>,
    max_pending: usize,
}

impl SseParser {
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        SseParser {
            buffer: Vec::new(),
            event_name: None,
            event_data: None,
            max_pending,
        }
    }

    /// Consume one chunk of stream bytes, returning every event completed
    /// by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, SseOverflowError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        if self.pending_bytes() > self.max_pending {
            return Err(SseOverflowError {
                limit: self.max_pending,
            });
        }

        Ok(events)
    }

    fn pending_bytes(&self) -> usize {
        self.buffer.len()
            + self.event_name.as_ref().map_or(0, String::len)
            + self.event_data.as_ref().map_or(0, String::len)
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.starts_with(':') {
            return None;
        }

        if line.is_empty() {
            let name = self.event_name.take();
            let data = self.event_data.take();
            return match (name, data) {
                (Some(name), Some(data)) => Some(SseEvent { name, data }),
                (None, _) => {
                    warn!("dropping server-sent event with no name");
                    None
                }
                (_, None) => {
                    warn!("dropping server-sent event with no data");
                    None
                }
            };
        }

        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            match &mut self.event_data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(rest);
                }
                None => self.event_data = Some(rest.to_owned()),
            }
        } else if let Some(rest) = line.strip_prefix("event:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            self.event_name = Some(rest.to_owned());
        }
        // Unknown fields (`id:`, `retry:`, …) are ignored.

        None
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}
