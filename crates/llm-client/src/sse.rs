//! Server-sent-event framing over a chunked byte stream.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::errors::StreamError;

/// Data value that marks the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Event name used when a frame carries no `event:` field.
pub const DEFAULT_EVENT_NAME: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// Output of the frame reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Event(SseFrame),
    /// The `[DONE]` sentinel.
    Done,
}

/// Push-based SSE line parser.
///
/// Bytes may be split anywhere, including inside a multi-byte UTF-8
/// sequence; only complete lines are interpreted.
#[derive(Debug)]
pub struct SseDecoder {
    line: Vec<u8>,
    max_line_bytes: usize,
    event: Option<String>,
    data: String,
    has_data: bool,
    id: Option<String>,
    retry: Option<u64>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new(crate::session::DEFAULT_MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    /// Creates a decoder. `max_line_bytes` caps both a single line and the
    /// joined `data` of one frame.
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            line: Vec::new(),
            max_line_bytes,
            event: None,
            data: String::new(),
            has_data: false,
            id: None,
            retry: None,
        }
    }

    /// Feeds a chunk and returns every frame completed by it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, StreamError> {
        let mut frames = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];
            if self.line.is_empty() {
                self.process_line(head, &mut frames)?;
            } else {
                let mut line = std::mem::take(&mut self.line);
                line.extend_from_slice(head);
                self.process_line(&line, &mut frames)?;
            }
        }
        if !rest.is_empty() {
            // A trailing CR may be the first half of a CRLF split across chunks.
            let pending = self.line.len() + rest.len() - usize::from(rest.ends_with(b"\r"));
            self.ensure_fits(pending)?;
            self.line.extend_from_slice(rest);
        }
        Ok(frames)
    }

    /// Returns true when bytes of an undispatched frame are buffered.
    pub fn has_partial(&self) -> bool {
        !self.line.is_empty() || self.has_data || self.event.is_some()
    }

    fn ensure_fits(&self, len: usize) -> Result<(), StreamError> {
        if len > self.max_line_bytes {
            return Err(StreamError::frame(format!(
                "line exceeds {} bytes",
                self.max_line_bytes
            )));
        }
        Ok(())
    }

    fn process_line(&mut self, raw: &[u8], frames: &mut Vec<Frame>) -> Result<(), StreamError> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        self.ensure_fits(raw.len())?;
        let line = std::str::from_utf8(raw)
            .map_err(|e| StreamError::frame(format!("line is not valid UTF-8: {e}")))?;

        if line.is_empty() {
            if let Some(frame) = self.dispatch() {
                frames.push(frame);
            }
            return Ok(());
        }
        if line.starts_with(':') {
            return Ok(());
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                let joined = self.data.len() + usize::from(self.has_data) + value.len();
                if joined > self.max_line_bytes {
                    return Err(StreamError::frame(format!(
                        "event data exceeds {} bytes",
                        self.max_line_bytes
                    )));
                }
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(ms);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        let id = self.id.take();
        let retry = self.retry.take();
        if !std::mem::take(&mut self.has_data) {
            return None;
        }
        let data = std::mem::take(&mut self.data);
        if data.trim() == DONE_SENTINEL {
            return Some(Frame::Done);
        }
        Some(Frame::Event(SseFrame {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string()),
            data,
            id,
            retry,
        }))
    }
}

/// Pulls frames out of a chunked byte stream.
pub struct FrameReader<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<Frame>,
    finished: bool,
    bytes_read: u64,
}

impl<S, E> FrameReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    /// Wraps a byte stream; see [`SseDecoder::new`] for `max_line_bytes`.
    pub fn new(body: S, max_line_bytes: usize) -> Self {
        Self {
            body,
            decoder: SseDecoder::new(max_line_bytes),
            pending: VecDeque::new(),
            finished: false,
            bytes_read: 0,
        }
    }

    /// Next frame, or `None` at end of input.
    ///
    /// An incomplete frame left at end of input is discarded.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, StreamError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if self.finished {
                return Ok(None);
            }
            match self.body.next().await {
                Some(Ok(chunk)) => {
                    self.bytes_read += chunk.len() as u64;
                    let frames = self.decoder.push_chunk(&chunk)?;
                    self.pending.extend(frames);
                }
                Some(Err(err)) => {
                    return Err(StreamError::transport(format!("stream read failed: {err}")));
                }
                None => {
                    if self.decoder.has_partial() {
                        tracing::debug!(
                            bytes_read = self.bytes_read,
                            "discarding partial frame at end of stream"
                        );
                    }
                    self.finished = true;
                }
            }
        }
    }

    /// Total body bytes pulled so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}
