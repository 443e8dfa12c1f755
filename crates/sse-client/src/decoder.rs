//! Event stream frame decoder
//!
//! Turns the raw response body into [`RawEvent`] frames. Bytes are buffered
//! until a full line is available, so frames and multi-byte UTF-8 sequences
//! split across reads are reassembled before they are looked at.

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use tracing::trace;

use crate::error::{ClientError, Result};
use crate::message::RawEvent;

/// Initial capacity of the carry-over buffer
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Incremental frame decoder state
#[derive(Debug)]
pub struct FrameDecoder {
    /// Bytes after the last complete line
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline
    scanned: usize,
    /// Frame being accumulated
    current: Option<RawEvent>,
    /// First parse failure seen in the current frame
    frame_error: Option<ClientError>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            buffer: Vec::with_capacity(READ_BUFFER_SIZE),
            scanned: 0,
            current: None,
            frame_error: None,
        }
    }
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the decoder and extract any complete frames
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<RawEvent>> {
        let mut frames = Vec::new();

        self.buffer.extend_from_slice(bytes);

        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.buffer[search_from..].iter().position(|&b| b == b'\n') {
            let end = search_from + offset;
            let mut line = &self.buffer[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }

            if line.is_empty() {
                if let Some(frame) = self.end_frame() {
                    frames.push(frame);
                }
            } else {
                let line = String::from_utf8_lossy(line).into_owned();
                self.process_line(&line);
            }

            start = end + 1;
            search_from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        frames
    }

    /// Number of bytes waiting for the rest of their line
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Apply one non-empty `label: value` line to the frame in progress
    fn process_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        let (label, value) = split_line(line);

        match label {
            "id" => {
                let current = self.current.get_or_insert_with(RawEvent::default);
                match value.parse::<i64>() {
                    Ok(id) => current.event_id = Some(id),
                    Err(source) => {
                        if self.frame_error.is_none() {
                            self.frame_error = Some(ClientError::InvalidEventId {
                                value: value.to_string(),
                                source,
                            });
                        }
                    }
                }
            }
            "data" => {
                let current = self.current.get_or_insert_with(RawEvent::default);
                if !current.data.is_empty() {
                    current.data.push('\n');
                }
                current.data.push_str(value);
            }
            "" => trace!("Event stream comment"),
            _ => trace!(label, "Ignoring unknown event stream field"),
        }
    }

    /// Close the frame in progress, if any
    fn end_frame(&mut self) -> Option<Result<RawEvent>> {
        let current = self.current.take();
        match self.frame_error.take() {
            Some(err) => Some(Err(err)),
            None => current.map(Ok),
        }
    }
}

/// Split `label: value`, dropping a single space after the colon
fn split_line(line: &str) -> (&str, &str) {
    match line.split_once(':') {
        Some((label, value)) => (label, value.strip_prefix(' ').unwrap_or(value)),
        None => (line, ""),
    }
}

/// Decode a byte stream into frames.
///
/// Frame-level parse failures are yielded in place of the frame and decoding
/// continues. A transport error is yielded once and ends the stream; the
/// stream simply ends when the body does.
pub fn decode_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<RawEvent>>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<ClientError>,
{
    async_stream::stream! {
        let mut decoder = FrameDecoder::new();
        futures::pin_mut!(byte_stream);

        while let Some(chunk) = byte_stream.next().await {
            match chunk {
                Ok(bytes) => {
                    for frame in decoder.feed(&bytes) {
                        yield frame;
                    }
                }
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            }
        }

        trace!(pending = decoder.pending_bytes(), "Event stream body ended");
    }
}
