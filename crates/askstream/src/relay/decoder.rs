//! Incremental SSE chunk decoding
//!
//! The upstream body arrives in arbitrarily sized pieces that may split a
//! line (or a multi-byte UTF-8 character) anywhere. [`SseDecoder`] keeps the
//! undecoded tail between reads and only decodes a line once its newline has
//! arrived, so the payloads it yields do not depend on how the bytes were
//! chunked. [`PayloadStream`] drives a decoder from a byte stream and yields
//! the payloads lazily.

use bytes::Bytes;
use futures::stream::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::error::RelayError;

/// Prefix that marks a line as an event record
pub const DATA_PREFIX: &str = "data:";

/// Longest partial line held while waiting for its newline
pub const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// Line splitter with a carry-over buffer for partial lines
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the payloads of every record it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let scan_from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        let mut line_start = 0;
        for pos in scan_from..self.buffer.len() {
            if self.buffer[pos] == b'\n' {
                if let Some(payload) = Self::parse_line(&self.buffer[line_start..pos]) {
                    payloads.push(payload);
                }
                line_start = pos + 1;
            }
        }
        self.buffer.drain(..line_start);

        payloads
    }

    /// Flush a final line that was never newline-terminated
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        Self::parse_line(&rest)
    }

    /// Number of bytes waiting for the rest of their line
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Extract the trimmed payload of a `data:` line; blank and other lines yield `None`
    ///
    /// Only trailing whitespace (including the `\r` of a CRLF ending) is
    /// stripped before the prefix check, so an indented `data:` is not a record.
    fn parse_line(line: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end();
        if text.is_empty() {
            return None;
        }

        text.strip_prefix(DATA_PREFIX)
            .map(|payload| payload.trim().to_string())
    }
}

/// Lazy, finite, non-restartable stream of record payloads decoded from a byte stream
///
/// Dropping it drops the inner byte stream, which is how a relay session
/// cancels an in-flight upstream read.
pub struct PayloadStream<S> {
    inner: S,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    exhausted: bool,
    overflow: Option<RelayError>,
}

impl<S> PayloadStream<S>
where
    S: Stream<Item = Result<Bytes, RelayError>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            exhausted: false,
            overflow: None,
        }
    }
}

impl<S> Stream for PayloadStream<S>
where
    S: Stream<Item = Result<Bytes, RelayError>> + Unpin,
{
    type Item = Result<String, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(payload) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(payload)));
            }

            if this.exhausted {
                return Poll::Ready(this.overflow.take().map(Err));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.pending.extend(this.decoder.feed(&bytes));
                    if this.decoder.pending_bytes() > MAX_PENDING_BYTES {
                        this.exhausted = true;
                        this.overflow = Some(RelayError::Network(format!(
                            "Upstream line exceeded {MAX_PENDING_BYTES} bytes without a newline"
                        )));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.exhausted = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.exhausted = true;
                    this.pending.extend(this.decoder.finish());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
