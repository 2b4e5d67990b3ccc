//! Read half of a stream
//!
//! Bytes from the peer arrive on the connection's reader thread through
//! [`FramingSource::receive`] and are consumed by the application through
//! [`FramingSource::read_into`] (or [`std::io::Read`]). Incoming bytes are
//! staged in a receive buffer and then promoted to the read buffer under the
//! stream lock, or dropped if the application already abandoned the read
//! half.

use super::connection::Connection;
use super::error::{Error, ErrorCode, Result};
use super::stream::Stream;
use crate::http::Headers;
use bytes::BytesMut;
use std::io::{self, Read};
use tracing::{trace, warn};

/// Largest chunk pulled from the transport per lock acquisition
const RECEIVE_CHUNK_SIZE: usize = 16384;

/// Read-side buffers, guarded by the stream lock
#[derive(Debug)]
pub(crate) struct SourceBuffers {
    /// Local receive window; buffered bytes may never exceed it
    pub(crate) max_byte_count: u64,
    /// The peer sent END_STREAM
    pub(crate) finished: bool,
    /// The application closed the read half
    pub(crate) closed: bool,
    pub(crate) receive_buffer: BytesMut,
    pub(crate) read_buffer: BytesMut,
    pub(crate) trailers: Option<Headers>,
}

/// Outcome of moving staged bytes into the read buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Promotion {
    /// Readers must be woken if the read buffer went from empty to non-empty
    Promoted { became_readable: bool },
    /// The read half was closed; the bytes were dropped
    Discarded(u64),
}

impl SourceBuffers {
    pub(crate) fn new(max_byte_count: u64, finished: bool) -> Self {
        SourceBuffers {
            max_byte_count,
            finished,
            closed: false,
            receive_buffer: BytesMut::new(),
            read_buffer: BytesMut::new(),
            trailers: None,
        }
    }

    pub(crate) fn buffered(&self) -> u64 {
        (self.receive_buffer.len() + self.read_buffer.len()) as u64
    }

    /// Whether `incoming` more bytes would exceed the receive window
    pub(crate) fn would_overflow(&self, incoming: u64) -> bool {
        self.buffered().saturating_add(incoming) > self.max_byte_count
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.receive_buffer.is_empty() && self.read_buffer.is_empty()
    }

    pub(crate) fn stage(&mut self, chunk: &[u8]) {
        self.receive_buffer.extend_from_slice(chunk);
    }

    pub(crate) fn promote(&mut self) -> Promotion {
        if self.closed {
            let discarded = self.receive_buffer.len() as u64;
            self.receive_buffer.clear();
            return Promotion::Discarded(discarded);
        }
        let was_empty = self.read_buffer.is_empty();
        let staged = self.receive_buffer.split();
        self.read_buffer.unsplit(staged);
        Promotion::Promoted {
            became_readable: was_empty && !self.read_buffer.is_empty(),
        }
    }

    /// Drop everything not yet read, returning the byte count
    pub(crate) fn discard_unread(&mut self) -> u64 {
        let discarded = self.buffered();
        self.receive_buffer.clear();
        self.read_buffer.clear();
        discarded
    }
}

enum ReadOutcome {
    Delivered { count: usize, window_update: Option<u64> },
    EndOfStream,
    Failed(Error),
    TimedOut,
}

/// Handle on the read half of a [`Stream`]
pub struct FramingSource<'a, C> {
    stream: &'a Stream<C>,
}

impl<'a, C: Connection> FramingSource<'a, C> {
    pub(crate) fn new(stream: &'a Stream<C>) -> Self {
        FramingSource { stream }
    }

    /// Bytes received and not yet read
    pub fn buffered_len(&self) -> usize {
        let state = self.stream.lock();
        state.source.buffered() as usize
    }

    /// Whether the peer ended the stream
    pub fn is_finished(&self) -> bool {
        self.stream.lock().source.finished
    }

    pub fn is_closed(&self) -> bool {
        self.stream.lock().source.closed
    }

    /// Pull `byte_count` bytes of DATA payload from `source`
    ///
    /// Called by the connection's reader. Bytes beyond the local receive
    /// window are consumed from `source`, credited back to the connection
    /// and answered with a FLOW_CONTROL_ERROR reset of this stream. Bytes
    /// arriving after END_STREAM are consumed and credited silently.
    pub fn receive<R: Read>(&self, source: &mut R, byte_count: usize) -> Result<()> {
        let stream = self.stream;
        stream.assert_not_locked();

        let mut remaining = byte_count as u64;
        while remaining > 0 {
            let (finished, flow_control_error) = {
                let state = stream.lock();
                (state.source.finished, state.source.would_overflow(remaining))
            };

            if flow_control_error {
                skip(source, remaining)?;
                warn!(
                    stream_id = stream.id(),
                    discarded = remaining,
                    "peer overflowed stream receive window"
                );
                stream.connection().update_connection_flow_control(remaining);
                stream.close_later(ErrorCode::FlowControlError);
                return Ok(());
            }

            if finished {
                skip(source, remaining)?;
                trace!(
                    stream_id = stream.id(),
                    discarded = remaining,
                    "data after end of stream"
                );
                stream.connection().update_connection_flow_control(remaining);
                return Ok(());
            }

            let chunk = read_chunk(source, remaining)?;
            remaining -= chunk.len() as u64;

            let discarded = {
                let mut state = stream.lock();
                state.source.stage(&chunk);
                match state.source.promote() {
                    Promotion::Discarded(count) => count,
                    Promotion::Promoted { became_readable } => {
                        if became_readable {
                            stream.notify_all();
                        }
                        0
                    }
                }
            };
            if discarded > 0 {
                stream.connection().update_connection_flow_control(discarded);
            }
        }
        Ok(())
    }

    /// Deliver an in-memory DATA payload
    pub fn receive_data(&self, data: &[u8]) -> Result<()> {
        let mut reader = data;
        self.receive(&mut reader, data.len())
    }

    /// Move up to `max_bytes` buffered bytes into `sink`
    ///
    /// Blocks until data, end of stream, a reset, or the read deadline.
    /// Returns `Ok(None)` at end of stream. Bytes received before a reset
    /// are still delivered; the reset is reported once they are drained.
    pub fn read_into(&self, sink: &mut BytesMut, max_bytes: usize) -> Result<Option<usize>> {
        let stream = self.stream;
        stream.assert_not_locked();
        if max_bytes == 0 {
            return Ok(Some(0));
        }

        let outcome = {
            let mut state = stream.lock();
            let deadline = state.read_deadline.enter();
            loop {
                let error = state.reset_error(stream.id());

                if state.source.closed {
                    break ReadOutcome::Failed(Error::StreamClosed(stream.id()));
                }

                if !state.source.read_buffer.is_empty() {
                    let count = max_bytes.min(state.source.read_buffer.len());
                    let chunk = state.source.read_buffer.split_to(count);
                    sink.extend_from_slice(&chunk);
                    state.read_credit.consume(count as u64);
                    // An errored stream never grants the peer more credit
                    let window_update = match error {
                        None => state.read_credit.take_update(),
                        Some(_) => None,
                    };
                    break ReadOutcome::Delivered {
                        count,
                        window_update,
                    };
                }

                if let Some(err) = error {
                    break ReadOutcome::Failed(err);
                }
                if state.source.finished {
                    break ReadOutcome::EndOfStream;
                }
                if deadline.is_expired() {
                    break ReadOutcome::TimedOut;
                }
                stream.wait_for_io(&mut state, deadline);
            }
        };

        match outcome {
            ReadOutcome::Delivered {
                count,
                window_update,
            } => {
                if let Some(delta) = window_update {
                    trace!(stream_id = stream.id(), delta, "acknowledging consumed bytes");
                    stream.connection().write_window_update_async(stream.id(), delta);
                }
                stream
                    .connection()
                    .update_connection_flow_control(count as u64);
                Ok(Some(count))
            }
            ReadOutcome::EndOfStream => Ok(None),
            ReadOutcome::Failed(err) => Err(err),
            ReadOutcome::TimedOut => Err(stream.deadline_expired()),
        }
    }

    /// Abandon the read half
    ///
    /// Unread bytes are discarded and credited back to the connection. If
    /// the peer is still sending and our write half is done, the stream is
    /// cancelled. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let stream = self.stream;
        stream.assert_not_locked();

        let discarded = {
            let mut state = stream.lock();
            if state.source.closed {
                return Ok(());
            }
            state.source.closed = true;
            let discarded = state.source.discard_unread();
            stream.notify_all();
            discarded
        };
        if discarded > 0 {
            stream.connection().update_connection_flow_control(discarded);
        }
        stream.cancel_stream_if_necessary()
    }
}

impl<C: Connection> Read for FramingSource<'_, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut chunk = BytesMut::with_capacity(buf.len());
        match self.read_into(&mut chunk, buf.len())? {
            Some(count) => {
                buf[..count].copy_from_slice(&chunk[..count]);
                Ok(count)
            }
            None => Ok(0),
        }
    }
}

fn read_chunk<R: Read>(source: &mut R, remaining: u64) -> Result<Vec<u8>> {
    let len = remaining.min(RECEIVE_CHUNK_SIZE as u64) as usize;
    let mut chunk = vec![0u8; len];
    loop {
        match source.read(&mut chunk) {
            Ok(0) => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "DATA payload truncated",
                )));
            }
            Ok(n) => {
                chunk.truncate(n);
                return Ok(chunk);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn skip<R: Read>(source: &mut R, byte_count: u64) -> Result<()> {
    let skipped = io::copy(&mut source.by_ref().take(byte_count), &mut io::sink())?;
    if skipped < byte_count {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "DATA payload truncated",
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote_moves_staged_bytes() {
        let mut buffers = SourceBuffers::new(100, false);
        buffers.stage(b"hello");
        assert_eq!(
            buffers.promote(),
            Promotion::Promoted {
                became_readable: true
            }
        );
        assert!(buffers.receive_buffer.is_empty());
        assert_eq!(&buffers.read_buffer[..], b"hello");

        buffers.stage(b" world");
        assert_eq!(
            buffers.promote(),
            Promotion::Promoted {
                became_readable: false
            }
        );
        assert_eq!(&buffers.read_buffer[..], b"hello world");
    }

    #[test]
    fn test_promote_discards_when_closed() {
        let mut buffers = SourceBuffers::new(100, false);
        buffers.closed = true;
        buffers.stage(b"abc");
        assert_eq!(buffers.promote(), Promotion::Discarded(3));
        assert!(buffers.is_drained());
    }

    #[test]
    fn test_overflow_check() {
        let mut buffers = SourceBuffers::new(10, false);
        assert!(!buffers.would_overflow(10));
        assert!(buffers.would_overflow(11));

        buffers.stage(b"12345");
        buffers.promote();
        assert!(!buffers.would_overflow(5));
        assert!(buffers.would_overflow(6));
    }

    #[test]
    fn test_discard_unread() {
        let mut buffers = SourceBuffers::new(100, false);
        buffers.stage(b"abcd");
        buffers.promote();
        buffers.stage(b"ef");
        assert_eq!(buffers.discard_unread(), 6);
        assert!(buffers.is_drained());
    }

    #[test]
    fn test_skip_and_read_chunk() {
        let data = [7u8; 40_000];
        let mut reader = &data[..];
        skip(&mut reader, 100).unwrap();
        assert_eq!(reader.len(), 39_900);

        let chunk = read_chunk(&mut reader, 39_900).unwrap();
        assert_eq!(chunk.len(), RECEIVE_CHUNK_SIZE);

        let mut short = &data[..4];
        assert!(skip(&mut short, 5).is_err());
    }
}
