//! Write half of a stream
//!
//! Application bytes are buffered and framed into DATA frames sized by the
//! peer's flow-control credit. A writer blocks while the write window is
//! exhausted and wakes up when a WINDOW_UPDATE, a reset, or a close changes
//! the stream state.

use super::connection::Connection;
use super::error::Result;
use super::stream::Stream;
use crate::http::Headers;
use bytes::{Bytes, BytesMut};
use std::io::{self, Write};
use tracing::trace;

/// Write-side buffers, guarded by the stream lock
#[derive(Debug)]
pub(crate) struct SinkBuffers {
    /// END_STREAM has been sent
    pub(crate) finished: bool,
    /// The application closed the write half
    pub(crate) closed: bool,
    pub(crate) send_buffer: BytesMut,
    /// Sent as a final header block on close
    pub(crate) trailers: Option<Headers>,
}

impl SinkBuffers {
    pub(crate) fn new(finished: bool) -> Self {
        SinkBuffers {
            finished,
            closed: false,
            send_buffer: BytesMut::new(),
            trailers: None,
        }
    }
}

/// Handle on the write half of a [`Stream`]
pub struct FramingSink<'a, C> {
    stream: &'a Stream<C>,
}

impl<'a, C: Connection> FramingSink<'a, C> {
    pub(crate) fn new(stream: &'a Stream<C>) -> Self {
        FramingSink { stream }
    }

    /// Bytes written but not yet framed
    pub fn buffered_len(&self) -> usize {
        self.stream.lock().sink.send_buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.stream.lock().sink.closed
    }

    /// Buffer `data`, emitting full frames as credit allows
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let stream = self.stream;
        stream.assert_not_locked();
        {
            let mut state = stream.lock();
            state.check_out_not_closed(stream.id())?;
            state.sink.send_buffer.extend_from_slice(data);
        }
        while self.buffered_len() >= stream.emit_buffer_size() {
            self.emit_frame(false)?;
        }
        Ok(())
    }

    /// Emit everything buffered and flush the connection
    pub fn flush(&self) -> Result<()> {
        let stream = self.stream;
        stream.assert_not_locked();
        stream.lock().check_out_not_closed(stream.id())?;
        while self.buffered_len() > 0 {
            self.emit_frame(false)?;
        }
        stream.connection().flush()
    }

    /// Finish the write half
    ///
    /// Sends remaining data with END_STREAM, or the queued trailers, or an
    /// empty END_STREAM frame. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let stream = self.stream;
        stream.assert_not_locked();

        let (out_finished, already_finished, trailers, has_data) = {
            let state = stream.lock();
            if state.sink.closed {
                return Ok(());
            }
            (
                state.error_code.is_none(),
                state.sink.finished,
                state.sink.trailers.clone(),
                !state.sink.send_buffer.is_empty(),
            )
        };

        if !already_finished {
            if let Some(trailers) = trailers {
                while self.buffered_len() > 0 {
                    self.emit_frame(false)?;
                }
                stream
                    .connection()
                    .write_headers(stream.id(), out_finished, &trailers)?;
            } else if has_data {
                while self.buffered_len() > 0 {
                    self.emit_frame(true)?;
                }
            } else if out_finished {
                stream
                    .connection()
                    .write_data(stream.id(), true, Bytes::new())?;
            }
        }

        {
            let mut state = stream.lock();
            state.sink.closed = true;
            stream.notify_all();
        }
        stream.connection().flush()?;
        stream.cancel_stream_if_necessary()
    }

    /// Emit one DATA frame of at most the available credit and at most one
    /// emission threshold's worth of bytes
    ///
    /// `last` marks the frame END_STREAM if it drains the buffer.
    fn emit_frame(&self, last: bool) -> Result<()> {
        let stream = self.stream;
        let (data, out_finished) = {
            let mut state = stream.lock();
            let deadline = state.write_deadline.enter();
            let mut timed_out = false;
            while state.write_window.is_exhausted()
                && !state.sink.finished
                && !state.sink.closed
                && state.error_code.is_none()
            {
                if deadline.is_expired() {
                    timed_out = true;
                    break;
                }
                stream.wait_for_io(&mut state, deadline);
            }
            if timed_out {
                drop(state);
                return Err(stream.deadline_expired());
            }

            state.check_out_not_closed(stream.id())?;
            let available = state.write_window.available();
            let buffered = state.sink.send_buffer.len() as u64;
            let to_write = available
                .min(buffered)
                .min(stream.emit_buffer_size() as u64);
            state.write_window.advance(to_write);

            let out_finished = last && to_write == buffered;
            let data = state.sink.send_buffer.split_to(to_write as usize).freeze();
            (data, out_finished)
        };

        trace!(
            stream_id = stream.id(),
            len = data.len(),
            end_stream = out_finished,
            "emitting DATA frame"
        );
        stream
            .connection()
            .write_data(stream.id(), out_finished, data)
    }
}

impl<C: Connection> Write for FramingSink<'_, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FramingSink::write(&*self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        FramingSink::flush(&*self)?;
        Ok(())
    }
}
