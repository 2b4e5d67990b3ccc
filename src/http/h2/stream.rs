//! HTTP/2 stream state
//!
//! This module implements the stream half of RFC 9113 Section 5.1: one
//! request/response exchange, its header queue, its terminal error, and the
//! single lock both halves synchronize on.
//!
//! Every method that ends up calling the [`Connection`] follows the same
//! shape: lock, mutate, capture what must be done, unlock, then act. Debug
//! builds assert at each of those boundaries that the calling thread does
//! not hold the stream lock.

use super::connection::Connection;
use super::deadline::{Deadline, DeadlineGuard};
use super::error::{Error, ErrorCode, Result};
use super::flow_control::{ByteWindow, ReceiveCredit};
use super::settings::StreamSettings;
use super::sink::{FramingSink, SinkBuffers};
use super::source::{FramingSource, SourceBuffers};
use crate::http::Headers;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Stream ID type
pub type StreamId = u32;

/// Where a stream is in its lifecycle (RFC 9113 Section 5.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLifecycle {
    /// Both halves can still move data
    Open,
    /// Our write half is finished or closed
    HalfClosedLocal,
    /// The peer finished, or we abandoned the read half
    HalfClosedRemote,
    /// Both halves are done
    Closed,
    /// Terminated by a reset; absorbing
    Errored(ErrorCode),
}

/// Mutable core of a stream, guarded by the stream lock
#[derive(Debug)]
pub struct StreamState {
    /// Terminal reason; never changes once set
    pub(crate) error_code: Option<ErrorCode>,
    pub(crate) error_cause: Option<Arc<io::Error>>,
    /// Received header blocks awaiting `take_headers`
    pub(crate) headers_queue: VecDeque<Headers>,
    pub(crate) has_response_headers: bool,
    pub(crate) read_credit: ReceiveCredit,
    pub(crate) write_window: ByteWindow,
    pub(crate) source: SourceBuffers,
    pub(crate) sink: SinkBuffers,
    pub(crate) read_deadline: DeadlineGuard,
    pub(crate) write_deadline: DeadlineGuard,
}

impl StreamState {
    /// Whether the stream still has work to do
    ///
    /// A stream whose halves are both done stays open until a response
    /// header block has been seen.
    pub fn is_open(&self) -> bool {
        if self.error_code.is_some() {
            return false;
        }
        let read_done = self.source.finished || self.source.closed;
        let write_done = self.sink.finished || self.sink.closed;
        !(read_done && write_done && self.has_response_headers)
    }

    pub fn lifecycle(&self) -> StreamLifecycle {
        if let Some(code) = self.error_code {
            return StreamLifecycle::Errored(code);
        }
        let read_done = self.source.finished || self.source.closed;
        let write_done = self.sink.finished || self.sink.closed;
        match (read_done, write_done) {
            (false, false) => StreamLifecycle::Open,
            (false, true) => StreamLifecycle::HalfClosedLocal,
            (true, false) => StreamLifecycle::HalfClosedRemote,
            (true, true) => StreamLifecycle::Closed,
        }
    }

    /// Reconstruct the reset error, if the stream has one
    pub(crate) fn reset_error(&self, stream_id: StreamId) -> Option<Error> {
        self.error_code.map(|code| Error::StreamReset {
            stream_id,
            code,
            cause: self.error_cause.clone(),
        })
    }

    pub(crate) fn check_out_not_closed(&self, stream_id: StreamId) -> Result<()> {
        if self.sink.closed {
            return Err(Error::StreamClosed(stream_id));
        }
        if self.sink.finished {
            return Err(Error::StreamFinished(stream_id));
        }
        match self.reset_error(stream_id) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

}

#[cfg(debug_assertions)]
mod lock_tracking {
    use std::cell::RefCell;

    thread_local! {
        static HELD: RefCell<Vec<usize>> = RefCell::new(Vec::new());
    }

    pub(super) fn is_held(key: usize) -> bool {
        HELD.with(|held| held.borrow().contains(&key))
    }

    pub(super) fn acquire(key: usize) {
        HELD.with(|held| held.borrow_mut().push(key));
    }

    pub(super) fn release(key: usize) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|k| *k == key) {
                held.swap_remove(pos);
            }
        });
    }
}

/// Locked view of a stream's state
pub(crate) struct StateGuard<'a> {
    guard: MutexGuard<'a, StreamState>,
    #[cfg(debug_assertions)]
    key: usize,
}

impl Deref for StateGuard<'_> {
    type Target = StreamState;

    fn deref(&self) -> &StreamState {
        &self.guard
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut StreamState {
        &mut self.guard
    }
}

#[cfg(debug_assertions)]
impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        lock_tracking::release(self.key);
    }
}

/// HTTP/2 stream
///
/// Owns the state of both halves. The read half is reached through
/// [`Stream::source`], the write half through [`Stream::sink`]; both are
/// borrowed handles that synchronize on this stream's lock.
pub struct Stream<C> {
    id: StreamId,
    connection: Arc<C>,
    state: Mutex<StreamState>,
    io: Condvar,
    emit_buffer_size: usize,
}

impl<C: Connection> Stream<C> {
    /// Create a stream bound to `connection`
    ///
    /// Window sizes are read from the connection once, here. A stream we
    /// initiate starts without headers; a stream the peer initiated starts
    /// with its request headers queued.
    pub fn new(
        id: StreamId,
        connection: Arc<C>,
        out_finished: bool,
        in_finished: bool,
        headers: Option<Headers>,
        settings: &StreamSettings,
    ) -> Result<Self> {
        let locally_initiated = initiated_locally(id, connection.is_client());
        let mut headers_queue = VecDeque::new();
        match headers {
            Some(_) if locally_initiated => {
                return Err(Error::IllegalState(
                    "locally-initiated streams shouldn't have headers yet".to_string(),
                ));
            }
            Some(headers) => headers_queue.push_back(headers),
            None if !locally_initiated => {
                return Err(Error::IllegalState(
                    "remotely-initiated streams should have headers".to_string(),
                ));
            }
            None => {}
        }

        let local_window = connection.local_read_window_size();
        let state = StreamState {
            error_code: None,
            error_cause: None,
            headers_queue,
            has_response_headers: false,
            read_credit: ReceiveCredit::new(local_window, settings.window_update_divisor),
            write_window: ByteWindow::new(connection.peer_write_window_size()),
            source: SourceBuffers::new(local_window, in_finished),
            sink: SinkBuffers::new(out_finished),
            read_deadline: DeadlineGuard::new(settings.read_timeout),
            write_deadline: DeadlineGuard::new(settings.write_timeout),
        };

        Ok(Stream {
            id,
            connection,
            state: Mutex::new(state),
            io: Condvar::new(),
            emit_buffer_size: settings.emit_buffer_size,
        })
    }

    /// Get stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Whether this side opened the stream
    pub fn is_locally_initiated(&self) -> bool {
        initiated_locally(self.id, self.connection.is_client())
    }

    /// Whether the stream still has work to do; see [`StreamState::is_open`]
    pub fn is_open(&self) -> bool {
        self.lock().is_open()
    }

    pub fn lifecycle(&self) -> StreamLifecycle {
        self.lock().lifecycle()
    }

    /// Terminal error code, if the stream was reset
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.lock().error_code
    }

    /// Snapshot of the read-side counters (delivered / acknowledged)
    pub fn read_window(&self) -> ByteWindow {
        *self.lock().read_credit.window()
    }

    /// Snapshot of the write-side counters (sent / peer maximum)
    pub fn write_window(&self) -> ByteWindow {
        self.lock().write_window
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.lock().read_deadline.timeout()
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.lock().read_deadline.set_timeout(timeout);
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.lock().write_deadline.timeout()
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        self.lock().write_deadline.set_timeout(timeout);
    }

    /// The read half
    pub fn source(&self) -> FramingSource<'_, C> {
        FramingSource::new(self)
    }

    /// The write half
    ///
    /// A stream the peer opened can only be written after replying with
    /// [`Stream::write_headers`].
    pub fn sink(&self) -> Result<FramingSink<'_, C>> {
        let locally_initiated = self.is_locally_initiated();
        let state = self.lock();
        if !state.has_response_headers && !locally_initiated {
            return Err(Error::IllegalState(
                "reply before requesting the sink".to_string(),
            ));
        }
        Ok(FramingSink::new(self))
    }

    /// Block until the next header block arrives and remove it from the queue
    ///
    /// Queued headers are returned even after the stream was reset.
    pub fn take_headers(&self) -> Result<Headers> {
        self.assert_not_locked();
        let mut state = self.lock();
        let deadline = state.read_deadline.enter();
        let mut timed_out = false;
        while state.headers_queue.is_empty() && state.error_code.is_none() {
            if deadline.is_expired() {
                timed_out = true;
                break;
            }
            self.wait_for_io(&mut state, deadline);
        }

        if let Some(headers) = state.headers_queue.pop_front() {
            return Ok(headers);
        }
        if timed_out {
            drop(state);
            return Err(self.deadline_expired());
        }
        Err(state.reset_error(self.id).unwrap_or_else(|| {
            Error::IllegalState("no headers and no error".to_string())
        }))
    }

    /// Trailers received after the body
    ///
    /// Only available once the peer finished the stream and every body byte
    /// has been read; empty if the peer sent none.
    pub fn trailers(&self) -> Result<Headers> {
        let state = self.lock();
        if state.source.finished && state.source.is_drained() {
            return Ok(state.source.trailers.clone().unwrap_or_default());
        }
        if let Some(err) = state.reset_error(self.id) {
            return Err(err);
        }
        Err(Error::IllegalState(
            "too early; can't read the trailers yet".to_string(),
        ))
    }

    /// Send a header block on this stream
    ///
    /// With `out_finished` the header block carries END_STREAM and the write
    /// half is finished.
    pub fn write_headers(&self, headers: &Headers, out_finished: bool, flush: bool) -> Result<()> {
        self.assert_not_locked();
        {
            let mut state = self.lock();
            state.has_response_headers = true;
            if out_finished {
                state.sink.finished = true;
            }
            self.notify_all();
        }
        self.connection.write_headers(self.id, out_finished, headers)?;
        if flush {
            self.connection.flush()?;
        }
        Ok(())
    }

    /// Queue trailers to be sent when the write half closes
    pub fn enqueue_trailers(&self, trailers: Headers) -> Result<()> {
        let mut state = self.lock();
        if state.sink.finished {
            return Err(Error::IllegalState("already finished".to_string()));
        }
        if trailers.is_empty() {
            return Err(Error::IllegalState("trailers must not be empty".to_string()));
        }
        state.sink.trailers = Some(trailers);
        Ok(())
    }

    /// Reset the stream and tell the peer immediately
    pub fn close(&self, code: ErrorCode, cause: Option<io::Error>) -> Result<()> {
        if !self.close_internal(code, cause) {
            return Ok(());
        }
        self.connection.write_stream_reset(self.id, code)
    }

    /// Reset the stream and tell the peer when the connection gets to it
    pub fn close_later(&self, code: ErrorCode) {
        if !self.close_internal(code, None) {
            return;
        }
        self.connection.write_stream_reset_async(self.id, code);
    }

    /// Record the terminal error; false if there was nothing to close
    fn close_internal(&self, code: ErrorCode, cause: Option<io::Error>) -> bool {
        self.assert_not_locked();
        {
            let mut state = self.lock();
            if state.error_code.is_some() {
                return false;
            }
            if state.source.finished && state.sink.finished {
                return false;
            }
            state.error_code = Some(code);
            state.error_cause = cause.map(Arc::new);
            self.notify_all();
        }
        debug!(stream_id = self.id, %code, "stream closed with error");
        self.connection.remove_stream(self.id);
        true
    }

    /// Deliver a DATA payload from the peer
    pub fn receive_data(&self, data: &[u8]) -> Result<()> {
        self.assert_not_locked();
        self.source().receive_data(data)
    }

    /// Deliver a header block from the peer
    ///
    /// The first block (and any block that does not end the stream) is
    /// queued for [`Stream::take_headers`]; a block ending the stream after
    /// the response headers is kept as trailers.
    pub fn receive_headers(&self, headers: Headers, in_finished: bool) {
        self.assert_not_locked();
        let open = {
            let mut state = self.lock();
            if !state.has_response_headers || !in_finished {
                if !headers.is_informational() {
                    state.has_response_headers = true;
                }
                state.headers_queue.push_back(headers);
            } else {
                state.source.trailers = Some(headers);
            }
            if in_finished {
                state.source.finished = true;
            }
            let open = state.is_open();
            self.notify_all();
            open
        };
        if !open {
            self.connection.remove_stream(self.id);
        }
    }

    /// The peer ended the stream on a DATA frame
    pub fn receive_end_of_stream(&self) {
        self.assert_not_locked();
        let open = {
            let mut state = self.lock();
            state.source.finished = true;
            let open = state.is_open();
            self.notify_all();
            open
        };
        if !open {
            self.connection.remove_stream(self.id);
        }
    }

    /// The peer reset the stream
    pub fn receive_rst_stream(&self, code: ErrorCode) {
        let mut state = self.lock();
        if state.error_code.is_none() {
            debug!(stream_id = self.id, %code, "stream reset by peer");
            state.error_code = Some(code);
            self.notify_all();
        }
    }

    /// Credit from a WINDOW_UPDATE frame
    pub fn add_bytes_to_write_window(&self, delta: u64) {
        let mut state = self.lock();
        state.write_window.extend(delta);
        trace!(
            stream_id = self.id,
            delta,
            maximum = state.write_window.maximum(),
            "write window extended"
        );
        if delta > 0 {
            self.notify_all();
        }
    }

    /// Reconcile after either half closed
    ///
    /// A read half abandoned before the peer finished, with the write half
    /// done, is cancelled towards the peer. Otherwise a stream that is no
    /// longer open is only dropped from the connection's table.
    pub fn cancel_stream_if_necessary(&self) -> Result<()> {
        self.assert_not_locked();
        let (cancel, open) = {
            let state = self.lock();
            let cancel = !state.source.finished
                && state.source.closed
                && (state.sink.finished || state.sink.closed);
            (cancel, state.is_open())
        };
        if cancel {
            self.close(ErrorCode::Cancel, None)
        } else {
            if !open {
                debug!(stream_id = self.id, "stream done, removing");
                self.connection.remove_stream(self.id);
            }
            Ok(())
        }
    }

    /// Turn an expired deadline into a cancel plus a liveness hint
    pub(crate) fn deadline_expired(&self) -> Error {
        debug!(stream_id = self.id, "stream deadline expired");
        self.close_later(ErrorCode::Cancel);
        self.connection.schedule_degraded_liveness_probe();
        Error::Timeout
    }

    pub(crate) fn emit_buffer_size(&self) -> usize {
        self.emit_buffer_size
    }

    pub(crate) fn lock(&self) -> StateGuard<'_> {
        #[cfg(debug_assertions)]
        let key = self.lock_key();
        #[cfg(debug_assertions)]
        assert!(
            !lock_tracking::is_held(key),
            "stream {} lock is not reentrant",
            self.id
        );

        let guard = self.state.lock();
        #[cfg(debug_assertions)]
        lock_tracking::acquire(key);

        StateGuard {
            guard,
            #[cfg(debug_assertions)]
            key,
        }
    }

    /// Wait for any state change, bounded by the caller's deadline
    ///
    /// Wake-ups carry no reason; callers re-check their own predicate.
    pub(crate) fn wait_for_io(&self, state: &mut StateGuard<'_>, deadline: Deadline) {
        match deadline.expires_at() {
            Some(at) => {
                let _ = self.io.wait_until(&mut state.guard, at);
            }
            None => self.io.wait(&mut state.guard),
        }
    }

    pub(crate) fn notify_all(&self) {
        self.io.notify_all();
    }

    /// Panic in debug builds if this thread holds the stream lock
    pub(crate) fn assert_not_locked(&self) {
        #[cfg(debug_assertions)]
        assert!(
            !lock_tracking::is_held(self.lock_key()),
            "thread {:?} must not hold the lock of stream {}",
            std::thread::current().name(),
            self.id
        );
    }

    #[cfg(debug_assertions)]
    fn lock_key(&self) -> usize {
        &self.state as *const Mutex<StreamState> as usize
    }
}

impl<C: Connection> fmt::Debug for Stream<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("emit_buffer_size", &self.emit_buffer_size)
            .finish_non_exhaustive()
    }
}

fn initiated_locally(id: StreamId, is_client: bool) -> bool {
    let client_stream = id & 1 == 1;
    client_stream == is_client
}
