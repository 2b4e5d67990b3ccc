//! The connection a stream writes through
//!
//! A stream does not own a transport. Every frame it sends, every credit it
//! grants and every cleanup it needs goes through this trait, implemented by
//! whatever multiplexes the streams onto one connection.
//!
//! # Locking
//!
//! Streams call these methods only after releasing their own lock. An
//! implementation may therefore lock itself and call back into streams
//! (`receive_data`, `receive_rst_stream`, ...) without risking a lock-order
//! inversion, but it must not hold its own lock while a stream method blocks.

use super::error::{ErrorCode, Result};
use super::stream::StreamId;
use crate::http::Headers;
use bytes::Bytes;

/// Frame-level operations a stream needs from its connection
pub trait Connection: Send + Sync {
    /// Whether this side of the connection is the client
    ///
    /// Clients initiate odd-numbered streams, servers even-numbered ones.
    fn is_client(&self) -> bool;

    /// Initial send window granted by the peer for each new stream
    fn peer_write_window_size(&self) -> u64;

    /// Initial receive window this side advertises for each new stream
    fn local_read_window_size(&self) -> u64;

    /// Emit one DATA frame; concurrent calls from different streams are
    /// serialized by the connection
    fn write_data(&self, stream_id: StreamId, end_stream: bool, data: Bytes) -> Result<()>;

    /// Emit one header block (HEADERS plus any CONTINUATION frames)
    fn write_headers(&self, stream_id: StreamId, end_stream: bool, headers: &Headers) -> Result<()>;

    /// Emit RST_STREAM now
    fn write_stream_reset(&self, stream_id: StreamId, code: ErrorCode) -> Result<()>;

    /// Emit RST_STREAM on a best-effort, deferred basis
    fn write_stream_reset_async(&self, stream_id: StreamId, code: ErrorCode);

    /// Grant the peer more stream-level credit, deferred
    fn write_window_update_async(&self, stream_id: StreamId, delta: u64);

    /// Forget a stream that has terminated
    fn remove_stream(&self, stream_id: StreamId);

    /// Account consumed or discarded bytes against the connection-level
    /// receive window
    fn update_connection_flow_control(&self, byte_count: u64);

    /// Push buffered frames to the transport
    fn flush(&self) -> Result<()>;

    /// A stream deadline fired; the link may be degraded
    fn schedule_degraded_liveness_probe(&self);
}
