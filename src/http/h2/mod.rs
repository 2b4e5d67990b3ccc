//! HTTP/2 stream engine
//!
//! This module implements the single-stream half of HTTP/2 (RFC 9113
//! Sections 5.1 and 5.2): the stream state machine, its read and write
//! halves, and the flow-control bookkeeping in both directions.
//!
//! # Architecture
//!
//! A [`Stream`] owns one [`StreamState`] behind a single mutex plus one
//! condition variable shared by both halves:
//!
//! - **FramingSource**: the read half. The connection pushes DATA payloads in
//!   with `receive`, callers pull them out with a blocking read.
//! - **FramingSink**: the write half. Bytes are buffered and sliced into DATA
//!   frames no larger than the peer's remaining window.
//! - **ByteWindow**: total/maximum counter pair used for both directions.
//! - **DeadlineGuard**: per-direction timeout bounding every blocking wait.
//!
//! Everything a stream sends goes through the [`Connection`] trait. A stream
//! never calls into its connection while holding its own lock; the
//! connection is free to lock itself and then call back into streams.
//!
//! # Example
//!
//! ```no_run
//! use h2stream::http::Headers;
//! use h2stream::http::h2::{FramedConnectionBuilder, StreamSettingsBuilder};
//! use bytes::BytesMut;
//! use std::time::Duration;
//!
//! # fn example() -> h2stream::http::h2::Result<()> {
//! let settings = StreamSettingsBuilder::new()
//!     .read_timeout(Duration::from_secs(10))
//!     .build()?;
//! let connection = FramedConnectionBuilder::new()
//!     .client(true)
//!     .stream_settings(settings)
//!     .build(Vec::new())?;
//!
//! let request = Headers::new()
//!     .with(":method", "GET")
//!     .with(":path", "/");
//! let stream = connection.new_stream(&request, true)?;
//!
//! // Response frames are fed in by the connection's reader with
//! // `connection.receive_frame(..)`.
//! let response = stream.take_headers()?;
//! println!("status: {:?}", response.status());
//!
//! let mut body = BytesMut::new();
//! while let Some(n) = stream.source().read_into(&mut body, 8192)? {
//!     println!("read {} bytes", n);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod deadline;
pub mod error;
pub mod flow_control;
pub mod framed;
pub mod frames;
pub mod settings;
pub mod sink;
pub mod source;
pub mod stream;

pub use connection::Connection;
pub use deadline::{Deadline, DeadlineGuard};
pub use error::{Error, ErrorCode, Result};
pub use flow_control::ByteWindow;
pub use framed::{FramedConnection, FramedConnectionBuilder};
pub use frames::{Frame, FrameFlags, FrameType};
pub use settings::{StreamSettings, StreamSettingsBuilder};
pub use sink::FramingSink;
pub use source::FramingSource;
pub use stream::{Stream, StreamId, StreamLifecycle, StreamState};

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Largest frame payload a peer may advertise (2^24 - 1)
pub const MAX_FRAME_SIZE_LIMIT: u32 = 0x00FF_FFFF;

/// Largest flow-control window (2^31 - 1)
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// Number of buffered bytes that triggers an eager DATA frame
pub const EMIT_BUFFER_SIZE: usize = 16384;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
