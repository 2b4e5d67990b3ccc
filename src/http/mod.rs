//! HTTP building blocks for h2stream
//!
//! This module holds the header block type shared by every layer and the
//! HTTP/2 stream engine itself.
//!
//! # Architecture
//!
//! The stream engine never talks to a socket directly. Every stream is bound
//! to a [`h2::Connection`] collaborator that serializes frames onto the wire:
//!
//! - `Connection` trait defines the frame-level operations a stream needs
//! - `Stream` owns the shared state of one exchange and both of its halves
//! - `FramedConnection` is a ready-made collaborator over any `io::Write`
//!
//! # Examples
//!
//! ```no_run
//! use h2stream::http::Headers;
//! use h2stream::http::h2::FramedConnectionBuilder;
//! use std::io::Write;
//!
//! # fn example() -> h2stream::http::h2::Result<()> {
//! let connection = FramedConnectionBuilder::new().client(true).build(Vec::new())?;
//!
//! let mut request = Headers::new();
//! request.insert(":method", "POST");
//! request.insert(":path", "/upload");
//! let stream = connection.new_stream(&request, false)?;
//!
//! let mut sink = stream.sink()?;
//! sink.write_all(b"hello")?;
//! sink.close()?;
//! # Ok(())
//! # }
//! ```

pub mod h2;
pub mod headers;

pub use headers::Headers;
