//! h2stream - HTTP/2 stream multiplexing and flow control
//!
//! This crate provides the per-stream half of an HTTP/2 implementation: a
//! blocking read half and write half sharing one lock, window-based
//! backpressure in both directions, and deadline-driven cancellation.

pub mod http;
