//! HTTP/2 error types
//!
//! This module defines the crate error type and the stream error codes
//! defined in RFC 9113 Section 7.

use std::fmt;
use std::io;
use std::sync::Arc;

/// HTTP/2 stream errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from the connection transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream was reset, locally or by the peer
    #[error("stream {stream_id} was reset: {code}")]
    StreamReset {
        stream_id: u32,
        code: ErrorCode,
        #[source]
        cause: Option<Arc<io::Error>>,
    },

    /// A read or write deadline expired
    #[error("timeout")]
    Timeout,

    /// The local half was already closed
    #[error("stream {0} closed")]
    StreamClosed(u32),

    /// The write half already sent END_STREAM
    #[error("stream {0} finished")]
    StreamFinished(u32),

    /// Operation not valid in the current stream state
    #[error("illegal stream state: {0}")]
    IllegalState(String),

    /// Protocol violation detected locally
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Header block could not be encoded or decoded
    #[error("compression error: {0}")]
    Compression(String),

    /// Invalid configuration value
    #[error("invalid settings value: {0}")]
    InvalidSettings(String),
}

impl Error {
    /// Error code carried by a reset, if this is one
    pub fn reset_code(&self) -> Option<ErrorCode> {
        match self {
            Error::StreamReset { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, err),
            Error::StreamClosed(_) | Error::StreamFinished(_) => {
                io::Error::new(io::ErrorKind::BrokenPipe, err)
            }
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// HTTP/2 error codes as defined in RFC 9113 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError,
    /// Protocol error detected
    ProtocolError,
    /// Implementation fault
    InternalError,
    /// Flow-control limits exceeded
    FlowControlError,
    /// Settings not acknowledged
    SettingsTimeout,
    /// Frame received for closed stream
    StreamClosed,
    /// Frame size incorrect
    FrameSizeError,
    /// Stream not processed
    RefusedStream,
    /// Stream cancelled
    Cancel,
    /// Compression state not updated
    CompressionError,
    /// TCP connection error for CONNECT method
    ConnectError,
    /// Processing capacity exceeded
    EnhanceYourCalm,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity,
    /// Use HTTP/1.1 for the request
    Http11Required,
    /// Code sent by the peer that this crate does not know
    Other(u32),
}

impl ErrorCode {
    /// Wire value of the code
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::NoError => 0x0,
            ErrorCode::ProtocolError => 0x1,
            ErrorCode::InternalError => 0x2,
            ErrorCode::FlowControlError => 0x3,
            ErrorCode::SettingsTimeout => 0x4,
            ErrorCode::StreamClosed => 0x5,
            ErrorCode::FrameSizeError => 0x6,
            ErrorCode::RefusedStream => 0x7,
            ErrorCode::Cancel => 0x8,
            ErrorCode::CompressionError => 0x9,
            ErrorCode::ConnectError => 0xa,
            ErrorCode::EnhanceYourCalm => 0xb,
            ErrorCode::InadequateSecurity => 0xc,
            ErrorCode::Http11Required => 0xd,
            ErrorCode::Other(code) => code,
        }
    }

    /// Known error code for a wire value
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xa => Some(ErrorCode::ConnectError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            0xc => Some(ErrorCode::InadequateSecurity),
            0xd => Some(ErrorCode::Http11Required),
            _ => None,
        }
    }

    /// Error code for a wire value, passing unknown codes through
    pub fn from_wire(code: u32) -> Self {
        Self::from_u32(code).unwrap_or(ErrorCode::Other(code))
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
            ErrorCode::Other(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;
