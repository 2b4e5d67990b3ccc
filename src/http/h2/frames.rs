//! HTTP/2 frame types and utilities
//!
//! This module defines the frame types specified in RFC 9113 Section 6 that
//! carry stream traffic. Connection management frames are recognized by
//! type so the reader can skip them.

use super::error::ErrorCode;
use super::stream::StreamId;
use bytes::Bytes;
use std::fmt;

/// HTTP/2 frame types (RFC 9113 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// DATA frame (0x0) - Conveys arbitrary, variable-length sequences of octets
    Data = 0x0,
    /// HEADERS frame (0x1) - Opens a stream and carries header block fragment
    Headers = 0x1,
    /// PRIORITY frame (0x2)
    Priority = 0x2,
    /// RST_STREAM frame (0x3) - Allows immediate termination of a stream
    RstStream = 0x3,
    /// SETTINGS frame (0x4)
    Settings = 0x4,
    /// PUSH_PROMISE frame (0x5)
    PushPromise = 0x5,
    /// PING frame (0x6)
    Ping = 0x6,
    /// GOAWAY frame (0x7)
    Goaway = 0x7,
    /// WINDOW_UPDATE frame (0x8) - Implements flow control
    WindowUpdate = 0x8,
    /// CONTINUATION frame (0x9) - Continues sequence of header block fragments
    Continuation = 0x9,
}

impl FrameType {
    /// Convert frame type to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create frame type from u8
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }

    /// Get frame type name
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// HTTP/2 frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Create empty flags
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Check if a flag is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// END_STREAM flag (0x1)
    pub const END_STREAM: u8 = 0x1;

    /// END_HEADERS flag (0x4)
    pub const END_HEADERS: u8 = 0x4;

    /// PADDED flag (0x8)
    pub const PADDED: u8 = 0x8;

    /// PRIORITY flag (0x20)
    pub const PRIORITY: u8 = 0x20;

    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// Generic HTTP/2 frame as read off the wire
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame type
    pub frame_type: FrameType,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID
    pub stream_id: StreamId,
    /// Frame payload, padding included
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(frame_type: FrameType, flags: FrameFlags, stream_id: StreamId, payload: Bytes) -> Self {
        Frame {
            frame_type,
            flags,
            stream_id,
            payload,
        }
    }

    /// Get payload size
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// DATA frame (RFC 9113 Section 6.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Data payload, padding stripped
    pub data: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// Bytes of flow-controlled padding (pad length octet included)
    pub padding: usize,
}

impl DataFrame {
    /// Create a new DATA frame
    pub fn new(stream_id: StreamId, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
            padding: 0,
        }
    }

    /// Bytes counted against flow control
    pub fn flow_controlled_len(&self) -> usize {
        self.data.len() + self.padding
    }
}

/// HEADERS frame (RFC 9113 Section 6.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// END_HEADERS flag
    pub end_headers: bool,
}

impl HeadersFrame {
    /// Create a new HEADERS frame
    pub fn new(stream_id: StreamId, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
        }
    }
}

/// CONTINUATION frame (RFC 9113 Section 6.10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_HEADERS flag
    pub end_headers: bool,
}

/// RST_STREAM frame (RFC 9113 Section 6.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstStreamFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Error code
    pub error_code: ErrorCode,
}

/// WINDOW_UPDATE frame (RFC 9113 Section 6.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    /// Stream ID (0 for connection-level)
    pub stream_id: StreamId,
    /// Window size increment
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    /// Create a new WINDOW_UPDATE frame
    pub fn new(stream_id: StreamId, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }
}
