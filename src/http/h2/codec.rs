//! HTTP/2 frame encoding and decoding
//!
//! Encoders build complete frames (header plus payload) into [`Bytes`].
//! Decoders take a [`Frame`] read off the wire and strip padding and
//! priority fields, leaving the parts a stream cares about.

use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use super::stream::StreamId;
use super::MAX_FRAME_SIZE_LIMIT;
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read};
use tracing::trace;

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Frame codec for encoding/decoding HTTP/2 frames
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame header
    pub fn encode_header(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: StreamId,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        header[3] = frame_type.as_u8();
        header[4] = flags.as_u8();

        // Stream ID (31 bits, reserved bit is 0)
        header[5..9].copy_from_slice(&(stream_id & 0x7FFF_FFFF).to_be_bytes());

        header
    }

    /// Decode a frame header into (raw type, flags, stream id, length)
    ///
    /// The type is left raw so that unknown frame types can be skipped.
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> (u8, FrameFlags, StreamId, usize) {
        let length = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);
        let flags = FrameFlags::from_u8(bytes[4]);
        let stream_id =
            u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7FFF_FFFF;

        (bytes[3], flags, stream_id, length)
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.data.len());

        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }

        let header = Self::encode_header(FrameType::Data, flags, frame.stream_id, frame.data.len());
        buf.put_slice(&header);
        buf.put_slice(&frame.data);

        buf.freeze()
    }

    /// Encode a HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.header_block.len());

        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let header = Self::encode_header(
            FrameType::Headers,
            flags,
            frame.stream_id,
            frame.header_block.len(),
        );
        buf.put_slice(&header);
        buf.put_slice(&frame.header_block);

        buf.freeze()
    }

    /// Encode a CONTINUATION frame
    pub fn encode_continuation_frame(frame: &ContinuationFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.header_block.len());

        let mut flags = FrameFlags::empty();
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let header = Self::encode_header(
            FrameType::Continuation,
            flags,
            frame.stream_id,
            frame.header_block.len(),
        );
        buf.put_slice(&header);
        buf.put_slice(&frame.header_block);

        buf.freeze()
    }

    /// Encode a complete header block as HEADERS plus CONTINUATION frames
    ///
    /// No fragment exceeds `max_frame_size`. END_STREAM rides on the HEADERS
    /// frame, END_HEADERS on the last fragment.
    pub fn encode_header_block(
        stream_id: StreamId,
        end_stream: bool,
        block: Bytes,
        max_frame_size: usize,
    ) -> Bytes {
        let max_frame_size = max_frame_size.max(1);
        let mut buf = BytesMut::with_capacity(block.len() + FRAME_HEADER_SIZE);

        let first_len = block.len().min(max_frame_size);
        let first = HeadersFrame::new(
            stream_id,
            block.slice(..first_len),
            end_stream,
            first_len == block.len(),
        );
        buf.put_slice(&Self::encode_headers_frame(&first));

        let mut offset = first_len;
        while offset < block.len() {
            let end = (offset + max_frame_size).min(block.len());
            let continuation = ContinuationFrame {
                stream_id,
                header_block: block.slice(offset..end),
                end_headers: end == block.len(),
            };
            buf.put_slice(&Self::encode_continuation_frame(&continuation));
            offset = end;
        }

        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);

        let header = Self::encode_header(
            FrameType::WindowUpdate,
            FrameFlags::empty(),
            frame.stream_id,
            4,
        );
        buf.put_slice(&header);

        // Window size increment (reserved bit must be 0)
        buf.put_u32(frame.size_increment & 0x7FFF_FFFF);

        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);

        let header = Self::encode_header(FrameType::RstStream, FrameFlags::empty(), frame.stream_id, 4);
        buf.put_slice(&header);
        buf.put_u32(frame.error_code.as_u32());

        buf.freeze()
    }

    /// Read the next known frame from a reader
    ///
    /// Frames of unknown type are read and dropped. Payloads larger than
    /// `max_frame_size` are rejected.
    pub fn read_frame<R: Read>(reader: &mut R, max_frame_size: usize) -> io::Result<Frame> {
        let max_frame_size = max_frame_size.min(MAX_FRAME_SIZE_LIMIT as usize);
        loop {
            let mut header = [0u8; FRAME_HEADER_SIZE];
            reader.read_exact(&mut header)?;

            let (raw_type, flags, stream_id, payload_len) = Self::decode_header(&header);

            if payload_len > max_frame_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Frame payload too large: {}", payload_len),
                ));
            }

            let mut payload = vec![0u8; payload_len];
            if payload_len > 0 {
                reader.read_exact(&mut payload)?;
            }

            match FrameType::from_u8(raw_type) {
                Some(frame_type) => {
                    return Ok(Frame::new(frame_type, flags, stream_id, Bytes::from(payload)));
                }
                None => {
                    trace!(frame_type = raw_type, stream_id, "skipping unknown frame type");
                }
            }
        }
    }

    /// Decode a DATA frame, stripping padding
    pub fn decode_data(frame: &Frame) -> Result<DataFrame> {
        let (data, padding) = strip_padding(frame)?;
        Ok(DataFrame {
            stream_id: frame.stream_id,
            data,
            end_stream: frame.flags.is_end_stream(),
            padding,
        })
    }

    /// Decode a HEADERS frame, stripping padding and priority fields
    pub fn decode_headers(frame: &Frame) -> Result<HeadersFrame> {
        let (mut block, _) = strip_padding(frame)?;
        if frame.flags.is_priority() {
            if block.len() < 5 {
                return Err(Error::Protocol(format!(
                    "HEADERS on stream {} too short for priority",
                    frame.stream_id
                )));
            }
            block = block.slice(5..);
        }
        Ok(HeadersFrame::new(
            frame.stream_id,
            block,
            frame.flags.is_end_stream(),
            frame.flags.is_end_headers(),
        ))
    }

    /// Decode a CONTINUATION frame
    pub fn decode_continuation(frame: &Frame) -> ContinuationFrame {
        ContinuationFrame {
            stream_id: frame.stream_id,
            header_block: frame.payload.clone(),
            end_headers: frame.flags.is_end_headers(),
        }
    }

    /// Decode a RST_STREAM frame
    pub fn decode_rst_stream(frame: &Frame) -> Result<RstStreamFrame> {
        let code = read_u32(frame, "RST_STREAM")?;
        Ok(RstStreamFrame {
            stream_id: frame.stream_id,
            error_code: ErrorCode::from_wire(code),
        })
    }

    /// Decode a WINDOW_UPDATE frame
    pub fn decode_window_update(frame: &Frame) -> Result<WindowUpdateFrame> {
        let increment = read_u32(frame, "WINDOW_UPDATE")? & 0x7FFF_FFFF;
        Ok(WindowUpdateFrame::new(frame.stream_id, increment))
    }
}

fn read_u32(frame: &Frame, name: &str) -> Result<u32> {
    match frame.payload.as_ref() {
        [a, b, c, d] => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => Err(Error::Protocol(format!(
            "{} length {} != 4",
            name,
            frame.payload.len()
        ))),
    }
}

/// Split off the pad length octet and trailing padding
///
/// Returns the remaining payload and the number of bytes removed.
fn strip_padding(frame: &Frame) -> Result<(Bytes, usize)> {
    if !frame.flags.is_padded() {
        return Ok((frame.payload.clone(), 0));
    }
    let Some(&pad_len) = frame.payload.first() else {
        return Err(Error::Protocol(format!(
            "padded {} on stream {} is empty",
            frame.frame_type.name(),
            frame.stream_id
        )));
    };
    let pad_len = pad_len as usize;
    if pad_len + 1 > frame.payload.len() {
        return Err(Error::Protocol(format!(
            "padding {} exceeds {} payload of {} bytes",
            pad_len,
            frame.frame_type.name(),
            frame.payload.len()
        )));
    }
    let end = frame.payload.len() - pad_len;
    Ok((frame.payload.slice(1..end), pad_len + 1))
}
