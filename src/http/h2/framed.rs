//! A [`Connection`] that frames stream traffic onto a byte writer
//!
//! [`FramedConnection`] owns the stream table, HPACK state and
//! connection-level receive window for one HTTP/2 connection. Outbound
//! frames are written to any [`Write`]; inbound frames are handed to
//! [`FramedConnection::receive_frame`] by whoever reads the transport.
//!
//! RST_STREAM and WINDOW_UPDATE frames requested asynchronously are queued
//! and written on the next [`Connection::flush`].

use super::codec::FrameCodec;
use super::connection::Connection;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::ReceiveCredit;
use super::frames::{DataFrame, Frame, FrameType, RstStreamFrame, WindowUpdateFrame};
use super::settings::StreamSettings;
use super::stream::{Stream, StreamId};
use super::{
    CONNECTION_STREAM_ID, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE,
    MAX_FRAME_SIZE_LIMIT, MAX_STREAM_ID, MAX_WINDOW_SIZE,
};
use crate::http::Headers;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Builder for a [`FramedConnection`]
#[derive(Debug, Clone)]
pub struct FramedConnectionBuilder {
    client: bool,
    local_window_size: u32,
    peer_window_size: u32,
    max_frame_size: u32,
    stream_settings: StreamSettings,
}

impl FramedConnectionBuilder {
    /// Create a new builder with RFC 9113 defaults, client role
    pub fn new() -> Self {
        FramedConnectionBuilder {
            client: true,
            local_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            peer_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            stream_settings: StreamSettings::default(),
        }
    }

    /// Set the connection role
    pub fn client(mut self, client: bool) -> Self {
        self.client = client;
        self
    }

    /// Set the receive window advertised for each stream and the connection
    pub fn local_window_size(mut self, size: u32) -> Self {
        self.local_window_size = size;
        self
    }

    /// Set the send window the peer granted for each stream
    pub fn peer_window_size(mut self, size: u32) -> Self {
        self.peer_window_size = size;
        self
    }

    /// Set the largest frame payload this side will send or accept
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the settings applied to every stream
    pub fn stream_settings(mut self, settings: StreamSettings) -> Self {
        self.stream_settings = settings;
        self
    }

    /// Validate and build a connection writing to `writer`
    pub fn build<W: Write + Send>(self, writer: W) -> Result<Arc<FramedConnection<W>>> {
        if self.local_window_size > MAX_WINDOW_SIZE {
            return Err(Error::InvalidSettings(format!(
                "Local window size {} exceeds maximum {}",
                self.local_window_size, MAX_WINDOW_SIZE
            )));
        }
        if self.peer_window_size > MAX_WINDOW_SIZE {
            return Err(Error::InvalidSettings(format!(
                "Peer window size {} exceeds maximum {}",
                self.peer_window_size, MAX_WINDOW_SIZE
            )));
        }
        if self.max_frame_size < DEFAULT_MAX_FRAME_SIZE || self.max_frame_size > MAX_FRAME_SIZE_LIMIT {
            return Err(Error::InvalidSettings(format!(
                "Max frame size {} outside valid range ({}-{})",
                self.max_frame_size, DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE_LIMIT
            )));
        }
        self.stream_settings.validate()?;

        Ok(Arc::new(FramedConnection {
            client: self.client,
            local_window_size: self.local_window_size,
            peer_window_size: self.peer_window_size,
            max_frame_size: self.max_frame_size as usize,
            stream_settings: self.stream_settings.clone(),
            writer: Mutex::new(FrameWriter {
                sink: writer,
                encoder: hpack::Encoder::new(),
            }),
            deferred: Mutex::new(VecDeque::new()),
            streams: Mutex::new(HashMap::new()),
            accepted: Mutex::new(VecDeque::new()),
            receive_credit: Mutex::new(ReceiveCredit::new(
                u64::from(self.local_window_size),
                self.stream_settings.window_update_divisor,
            )),
            reader: Mutex::new(HeaderReader {
                decoder: hpack::Decoder::new(),
                pending: None,
            }),
            next_stream_id: AtomicU32::new(if self.client { 1 } else { 2 }),
            last_peer_stream_id: AtomicU32::new(0),
            degraded_probes: AtomicU64::new(0),
        }))
    }
}

impl Default for FramedConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct FrameWriter<W> {
    sink: W,
    encoder: hpack::Encoder<'static>,
}

/// Header block split across HEADERS and CONTINUATION frames
struct PendingHeaderBlock {
    stream_id: StreamId,
    end_stream: bool,
    block: BytesMut,
}

struct HeaderReader {
    decoder: hpack::Decoder<'static>,
    pending: Option<PendingHeaderBlock>,
}

/// HTTP/2 connection over a byte writer
pub struct FramedConnection<W> {
    client: bool,
    local_window_size: u32,
    peer_window_size: u32,
    max_frame_size: usize,
    stream_settings: StreamSettings,
    /// Writer and HPACK encoder; header blocks are encoded and written
    /// under the same lock so the peer decodes them in order
    writer: Mutex<FrameWriter<W>>,
    deferred: Mutex<VecDeque<Bytes>>,
    streams: Mutex<HashMap<StreamId, Arc<Stream<Self>>>>,
    /// Peer-initiated streams not yet handed out by `accept`
    accepted: Mutex<VecDeque<Arc<Stream<Self>>>>,
    receive_credit: Mutex<ReceiveCredit>,
    reader: Mutex<HeaderReader>,
    next_stream_id: AtomicU32,
    last_peer_stream_id: AtomicU32,
    degraded_probes: AtomicU64,
}

impl<W: Write + Send> FramedConnection<W> {
    /// Open a stream and send its request headers
    pub fn new_stream(self: &Arc<Self>, headers: &Headers, out_finished: bool) -> Result<Arc<Stream<Self>>> {
        let id = self.next_stream_id.fetch_add(2, Ordering::SeqCst);
        if id > MAX_STREAM_ID {
            return Err(Error::IllegalState("stream IDs exhausted".to_string()));
        }

        let stream = Arc::new(Stream::new(
            id,
            Arc::clone(self),
            out_finished,
            false,
            None,
            &self.stream_settings,
        )?);
        self.streams.lock().insert(id, Arc::clone(&stream));
        debug!(stream_id = id, out_finished, "opened stream");

        self.write_headers(id, out_finished, headers)?;
        Ok(stream)
    }

    /// Next stream opened by the peer, if any
    pub fn accept(&self) -> Option<Arc<Stream<Self>>> {
        self.accepted.lock().pop_front()
    }

    /// Look up a live stream
    pub fn stream(&self, id: StreamId) -> Option<Arc<Stream<Self>>> {
        self.streams.lock().get(&id).cloned()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Number of times a stream deadline hinted that the link is degraded
    pub fn degraded_probe_count(&self) -> u64 {
        self.degraded_probes.load(Ordering::Relaxed)
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Frames queued for the next flush
    pub fn deferred_frame_count(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Dispatch one inbound frame to its stream
    ///
    /// DATA, HEADERS, CONTINUATION, RST_STREAM and WINDOW_UPDATE are
    /// handled; other frame types are ignored. Frames for streams that are
    /// gone are answered with RST_STREAM(STREAM_CLOSED).
    pub fn receive_frame(self: &Arc<Self>, frame: Frame) -> Result<()> {
        {
            let reader = self.reader.lock();
            if let Some(pending) = &reader.pending {
                if frame.frame_type != FrameType::Continuation || frame.stream_id != pending.stream_id {
                    return Err(Error::Protocol(format!(
                        "expected CONTINUATION for stream {}, got {} on stream {}",
                        pending.stream_id, frame.frame_type, frame.stream_id
                    )));
                }
            }
        }

        match frame.frame_type {
            FrameType::Data => self.receive_data_frame(&frame),
            FrameType::Headers => {
                let headers = FrameCodec::decode_headers(&frame)?;
                if headers.stream_id == CONNECTION_STREAM_ID {
                    return Err(Error::Protocol("HEADERS on stream 0".to_string()));
                }
                if headers.end_headers {
                    return self.receive_header_block(
                        headers.stream_id,
                        headers.end_stream,
                        &headers.header_block,
                    );
                }
                self.reader.lock().pending = Some(PendingHeaderBlock {
                    stream_id: headers.stream_id,
                    end_stream: headers.end_stream,
                    block: BytesMut::from(&headers.header_block[..]),
                });
                Ok(())
            }
            FrameType::Continuation => {
                let continuation = FrameCodec::decode_continuation(&frame);
                let complete = {
                    let mut reader = self.reader.lock();
                    let Some(pending) = reader.pending.as_mut() else {
                        return Err(Error::Protocol(format!(
                            "unexpected CONTINUATION on stream {}",
                            continuation.stream_id
                        )));
                    };
                    pending.block.extend_from_slice(&continuation.header_block);
                    if continuation.end_headers {
                        reader.pending.take()
                    } else {
                        None
                    }
                };
                match complete {
                    Some(pending) => {
                        self.receive_header_block(pending.stream_id, pending.end_stream, &pending.block)
                    }
                    None => Ok(()),
                }
            }
            FrameType::RstStream => {
                let rst = FrameCodec::decode_rst_stream(&frame)?;
                if let Some(stream) = self.stream(rst.stream_id) {
                    stream.receive_rst_stream(rst.error_code);
                    self.remove_stream(rst.stream_id);
                }
                Ok(())
            }
            FrameType::WindowUpdate => {
                let update = FrameCodec::decode_window_update(&frame)?;
                if update.stream_id == CONNECTION_STREAM_ID {
                    trace!(increment = update.size_increment, "connection WINDOW_UPDATE");
                    return Ok(());
                }
                if let Some(stream) = self.stream(update.stream_id) {
                    if update.size_increment == 0 {
                        stream.close_later(ErrorCode::ProtocolError);
                    } else {
                        stream.add_bytes_to_write_window(u64::from(update.size_increment));
                    }
                }
                Ok(())
            }
            other => {
                trace!(frame_type = %other, stream_id = frame.stream_id, "ignoring frame");
                Ok(())
            }
        }
    }

    fn receive_data_frame(&self, frame: &Frame) -> Result<()> {
        let data = FrameCodec::decode_data(frame)?;
        if data.stream_id == CONNECTION_STREAM_ID {
            return Err(Error::Protocol("DATA on stream 0".to_string()));
        }

        let Some(stream) = self.stream(data.stream_id) else {
            debug!(stream_id = data.stream_id, "DATA for unknown stream");
            self.update_connection_flow_control(data.flow_controlled_len() as u64);
            self.write_stream_reset_async(data.stream_id, ErrorCode::StreamClosed);
            return Ok(());
        };

        stream.receive_data(&data.data)?;
        if data.padding > 0 {
            self.update_connection_flow_control(data.padding as u64);
        }
        if data.end_stream {
            stream.receive_end_of_stream();
        }
        Ok(())
    }

    fn receive_header_block(self: &Arc<Self>, stream_id: StreamId, end_stream: bool, block: &[u8]) -> Result<()> {
        let headers = self.decode_header_block(block)?;

        if let Some(stream) = self.stream(stream_id) {
            stream.receive_headers(headers, end_stream);
            return Ok(());
        }

        let peer_initiated = (stream_id & 1 == 1) != self.client;
        let last = self.last_peer_stream_id.load(Ordering::SeqCst);
        if !peer_initiated || stream_id <= last {
            debug!(stream_id, "HEADERS for closed stream");
            self.write_stream_reset_async(stream_id, ErrorCode::StreamClosed);
            return Ok(());
        }
        self.last_peer_stream_id.store(stream_id, Ordering::SeqCst);

        let stream = Arc::new(Stream::new(
            stream_id,
            Arc::clone(self),
            false,
            end_stream,
            Some(headers),
            &self.stream_settings,
        )?);
        self.streams.lock().insert(stream_id, Arc::clone(&stream));
        self.accepted.lock().push_back(stream);
        debug!(stream_id, end_stream, "peer opened stream");
        Ok(())
    }

    fn decode_header_block(&self, block: &[u8]) -> Result<Headers> {
        let decoded = self
            .reader
            .lock()
            .decoder
            .decode(block)
            .map_err(|e| Error::Compression(format!("HPACK decode error: {:?}", e)))?;

        Ok(decoded
            .into_iter()
            .map(|(name, value)| {
                (
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect())
    }

    fn write_frames(&self, frames: &[Bytes]) -> Result<()> {
        let mut writer = self.writer.lock();
        for frame in frames {
            writer.sink.write_all(frame)?;
        }
        Ok(())
    }

    fn defer(&self, frame: Bytes) {
        self.deferred.lock().push_back(frame);
    }
}

impl FramedConnection<Vec<u8>> {
    /// Take everything written so far
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.writer.lock().sink)
    }
}

impl<W: Write + Send> Connection for FramedConnection<W> {
    fn is_client(&self) -> bool {
        self.client
    }

    fn peer_write_window_size(&self) -> u64 {
        u64::from(self.peer_window_size)
    }

    fn local_read_window_size(&self) -> u64 {
        u64::from(self.local_window_size)
    }

    fn write_data(&self, stream_id: StreamId, end_stream: bool, data: Bytes) -> Result<()> {
        if data.len() <= self.max_frame_size {
            let frame = DataFrame::new(stream_id, data, end_stream);
            return self.write_frames(&[FrameCodec::encode_data_frame(&frame)]);
        }

        let mut frames = Vec::with_capacity(data.len() / self.max_frame_size + 1);
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.max_frame_size).min(data.len());
            let frame = DataFrame::new(stream_id, data.slice(offset..end), end_stream && end == data.len());
            frames.push(FrameCodec::encode_data_frame(&frame));
            offset = end;
        }
        self.write_frames(&frames)
    }

    fn write_headers(&self, stream_id: StreamId, end_stream: bool, headers: &Headers) -> Result<()> {
        let fields: Vec<(String, &str)> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();

        let mut writer = self.writer.lock();
        let mut block = Vec::new();
        writer
            .encoder
            .encode_into(
                fields.iter().map(|(name, value)| (name.as_bytes(), value.as_bytes())),
                &mut block,
            )
            .map_err(|e| Error::Compression(format!("HPACK encode error: {}", e)))?;

        let encoded = FrameCodec::encode_header_block(stream_id, end_stream, Bytes::from(block), self.max_frame_size);
        writer.sink.write_all(&encoded)?;
        Ok(())
    }

    fn write_stream_reset(&self, stream_id: StreamId, code: ErrorCode) -> Result<()> {
        debug!(stream_id, %code, "sending RST_STREAM");
        let frame = RstStreamFrame {
            stream_id,
            error_code: code,
        };
        let mut writer = self.writer.lock();
        writer.sink.write_all(&FrameCodec::encode_rst_stream_frame(&frame))?;
        writer.sink.flush()?;
        Ok(())
    }

    fn write_stream_reset_async(&self, stream_id: StreamId, code: ErrorCode) {
        debug!(stream_id, %code, "queueing RST_STREAM");
        let frame = RstStreamFrame {
            stream_id,
            error_code: code,
        };
        self.defer(FrameCodec::encode_rst_stream_frame(&frame));
    }

    fn write_window_update_async(&self, stream_id: StreamId, delta: u64) {
        let mut remaining = delta;
        while remaining > 0 {
            let increment = remaining.min(u64::from(MAX_WINDOW_SIZE)) as u32;
            trace!(stream_id, increment, "queueing WINDOW_UPDATE");
            self.defer(FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(
                stream_id, increment,
            )));
            remaining -= u64::from(increment);
        }
    }

    fn remove_stream(&self, stream_id: StreamId) {
        if self.streams.lock().remove(&stream_id).is_some() {
            trace!(stream_id, "removed stream");
        }
    }

    fn update_connection_flow_control(&self, byte_count: u64) {
        let update = {
            let mut credit = self.receive_credit.lock();
            credit.consume(byte_count);
            credit.take_update()
        };
        if let Some(delta) = update {
            self.write_window_update_async(CONNECTION_STREAM_ID, delta);
        }
    }

    fn flush(&self) -> Result<()> {
        let pending: Vec<Bytes> = self.deferred.lock().drain(..).collect();
        let mut writer = self.writer.lock();
        for frame in &pending {
            writer.sink.write_all(frame)?;
        }
        writer.sink.flush()?;
        Ok(())
    }

    fn schedule_degraded_liveness_probe(&self) {
        let count = self.degraded_probes.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(count, "stream deadline expired, connection may be degraded");
    }
}
