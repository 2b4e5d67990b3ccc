//! Shared fixtures for the integration tests

#![allow(dead_code)]

use bytes::Bytes;
use h2stream::http::h2::{Connection, ErrorCode, Result, StreamId};
use h2stream::http::Headers;
use parking_lot::Mutex;
use std::sync::{Arc, Once};

static TRACING_INIT: Once = Once::new();

/// Install a test subscriber; `RUST_LOG` controls the level
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// One call a stream made on its connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Data {
        stream_id: StreamId,
        end_stream: bool,
        data: Bytes,
    },
    Headers {
        stream_id: StreamId,
        end_stream: bool,
        headers: Headers,
    },
    Reset {
        stream_id: StreamId,
        code: ErrorCode,
    },
    ResetAsync {
        stream_id: StreamId,
        code: ErrorCode,
    },
    WindowUpdate {
        stream_id: StreamId,
        delta: u64,
    },
    RemoveStream(StreamId),
    ConnectionFlowControl(u64),
    Flush,
    DegradedProbe,
}

/// Connection double that records every call
pub struct RecordingConnection {
    client: bool,
    peer_window: u64,
    local_window: u64,
    calls: Mutex<Vec<Call>>,
}

impl RecordingConnection {
    pub fn client(peer_window: u64, local_window: u64) -> Arc<Self> {
        Arc::new(RecordingConnection {
            client: true,
            peer_window,
            local_window,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn server(peer_window: u64, local_window: u64) -> Arc<Self> {
        Arc::new(RecordingConnection {
            client: false,
            peer_window,
            local_window,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// (length, end_stream) of every DATA frame
    pub fn data_frames(&self) -> Vec<(usize, bool)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Data {
                    end_stream, data, ..
                } => Some((data.len(), *end_stream)),
                _ => None,
            })
            .collect()
    }

    /// Concatenated DATA payloads
    pub fn data_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for call in self.calls.lock().iter() {
            if let Call::Data { data, .. } = call {
                out.extend_from_slice(data);
            }
        }
        out
    }

    /// Total bytes credited to the connection-level window
    pub fn credited(&self) -> u64 {
        self.calls
            .lock()
            .iter()
            .map(|call| match call {
                Call::ConnectionFlowControl(n) => *n,
                _ => 0,
            })
            .sum()
    }

    pub fn contains(&self, expected: &Call) -> bool {
        self.calls.lock().iter().any(|call| call == expected)
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl Connection for RecordingConnection {
    fn is_client(&self) -> bool {
        self.client
    }

    fn peer_write_window_size(&self) -> u64 {
        self.peer_window
    }

    fn local_read_window_size(&self) -> u64 {
        self.local_window
    }

    fn write_data(&self, stream_id: StreamId, end_stream: bool, data: Bytes) -> Result<()> {
        self.record(Call::Data {
            stream_id,
            end_stream,
            data,
        });
        Ok(())
    }

    fn write_headers(&self, stream_id: StreamId, end_stream: bool, headers: &Headers) -> Result<()> {
        self.record(Call::Headers {
            stream_id,
            end_stream,
            headers: headers.clone(),
        });
        Ok(())
    }

    fn write_stream_reset(&self, stream_id: StreamId, code: ErrorCode) -> Result<()> {
        self.record(Call::Reset { stream_id, code });
        Ok(())
    }

    fn write_stream_reset_async(&self, stream_id: StreamId, code: ErrorCode) {
        self.record(Call::ResetAsync { stream_id, code });
    }

    fn write_window_update_async(&self, stream_id: StreamId, delta: u64) {
        self.record(Call::WindowUpdate { stream_id, delta });
    }

    fn remove_stream(&self, stream_id: StreamId) {
        self.record(Call::RemoveStream(stream_id));
    }

    fn update_connection_flow_control(&self, byte_count: u64) {
        self.record(Call::ConnectionFlowControl(byte_count));
    }

    fn flush(&self) -> Result<()> {
        self.record(Call::Flush);
        Ok(())
    }

    fn schedule_degraded_liveness_probe(&self) {
        self.record(Call::DegradedProbe);
    }
}
