//! Transport configuration for QUIC connection attempts.
//!
//! These tunables are fixed at connect time and are not exposed to end users
//! of the surrounding HTTP client; the defaults match the adapter's
//! long-standing wire behavior.

use serde::{Deserialize, Serialize};

/// Maximum number of concurrent streams advertised per direction.
pub const MAX_STREAMS: u64 = 256 * 1024;

/// Initial flow-control limit, for the connection and each stream class.
pub const MAX_DATA: u64 = 1024 * 1024;

/// Idle timeout in milliseconds.
pub const IDLE_TIMEOUT_MS: u64 = 60 * 1000;

/// Largest datagram the pump will read from the socket in one call.
pub const MAX_RECV_SIZE: usize = 65535;

/// Largest datagram the pump will hand to the socket in one call.
pub const MAX_DATAGRAM_SIZE: usize = 1200;

/// Length of the locally chosen connection ID.
pub const CONNECTION_ID_LEN: usize = 16;

/// ALPN identifier negotiated during the handshake.
pub const APPLICATION_PROTOCOL: &[u8] = b"h3";

/// Fixed tunables handed to the engine's configuration constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Idle timeout in milliseconds.
    pub idle_timeout_ms: u64,
    /// Initial connection-level flow-control limit.
    pub initial_max_data: u64,
    /// Initial per-stream limit, locally initiated bidirectional streams.
    pub initial_max_stream_data_bidi_local: u64,
    /// Initial per-stream limit, remotely initiated bidirectional streams.
    pub initial_max_stream_data_bidi_remote: u64,
    /// Initial per-stream limit, unidirectional streams.
    pub initial_max_stream_data_uni: u64,
    /// Maximum concurrent bidirectional streams.
    pub initial_max_streams_bidi: u64,
    /// Maximum concurrent unidirectional streams.
    pub initial_max_streams_uni: u64,
    /// Application protocol identifier offered in the handshake.
    pub application_protocol: Vec<u8>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: IDLE_TIMEOUT_MS,
            initial_max_data: MAX_DATA,
            initial_max_stream_data_bidi_local: MAX_DATA,
            initial_max_stream_data_bidi_remote: MAX_DATA,
            initial_max_stream_data_uni: MAX_DATA,
            initial_max_streams_bidi: MAX_STREAMS,
            initial_max_streams_uni: MAX_STREAMS,
            application_protocol: APPLICATION_PROTOCOL.to_vec(),
        }
    }
}

impl TransportConfig {
    /// ALPN identifier as a printable string for log lines.
    pub fn application_protocol_str(&self) -> String {
        String::from_utf8_lossy(&self.application_protocol).into_owned()
    }
}
