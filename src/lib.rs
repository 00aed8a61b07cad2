// HTTP/3 transport adapter: bridges the request engine's generic
// connect/read/write stream contract to an external QUIC protocol engine.

// Adapter configuration and error taxonomy
pub mod config;
pub mod error;

// Seam to the external QUIC/HTTP-3 protocol engine
pub mod engine;

// Non-blocking datagram I/O
pub mod socket;

// Per-connection session state and bootstrap
pub mod session;

// Socket <-> engine byte pumping
pub mod pump;

// Handshake readiness probing
pub mod probe;

// Header block transcoding
pub mod headers;

// Caller-facing stream send/recv
pub mod stream;

// Re-export main types
pub use config::TransportConfig;
pub use error::{HeaderTranscodeError, Result, TransportError};
pub use headers::{transcode, PseudoHeader, PseudoHeaderList};
pub use probe::ConnectionPhase;
pub use session::{ConnectionId, QuicSession, SocketInterest, StreamRequestState};

/// Adapter identity string for client version banners.
pub fn version() -> String {
    format!("h3bridge/{}", env!("CARGO_PKG_VERSION"))
}

pub mod prelude {
    pub use crate::config::TransportConfig;
    pub use crate::engine::{EngineConnection, Http3Context, ProtocolEngine, TransportEvent};
    pub use crate::error::{Result, TransportError};
    pub use crate::probe::ConnectionPhase;
    pub use crate::session::QuicSession;
    pub use crate::socket::DatagramIo;
}
