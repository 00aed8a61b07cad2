//! Seam to the external QUIC/HTTP-3 protocol engine.
//!
//! The engine owns the wire protocol: handshake, encryption, congestion
//! control, stream multiplexing and framing. The adapter only ever talks to
//! it through the traits in this module, which mirror the packet-oriented
//! send/recv surface and the event-driven HTTP/3 surface of the engines this
//! adapter is written against.

pub mod loopback;

use bytes::Bytes;
use thiserror::Error;

use crate::config::TransportConfig;
use crate::headers::PseudoHeader;
use crate::session::ConnectionId;

/// Errors reported by engine primitives.
///
/// `Done` is a signal, not a failure: the engine has nothing to consume, no
/// packet to produce, or no stream data yet, depending on the call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("done (no more data)")]
    Done,

    #[error("buffer too short")]
    BufferTooShort,

    #[error("invalid packet")]
    InvalidPacket,

    #[error("invalid state")]
    InvalidState,

    #[error("invalid stream state")]
    InvalidStreamState,

    #[error("flow control error")]
    FlowControl,

    #[error("stream limit reached")]
    StreamLimit,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("transport error: {0}")]
    Transport(u64),

    #[error("application error: {0}")]
    Application(u64),
}

impl EngineError {
    /// True when the engine is merely reporting "nothing to do right now".
    pub fn is_done(&self) -> bool {
        matches!(self, EngineError::Done)
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// One response header field delivered by a `HeadersReceived` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Event drained from the engine's per-connection HTTP/3 event queue.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Response headers arrived; fields are delivered in wire order.
    HeadersReceived(Vec<HeaderField>),
    /// Response body bytes are readable via [`Http3Context::recv_body`].
    DataAvailable,
    /// The peer finished the stream.
    StreamFinished,
}

/// Per-connection packet primitives.
pub trait EngineConnection {
    /// Feed one received datagram to the engine. Returns the number of bytes
    /// consumed, or `Done` when the engine has nothing to consume.
    fn recv(&mut self, datagram: &mut [u8]) -> EngineResult<usize>;

    /// Ask the engine to produce the next outgoing datagram into `out`.
    /// Returns the datagram length, or `Done` when nothing is queued.
    fn send(&mut self, out: &mut [u8]) -> EngineResult<usize>;

    /// Whether the handshake has completed.
    fn is_established(&self) -> bool;

    /// Read ordered stream data. Returns `(bytes, fin)`, or `Done` when the
    /// stream has no data pending.
    fn stream_recv(&mut self, stream_id: u64, out: &mut [u8]) -> EngineResult<(usize, bool)>;

    /// Write ordered stream data, optionally finishing the stream. Returns
    /// the number of bytes the engine accepted.
    fn stream_send(&mut self, stream_id: u64, data: &[u8], fin: bool) -> EngineResult<usize>;

    /// Close the connection with an application (or transport) error code.
    fn close(&mut self, app: bool, error_code: u64, reason: &[u8]) -> EngineResult<()>;
}

/// Per-connection HTTP/3 request context.
pub trait Http3Context<C: EngineConnection> {
    /// Submit a request as an ordered pseudo-header list. `fin` marks a
    /// request without a body. Returns the assigned stream id.
    fn send_request(
        &mut self,
        conn: &mut C,
        headers: &[PseudoHeader<'_>],
        fin: bool,
    ) -> EngineResult<u64>;

    /// Drain the next pending event, or `None` when the queue is empty.
    fn poll(&mut self, conn: &mut C) -> EngineResult<Option<(u64, TransportEvent)>>;

    /// Read response body bytes for the stream a `DataAvailable` event named.
    fn recv_body(&mut self, conn: &mut C, stream_id: u64, out: &mut [u8]) -> EngineResult<usize>;
}

/// The external protocol engine: configuration plus connection construction.
pub trait ProtocolEngine {
    /// Opaque engine configuration handle.
    type Config;
    /// Per-connection handle.
    type Connection: EngineConnection;
    /// Per-connection HTTP/3 context.
    type Http3: Http3Context<Self::Connection>;

    /// Build an engine configuration from the adapter's fixed tunables.
    fn build_config(&self, tunables: &TransportConfig) -> EngineResult<Self::Config>;

    /// Open a connection to `host` using the given connection ID and config.
    fn connect(
        &self,
        host: &str,
        cid: &ConnectionId,
        config: &mut Self::Config,
    ) -> EngineResult<Self::Connection>;

    /// Create the HTTP/3 context bound to an established connection.
    fn new_http3(&self, conn: &mut Self::Connection) -> EngineResult<Self::Http3>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_is_a_signal_not_a_failure() {
        assert!(EngineError::Done.is_done());
        assert!(!EngineError::InvalidPacket.is_done());
    }

    #[test]
    fn header_field_owns_its_bytes() {
        let field = HeaderField::new(&b"content-type"[..], &b"text/html"[..]);
        assert_eq!(&field.name[..], b"content-type");
        assert_eq!(&field.value[..], b"text/html");
    }
}
