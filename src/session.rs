//! Per-connection session state and bootstrap.
//!
//! A [`QuicSession`] is created once per connection attempt, is exclusively
//! owned by the connection driver that created it, and is never shared
//! across threads. Tearing a connection down is just dropping the session.

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};

use crate::config::{TransportConfig, CONNECTION_ID_LEN, MAX_DATAGRAM_SIZE, MAX_RECV_SIZE};
use crate::engine::ProtocolEngine;
use crate::error::{Result, TransportError};
use crate::probe::ConnectionPhase;
use crate::socket::DatagramIo;
use crate::stream::HeaderObserver;

/// Sentinel for an upload whose total length is unknown but nonzero.
pub const UPLOAD_LEN_UNKNOWN: i64 = -1;

/// Locally chosen, fixed-length connection identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionId([u8; CONNECTION_ID_LEN]);

impl ConnectionId {
    /// Generate a connection ID from the OS cryptographic random source.
    pub fn random() -> Result<Self> {
        let mut data = [0u8; CONNECTION_ID_LEN];
        OsRng
            .try_fill_bytes(&mut data)
            .map_err(|e| TransportError::Init(format!("random source failed: {}", e)))?;
        Ok(Self(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// State for the single in-flight request stream.
#[derive(Debug, Clone)]
pub struct StreamRequestState {
    /// Stream id assigned by the engine's request submission.
    pub stream_id: u64,
    /// Remaining upload bytes; [`UPLOAD_LEN_UNKNOWN`] when the total length
    /// was not declared up front.
    pub upload_left: i64,
    /// Whether the request carries a body at all.
    pub has_body: bool,
}

impl StreamRequestState {
    /// True while body bytes are still expected from the caller.
    pub fn uploading(&self) -> bool {
        self.has_body && self.upload_left != 0
    }
}

/// Socket readiness the adapter currently wants from the surrounding
/// scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketInterest {
    pub read: bool,
    pub write: bool,
}

/// Result of the connection liveness hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    /// No engine-level liveness check was performed.
    Unchecked,
}

/// One QUIC connection attempt: engine handles, connection ID, socket and
/// per-session scratch buffers.
pub struct QuicSession<E: ProtocolEngine, S: DatagramIo> {
    pub(crate) engine: E,
    pub(crate) conn: E::Connection,
    #[allow(dead_code)]
    pub(crate) config: E::Config,
    pub(crate) h3: Option<E::Http3>,
    scid: ConnectionId,
    pub(crate) socket: S,
    pub(crate) phase: ConnectionPhase,
    pub(crate) request: Option<StreamRequestState>,
    pub(crate) header_observer: Option<HeaderObserver>,
    secure: bool,
    // Scratch buffers are per-session so concurrent sessions never share
    // state through the pump.
    pub(crate) ingress_buf: Box<[u8]>,
    pub(crate) egress_buf: Box<[u8]>,
}

impl<E: ProtocolEngine, S: DatagramIo> std::fmt::Debug for QuicSession<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuicSession")
            .field("scid", &self.scid)
            .field("phase", &self.phase)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl<E: ProtocolEngine, S: DatagramIo> QuicSession<E, S> {
    /// Bootstrap a connection: build the engine configuration, generate the
    /// connection ID, start the handshake and flush the Initial packet(s).
    ///
    /// Every failure surfaces as [`TransportError::Init`] and no usable
    /// session is left behind.
    pub fn connect(
        engine: E,
        host: &str,
        socket: S,
        secure: bool,
        tunables: &TransportConfig,
    ) -> Result<Self> {
        debug!("connecting to {} over QUIC", host);

        let mut config = engine
            .build_config(tunables)
            .map_err(|e| TransportError::Init(format!("engine configuration failed: {}", e)))?;

        let scid = ConnectionId::random()?;

        let conn = engine
            .connect(host, &scid, &mut config)
            .map_err(|e| TransportError::Init(format!("connect failed: {}", e)))?;

        let mut session = Self {
            engine,
            conn,
            config,
            h3: None,
            scid,
            socket,
            phase: ConnectionPhase::Connecting,
            request: None,
            header_observer: None,
            secure,
            ingress_buf: vec![0u8; MAX_RECV_SIZE].into_boxed_slice(),
            egress_buf: vec![0u8; MAX_DATAGRAM_SIZE].into_boxed_slice(),
        };

        session
            .flush_egress()
            .map_err(|e| TransportError::Init(format!("initial egress flush failed: {}", e)))?;

        info!(
            "sent QUIC client Initial, ALPN: {}",
            tunables.application_protocol_str()
        );

        Ok(session)
    }

    /// The locally chosen connection ID.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.scid
    }

    /// Current connection phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Whether the underlying transport is encrypted; selects the `:scheme`
    /// value during header transcoding.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Install the observer invoked for each response header field.
    pub fn set_header_observer(&mut self, observer: HeaderObserver) {
        self.header_observer = Some(observer);
    }

    /// Socket readiness to register with the surrounding scheduler: a frame
    /// can arrive at any moment, so reads are always wanted; writes only
    /// while a request body is still being uploaded.
    pub fn socket_interest(&self) -> SocketInterest {
        SocketInterest {
            read: true,
            write: self.request.as_ref().map_or(false, |r| r.uploading()),
        }
    }

    /// Graceful disconnect hook.
    ///
    /// TODO: drain the engine (application close + final egress flush) once
    /// the surrounding client distinguishes dead connections from reusable
    /// ones here. Until then teardown is dropping the session.
    pub fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Connection liveness hook.
    ///
    /// TODO: query the engine for path liveness once it exposes a check;
    /// today every call reports [`ConnectionHealth::Unchecked`].
    pub fn check_health(&self) -> ConnectionHealth {
        ConnectionHealth::Unchecked
    }
}
