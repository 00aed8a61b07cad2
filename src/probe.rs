//! Connection readiness probing.
//!
//! The surrounding scheduler calls [`QuicSession::drive_handshake`] on every
//! socket-readiness notification until the connection reports
//! [`ConnectionPhase::Established`]. The phase transition is one-way: once
//! established, further calls keep pumping but never regress.

use tracing::debug;

use crate::engine::{EngineConnection, ProtocolEngine};
use crate::error::Result;
use crate::socket::DatagramIo;
use crate::session::QuicSession;

/// Connection phase as observed by this layer. The engine owns the finer
/// handshake sub-states; they are not visible here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Established,
}

impl<E: ProtocolEngine, S: DatagramIo> QuicSession<E, S> {
    /// Drive the pump and check for handshake completion.
    ///
    /// On the first observed completion the session switches its active
    /// transport to HTTP/3 stream mode; the stream adapter's send/recv are
    /// usable from that point on. Calls after establishment still drive the
    /// pump and return [`ConnectionPhase::Established`] idempotently.
    pub fn drive_handshake(&mut self) -> Result<ConnectionPhase> {
        self.process_ingress()?;
        self.flush_egress()?;

        if self.phase == ConnectionPhase::Connecting && self.conn.is_established() {
            self.phase = ConnectionPhase::Established;
            debug!("QUIC connection established");
        }

        Ok(self.phase)
    }
}
