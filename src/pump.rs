//! The ingress/egress pump.
//!
//! Protocol progress is made by explicitly draining the socket into the
//! engine and the engine into the socket. There is no background task:
//! every operation that needs progress (handshake probing, stream reads,
//! stream writes) drives the pump itself and returns without waiting.

use tracing::debug;

use crate::engine::{EngineConnection, ProtocolEngine};
use crate::error::{Result, TransportError};
use crate::socket::{is_would_block, DatagramIo};
use crate::session::QuicSession;

impl<E: ProtocolEngine, S: DatagramIo> QuicSession<E, S> {
    /// Drain pending datagrams from the socket into the engine.
    ///
    /// Stops when the socket has nothing pending or the engine reports it
    /// has nothing to consume. A datagram is never retried: any socket
    /// error other than "would block", and any engine decode error, is
    /// fatal for the operation.
    pub fn process_ingress(&mut self) -> Result<()> {
        loop {
            let recvd = match self.socket.recv(&mut self.ingress_buf) {
                Ok(n) => n,
                Err(e) if is_would_block(&e) => break,
                Err(e) => {
                    return Err(TransportError::Recv(format!(
                        "socket recv unexpectedly failed: {}",
                        e
                    )))
                }
            };

            match self.conn.recv(&mut self.ingress_buf[..recvd]) {
                Ok(_) => {}
                Err(e) if e.is_done() => break,
                Err(e) => {
                    return Err(TransportError::Recv(format!("engine recv failed: {}", e)))
                }
            }
        }

        Ok(())
    }

    /// Push every datagram the engine has queued out through the socket.
    ///
    /// Performs zero writes when nothing is queued. Any engine production
    /// error or socket write error is fatal for the operation.
    pub fn flush_egress(&mut self) -> Result<()> {
        loop {
            let produced = match self.conn.send(&mut self.egress_buf) {
                Ok(n) => n,
                Err(e) if e.is_done() => break,
                Err(e) => {
                    return Err(TransportError::Send(format!("engine send failed: {}", e)))
                }
            };

            self.socket
                .send(&self.egress_buf[..produced])
                .map_err(|e| TransportError::Send(format!("socket send failed: {}", e)))?;

            debug!("flushed {} byte datagram", produced);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::TransportConfig;
    use crate::engine::loopback::{LoopbackEngine, LoopbackHandle};
    use crate::engine::EngineError;
    use crate::error::TransportError;
    use crate::session::QuicSession;
    use crate::socket::{is_would_block, DatagramIo};
    use std::net::UdpSocket;

    fn socket_pair() -> (UdpSocket, UdpSocket) {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        a.connect(b.local_addr().unwrap()).unwrap();
        b.connect(a.local_addr().unwrap()).unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    fn session(local: UdpSocket) -> (QuicSession<LoopbackEngine, UdpSocket>, LoopbackHandle) {
        let engine = LoopbackEngine::new();
        let handle = engine.handle();
        let session = QuicSession::connect(
            engine,
            "example.com",
            local,
            true,
            &TransportConfig::default(),
        )
        .unwrap();
        (session, handle)
    }

    fn recv_one(sock: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 2048];
        loop {
            match DatagramIo::recv(sock, &mut buf) {
                Ok(n) => return buf[..n].to_vec(),
                Err(e) if is_would_block(&e) => std::thread::yield_now(),
                Err(e) => panic!("recv failed: {}", e),
            }
        }
    }

    fn wait_for(mut f: impl FnMut() -> bool) {
        // Loopback delivery is fast but not instantaneous.
        for _ in 0..1000 {
            if f() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        panic!("condition not reached within one second");
    }

    #[test]
    fn ingress_feeds_every_pending_datagram() {
        let (local, peer) = socket_pair();
        let (mut session, handle) = session(local);

        DatagramIo::send(&peer, b"one").unwrap();
        DatagramIo::send(&peer, b"two").unwrap();

        wait_for(|| {
            session.process_ingress().unwrap();
            handle.ingress().len() == 2
        });
        assert_eq!(handle.ingress(), vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn ingress_on_idle_socket_is_a_no_op() {
        let (local, _peer) = socket_pair();
        let (mut session, handle) = session(local);

        session.process_ingress().unwrap();
        assert!(handle.ingress().is_empty());
    }

    #[test]
    fn engine_decode_failure_is_a_recv_error() {
        let (local, peer) = socket_pair();
        let (mut session, handle) = session(local);
        handle.set_recv_error(EngineError::InvalidPacket);

        DatagramIo::send(&peer, b"garbage").unwrap();
        wait_for(|| {
            matches!(session.process_ingress(), Err(TransportError::Recv(_)))
        });
    }

    #[test]
    fn engine_done_stops_ingress_quietly() {
        let (local, peer) = socket_pair();
        let (mut session, handle) = session(local);
        handle.set_recv_error(EngineError::Done);

        DatagramIo::send(&peer, b"padding").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        // The datagram is read from the socket but the engine declines it;
        // that ends the loop without an error.
        assert!(session.process_ingress().is_ok());
        assert!(handle.ingress().is_empty());
    }

    #[test]
    fn egress_with_empty_queue_writes_nothing() {
        let (local, peer) = socket_pair();
        let (mut session, _handle) = session(local);

        session.flush_egress().unwrap();

        let mut buf = [0u8; 64];
        let err = DatagramIo::recv(&peer, &mut buf).unwrap_err();
        assert!(is_would_block(&err));
    }

    #[test]
    fn egress_drains_every_queued_datagram() {
        let (local, peer) = socket_pair();
        let (mut session, handle) = session(local);

        handle.queue_egress(b"alpha".to_vec());
        handle.queue_egress(b"beta".to_vec());
        session.flush_egress().unwrap();

        assert_eq!(recv_one(&peer), b"alpha");
        assert_eq!(recv_one(&peer), b"beta");
    }

    #[test]
    fn engine_production_failure_is_a_send_error() {
        let (local, _peer) = socket_pair();
        let (mut session, handle) = session(local);
        handle.set_send_error(EngineError::InvalidState);

        assert!(matches!(
            session.flush_egress(),
            Err(TransportError::Send(_))
        ));
    }
}
