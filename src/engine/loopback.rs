//! Scriptable in-memory protocol engine.
//!
//! Implements the engine seam against plain queues instead of a wire
//! protocol: egress datagrams are whatever the script queued, ingress
//! datagrams are recorded, streams are byte buffers, and HTTP/3 events are
//! replayed from a scripted list. Unit tests, the integration tests and the
//! demo binary all drive the adapter through this engine; it performs no
//! cryptography and speaks no real QUIC.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use bytes::{Bytes, BytesMut};

use super::{
    EngineConnection, EngineError, EngineResult, Http3Context, ProtocolEngine, TransportEvent,
};
use crate::config::TransportConfig;
use crate::headers::PseudoHeader;
use crate::session::ConnectionId;

/// Request submission captured by [`LoopbackHttp3::send_request`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub stream_id: u64,
    pub headers: Vec<(Bytes, Bytes)>,
    pub fin: bool,
}

#[derive(Debug, Default)]
struct StreamState {
    recv_buf: BytesMut,
    recv_fin: bool,
    sent: BytesMut,
    sent_fin: bool,
}

#[derive(Default)]
struct Shared {
    // Connect-time scripting.
    fail_config: bool,
    fail_connect: bool,
    fail_http3: bool,
    connected_host: Option<String>,
    connect_cid: Option<Vec<u8>>,
    tunables: Option<TransportConfig>,

    // Packet side.
    egress: VecDeque<Vec<u8>>,
    ingress: Vec<Vec<u8>>,
    established: bool,
    recv_error: Option<EngineError>,
    send_error: Option<EngineError>,

    // Stream / HTTP-3 side.
    streams: HashMap<u64, StreamState>,
    requests: Vec<RecordedRequest>,
    next_stream_id: u64,
    events: VecDeque<(u64, TransportEvent)>,
    bodies: HashMap<u64, BytesMut>,
    fail_request: bool,
    stream_send_error: Option<EngineError>,
    stream_send_limit: Option<usize>,
    body_error: Option<EngineError>,
    close_error: Option<EngineError>,
    closed: Option<(bool, u64, Vec<u8>)>,
}

/// The engine factory handed to [`crate::session::QuicSession::connect`].
pub struct LoopbackEngine {
    shared: Rc<RefCell<Shared>>,
}

/// Scripting and inspection handle, cloneable and usable after the engine
/// itself has been moved into a session.
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Rc<RefCell<Shared>>,
}

/// Engine configuration handle; carries the tunables it was built from.
pub struct LoopbackConfig {
    pub tunables: TransportConfig,
}

/// Per-connection handle.
pub struct LoopbackConnection {
    shared: Rc<RefCell<Shared>>,
}

/// Per-connection HTTP/3 context.
pub struct LoopbackHttp3 {
    shared: Rc<RefCell<Shared>>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared::default())),
        }
    }

    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHandle {
    // Scripting.

    pub fn fail_config(&self) {
        self.shared.borrow_mut().fail_config = true;
    }

    pub fn fail_connect(&self) {
        self.shared.borrow_mut().fail_connect = true;
    }

    pub fn fail_http3(&self) {
        self.shared.borrow_mut().fail_http3 = true;
    }

    pub fn fail_request(&self) {
        self.shared.borrow_mut().fail_request = true;
    }

    pub fn set_established(&self, established: bool) {
        self.shared.borrow_mut().established = established;
    }

    /// Queue a datagram for the engine to produce on its next `send`.
    pub fn queue_egress(&self, datagram: Vec<u8>) {
        self.shared.borrow_mut().egress.push_back(datagram);
    }

    /// Make ordered stream data readable via `stream_recv`.
    pub fn push_stream_data(&self, stream_id: u64, data: &[u8], fin: bool) {
        let mut shared = self.shared.borrow_mut();
        let stream = shared.streams.entry(stream_id).or_default();
        stream.recv_buf.extend_from_slice(data);
        stream.recv_fin = fin;
    }

    /// Append a scripted HTTP/3 event.
    pub fn push_event(&self, stream_id: u64, event: TransportEvent) {
        self.shared.borrow_mut().events.push_back((stream_id, event));
    }

    /// Make response body bytes readable via `recv_body`.
    pub fn push_body(&self, stream_id: u64, data: &[u8]) {
        self.shared
            .borrow_mut()
            .bodies
            .entry(stream_id)
            .or_default()
            .extend_from_slice(data);
    }

    pub fn set_recv_error(&self, err: EngineError) {
        self.shared.borrow_mut().recv_error = Some(err);
    }

    pub fn set_send_error(&self, err: EngineError) {
        self.shared.borrow_mut().send_error = Some(err);
    }

    pub fn set_stream_send_error(&self, err: EngineError) {
        self.shared.borrow_mut().stream_send_error = Some(err);
    }

    /// Cap how many bytes a single `stream_send` accepts.
    pub fn set_stream_send_limit(&self, limit: usize) {
        self.shared.borrow_mut().stream_send_limit = Some(limit);
    }

    pub fn set_body_error(&self, err: EngineError) {
        self.shared.borrow_mut().body_error = Some(err);
    }

    pub fn set_close_error(&self, err: EngineError) {
        self.shared.borrow_mut().close_error = Some(err);
    }

    // Inspection.

    pub fn connected_host(&self) -> Option<String> {
        self.shared.borrow().connected_host.clone()
    }

    pub fn connect_cid(&self) -> Option<Vec<u8>> {
        self.shared.borrow().connect_cid.clone()
    }

    pub fn config_tunables(&self) -> Option<TransportConfig> {
        self.shared.borrow().tunables.clone()
    }

    /// Datagrams the connection consumed, in arrival order.
    pub fn ingress(&self) -> Vec<Vec<u8>> {
        self.shared.borrow().ingress.clone()
    }

    /// Requests submitted through the HTTP/3 context.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.borrow().requests.clone()
    }

    /// Bytes written to a stream so far, with the fin flag.
    pub fn stream_sent(&self, stream_id: u64) -> (Vec<u8>, bool) {
        let shared = self.shared.borrow();
        shared
            .streams
            .get(&stream_id)
            .map(|s| (s.sent.to_vec(), s.sent_fin))
            .unwrap_or_default()
    }

    /// The close call recorded by the connection, if any.
    pub fn closed(&self) -> Option<(bool, u64, Vec<u8>)> {
        self.shared.borrow().closed.clone()
    }
}

impl ProtocolEngine for LoopbackEngine {
    type Config = LoopbackConfig;
    type Connection = LoopbackConnection;
    type Http3 = LoopbackHttp3;

    fn build_config(&self, tunables: &TransportConfig) -> EngineResult<Self::Config> {
        let mut shared = self.shared.borrow_mut();
        if shared.fail_config {
            return Err(EngineError::InvalidState);
        }
        shared.tunables = Some(tunables.clone());
        Ok(LoopbackConfig {
            tunables: tunables.clone(),
        })
    }

    fn connect(
        &self,
        host: &str,
        cid: &ConnectionId,
        _config: &mut Self::Config,
    ) -> EngineResult<Self::Connection> {
        let mut shared = self.shared.borrow_mut();
        if shared.fail_connect {
            return Err(EngineError::ConnectionClosed);
        }
        shared.connected_host = Some(host.to_string());
        shared.connect_cid = Some(cid.as_bytes().to_vec());
        Ok(LoopbackConnection {
            shared: Rc::clone(&self.shared),
        })
    }

    fn new_http3(&self, _conn: &mut Self::Connection) -> EngineResult<Self::Http3> {
        if self.shared.borrow().fail_http3 {
            return Err(EngineError::InvalidState);
        }
        Ok(LoopbackHttp3 {
            shared: Rc::clone(&self.shared),
        })
    }
}

impl EngineConnection for LoopbackConnection {
    fn recv(&mut self, datagram: &mut [u8]) -> EngineResult<usize> {
        let mut shared = self.shared.borrow_mut();
        if let Some(err) = shared.recv_error.clone() {
            return Err(err);
        }
        shared.ingress.push(datagram.to_vec());
        Ok(datagram.len())
    }

    fn send(&mut self, out: &mut [u8]) -> EngineResult<usize> {
        let mut shared = self.shared.borrow_mut();
        if let Some(err) = shared.send_error.clone() {
            return Err(err);
        }
        let Some(datagram) = shared.egress.pop_front() else {
            return Err(EngineError::Done);
        };
        if datagram.len() > out.len() {
            shared.egress.push_front(datagram);
            return Err(EngineError::BufferTooShort);
        }
        out[..datagram.len()].copy_from_slice(&datagram);
        Ok(datagram.len())
    }

    fn is_established(&self) -> bool {
        self.shared.borrow().established
    }

    fn stream_recv(&mut self, stream_id: u64, out: &mut [u8]) -> EngineResult<(usize, bool)> {
        let mut shared = self.shared.borrow_mut();
        let Some(stream) = shared.streams.get_mut(&stream_id) else {
            return Err(EngineError::Done);
        };
        if stream.recv_buf.is_empty() {
            return Err(EngineError::Done);
        }
        let n = stream.recv_buf.len().min(out.len());
        out[..n].copy_from_slice(&stream.recv_buf.split_to(n));
        let fin = stream.recv_fin && stream.recv_buf.is_empty();
        Ok((n, fin))
    }

    fn stream_send(&mut self, stream_id: u64, data: &[u8], fin: bool) -> EngineResult<usize> {
        let mut shared = self.shared.borrow_mut();
        if let Some(err) = shared.stream_send_error.clone() {
            return Err(err);
        }
        let accepted = shared
            .stream_send_limit
            .map_or(data.len(), |limit| data.len().min(limit));
        let stream = shared.streams.entry(stream_id).or_default();
        stream.sent.extend_from_slice(&data[..accepted]);
        if fin && accepted == data.len() {
            stream.sent_fin = true;
        }
        Ok(accepted)
    }

    fn close(&mut self, app: bool, error_code: u64, reason: &[u8]) -> EngineResult<()> {
        let mut shared = self.shared.borrow_mut();
        if let Some(err) = shared.close_error.clone() {
            return Err(err);
        }
        shared.closed = Some((app, error_code, reason.to_vec()));
        Ok(())
    }
}

impl Http3Context<LoopbackConnection> for LoopbackHttp3 {
    fn send_request(
        &mut self,
        _conn: &mut LoopbackConnection,
        headers: &[PseudoHeader<'_>],
        fin: bool,
    ) -> EngineResult<u64> {
        let mut shared = self.shared.borrow_mut();
        if shared.fail_request {
            return Err(EngineError::StreamLimit);
        }
        let stream_id = shared.next_stream_id;
        // Client-initiated bidirectional stream ids step by four.
        shared.next_stream_id += 4;
        shared.requests.push(RecordedRequest {
            stream_id,
            headers: headers
                .iter()
                .map(|h| {
                    (
                        Bytes::copy_from_slice(h.name),
                        Bytes::copy_from_slice(h.value),
                    )
                })
                .collect(),
            fin,
        });
        Ok(stream_id)
    }

    fn poll(
        &mut self,
        _conn: &mut LoopbackConnection,
    ) -> EngineResult<Option<(u64, TransportEvent)>> {
        Ok(self.shared.borrow_mut().events.pop_front())
    }

    fn recv_body(
        &mut self,
        _conn: &mut LoopbackConnection,
        stream_id: u64,
        out: &mut [u8],
    ) -> EngineResult<usize> {
        let mut shared = self.shared.borrow_mut();
        if let Some(err) = shared.body_error.clone() {
            return Err(err);
        }
        let Some(body) = shared.bodies.get_mut(&stream_id) else {
            return Err(EngineError::Done);
        };
        if body.is_empty() {
            return Err(EngineError::Done);
        }
        let n = body.len().min(out.len());
        out[..n].copy_from_slice(&body.split_to(n));
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(engine: &LoopbackEngine) -> LoopbackConnection {
        LoopbackConnection {
            shared: Rc::clone(&engine.shared),
        }
    }

    #[test]
    fn egress_queue_drains_in_order() {
        let engine = LoopbackEngine::new();
        let handle = engine.handle();
        let mut conn = connection(&engine);

        handle.queue_egress(b"first".to_vec());
        handle.queue_egress(b"second".to_vec());

        let mut out = [0u8; 32];
        assert_eq!(conn.send(&mut out).unwrap(), 5);
        assert_eq!(&out[..5], b"first");
        assert_eq!(conn.send(&mut out).unwrap(), 6);
        assert_eq!(conn.send(&mut out).unwrap_err(), EngineError::Done);
    }

    #[test]
    fn undersized_send_buffer_is_reported() {
        let engine = LoopbackEngine::new();
        let handle = engine.handle();
        let mut conn = connection(&engine);

        handle.queue_egress(vec![0u8; 64]);
        let mut out = [0u8; 16];
        assert_eq!(
            conn.send(&mut out).unwrap_err(),
            EngineError::BufferTooShort
        );
        // The datagram stays queued for a retry with a bigger buffer.
        let mut big = [0u8; 64];
        assert_eq!(conn.send(&mut big).unwrap(), 64);
    }

    #[test]
    fn stream_recv_reports_fin_only_when_drained() {
        let engine = LoopbackEngine::new();
        let handle = engine.handle();
        let mut conn = connection(&engine);

        handle.push_stream_data(0, b"hello world", true);

        let mut out = [0u8; 5];
        assert_eq!(conn.stream_recv(0, &mut out).unwrap(), (5, false));
        let mut rest = [0u8; 32];
        assert_eq!(conn.stream_recv(0, &mut rest).unwrap(), (6, true));
        assert_eq!(conn.stream_recv(0, &mut rest).unwrap_err(), EngineError::Done);
    }

    #[test]
    fn request_ids_step_by_four() {
        let engine = LoopbackEngine::new();
        let mut conn = connection(&engine);
        let mut h3 = LoopbackHttp3 {
            shared: Rc::clone(&engine.shared),
        };

        let headers = [PseudoHeader {
            name: b":method",
            value: b"GET",
        }];
        assert_eq!(h3.send_request(&mut conn, &headers, true).unwrap(), 0);
        assert_eq!(h3.send_request(&mut conn, &headers, true).unwrap(), 4);
        assert_eq!(engine.handle().requests().len(), 2);
    }
}
