//! End-to-end tests for the adapter pipeline.
//!
//! These drive a whole connection attempt the way the surrounding request
//! engine would: bootstrap over a real UDP socket pair, probe the handshake,
//! submit a request through the stream contract and read the scripted
//! response back, with the loopback engine standing in for the QUIC stack.

use h3bridge::engine::loopback::{LoopbackEngine, LoopbackHandle};
use h3bridge::engine::{HeaderField, TransportEvent};
use h3bridge::prelude::*;
use h3bridge::socket::is_would_block;

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

fn recv_datagram(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 65535];
    loop {
        match socket.recv(&mut buf) {
            Ok(n) => return buf[..n].to_vec(),
            Err(e) if is_would_block(&e) => std::thread::yield_now(),
            Err(e) => panic!("recv failed: {}", e),
        }
    }
}

fn connect_session(
    host: &str,
) -> (
    QuicSession<LoopbackEngine, UdpSocket>,
    LoopbackHandle,
    UdpSocket,
) {
    let (local, peer) = socket_pair();
    let engine = LoopbackEngine::new();
    let handle = engine.handle();
    handle.queue_egress(b"client-initial".to_vec());

    let session =
        QuicSession::connect(engine, host, local, true, &TransportConfig::default()).unwrap();
    (session, handle, peer)
}

#[test]
fn full_get_request_round_trip() {
    let (mut session, handle, peer) = connect_session("example.com");

    // Bootstrap pushed the Initial out on the wire.
    assert_eq!(recv_datagram(&peer), b"client-initial");
    assert_eq!(handle.connected_host().as_deref(), Some("example.com"));
    assert_eq!(
        handle.config_tunables().unwrap().idle_timeout_ms,
        TransportConfig::default().idle_timeout_ms
    );

    // Handshake: the peer answers, the probe consumes the answer and the
    // engine reports completion.
    peer.send(b"server-flight").unwrap();
    assert_eq!(session.drive_handshake().unwrap(), ConnectionPhase::Connecting);
    handle.set_established(true);
    for _ in 0..1000 {
        session.drive_handshake().unwrap();
        if handle.ingress().iter().any(|d| d == b"server-flight") {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert_eq!(session.phase(), ConnectionPhase::Established);
    assert!(handle
        .ingress()
        .iter()
        .any(|datagram| datagram == b"server-flight"));

    // Request submission through the generic stream contract.
    let block = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n";
    assert_eq!(session.send(block).unwrap(), block.len());

    let requests = handle.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].fin);
    let names: Vec<&[u8]> = requests[0].headers.iter().map(|(n, _)| &n[..]).collect();
    assert_eq!(
        names,
        vec![
            &b":method"[..],
            &b":path"[..],
            &b":scheme"[..],
            &b":authority"[..],
            &b"Accept"[..],
        ]
    );

    // Scripted response: headers, body, stream finish.
    let observed = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&observed);
    session.set_header_observer(Box::new(move |name, value| {
        sink.lock()
            .unwrap()
            .push((name.to_vec(), value.to_vec()));
        Ok(())
    }));

    handle.push_stream_data(0, b"h3", false);
    handle.push_event(
        0,
        TransportEvent::HeadersReceived(vec![
            HeaderField::new(&b":status"[..], &b"200"[..]),
            HeaderField::new(&b"content-type"[..], &b"text/html"[..]),
        ]),
    );
    handle.push_event(0, TransportEvent::DataAvailable);
    handle.push_body(0, b"<html>hello</html>");
    handle.push_event(0, TransportEvent::StreamFinished);

    let mut buf = [0u8; 65535];
    let n = session.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"<html>hello</html>");

    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), 2);
    assert_eq!(observed[0], (b":status".to_vec(), b"200".to_vec()));

    // The finished stream closed the connection gracefully.
    assert_eq!(handle.closed(), Some((true, 0, Vec::new())));
}

#[test]
fn post_request_uploads_body_in_chunks() {
    let (mut session, handle, _peer) = connect_session("example.com");
    handle.set_established(true);
    session.drive_handshake().unwrap();

    let block =
        b"POST /upload HTTP/1.1\r\nHost: example.com\r\nContent-Length: 8\r\n\r\n";
    assert_eq!(session.send(block).unwrap(), block.len());
    assert!(!handle.requests()[0].fin);
    assert!(session.socket_interest().write);

    assert_eq!(session.send(b"abcd").unwrap(), 4);
    assert_eq!(session.send(b"efgh").unwrap(), 4);

    let (sent, fin) = handle.stream_sent(0);
    assert_eq!(sent, b"abcdefgh");
    assert!(fin);
    assert!(!session.socket_interest().write);
}

#[test]
fn recv_reports_retry_until_the_engine_has_data() {
    let (mut session, handle, _peer) = connect_session("example.com");
    handle.set_established(true);
    session.drive_handshake().unwrap();

    session
        .send(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .unwrap();

    let mut buf = [0u8; 256];
    let err = session.recv(&mut buf).unwrap_err();
    assert!(err.is_retry());

    handle.push_stream_data(0, b"now", false);
    assert_eq!(session.recv(&mut buf).unwrap(), 3);
}

#[test]
fn a_failed_bootstrap_leaves_no_session() {
    let (local, _peer) = socket_pair();
    let engine = LoopbackEngine::new();
    engine.handle().fail_connect();

    let result = QuicSession::connect(
        engine,
        "example.com",
        local,
        true,
        &TransportConfig::default(),
    );
    assert!(matches!(result, Err(TransportError::Init(_))));
}

#[test]
fn adapter_version_banner() {
    let banner = h3bridge::version();
    assert!(banner.starts_with("h3bridge/"));
}
