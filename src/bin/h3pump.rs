use anyhow::Result;
use clap::Parser;
use std::net::UdpSocket;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use h3bridge::engine::loopback::LoopbackEngine;
use h3bridge::engine::{HeaderField, TransportEvent};
use h3bridge::prelude::*;

/// Drive one HTTP request through the full adapter pipeline (bootstrap,
/// handshake probe, header transcode, stream I/O) over a local UDP socket
/// pair, with the scriptable loopback engine standing in for a real QUIC
/// stack.
#[derive(Parser)]
#[command(name = "h3pump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host name for the :authority header
    #[arg(long, default_value = "example.com")]
    host: String,

    /// Request path
    #[arg(long, default_value = "/index.html")]
    path: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print the effective transport tunables as JSON and exit
    #[arg(long)]
    dump_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    let tunables = TransportConfig::default();

    if cli.dump_config {
        println!("{}", serde_json::to_string_pretty(&tunables)?);
        return Ok(());
    }

    info!("{} starting...", h3bridge::version());

    // Local socket pair: `local` belongs to the session, `peer` plays the
    // server side of the datagram exchange.
    let local = UdpSocket::bind("127.0.0.1:0")?;
    let peer = UdpSocket::bind("127.0.0.1:0")?;
    local.connect(peer.local_addr()?)?;
    peer.connect(local.local_addr()?)?;
    local.set_nonblocking(true)?;
    peer.set_nonblocking(true)?;

    let engine = LoopbackEngine::new();
    let handle = engine.handle();

    // Bootstrap: the scripted Initial flies out during connect.
    handle.queue_egress(b"client-initial".to_vec());
    let mut session = QuicSession::connect(engine, &cli.host, local, true, &tunables)?;
    info!("session up, connection id {}", session.connection_id());

    let initial = recv_datagram(&peer)?;
    info!("peer observed {} byte Initial", initial.len());
    peer.send(b"server-handshake")?;

    // Probe until the handshake completes.
    handle.set_established(true);
    while session.drive_handshake()? != ConnectionPhase::Established {}
    info!("connection established");

    // Submit the request the way the request engine would: one header
    // block through the stream send contract.
    let block = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nAccept: */*\r\n\r\n",
        cli.path, cli.host
    );
    let consumed = session.send(block.as_bytes())?;
    info!("request submitted, {} header bytes consumed", consumed);

    for request in handle.requests() {
        for (name, value) in &request.headers {
            info!(
                "  > {}: {}",
                String::from_utf8_lossy(name),
                String::from_utf8_lossy(value)
            );
        }
    }

    // Script the response and observe it through the recv contract.
    session.set_header_observer(Box::new(|name, value| {
        info!(
            "  < {}: {}",
            String::from_utf8_lossy(name),
            String::from_utf8_lossy(value)
        );
        Ok(())
    }));

    handle.push_stream_data(0, b"h3", false);
    handle.push_event(
        0,
        TransportEvent::HeadersReceived(vec![
            HeaderField::new(&b":status"[..], &b"200"[..]),
            HeaderField::new(&b"server"[..], &b"loopback"[..]),
        ]),
    );
    handle.push_event(0, TransportEvent::DataAvailable);
    handle.push_body(0, b"<html>hello over HTTP/3</html>");
    handle.push_event(0, TransportEvent::StreamFinished);

    let mut buf = [0u8; 65535];
    let body_len = loop {
        match session.recv(&mut buf) {
            Ok(n) => break n,
            Err(e) if e.is_retry() => continue,
            Err(e) => return Err(e.into()),
        }
    };

    info!(
        "response body ({} bytes): {}",
        body_len,
        String::from_utf8_lossy(&buf[..body_len])
    );
    info!("stream finished, close recorded: {}", handle.closed().is_some());

    Ok(())
}

fn recv_datagram(socket: &UdpSocket) -> Result<Vec<u8>> {
    let mut buf = [0u8; 65535];
    loop {
        match socket.recv(&mut buf) {
            Ok(n) => return Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => std::thread::yield_now(),
            Err(e) => return Err(e.into()),
        }
    }
}
