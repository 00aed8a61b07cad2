//! Caller-facing stream I/O over the request stream.
//!
//! Implements the generic `send -> bytes consumed` / `recv -> bytes
//! produced or retry` contract the surrounding request engine expects from
//! any transport. The first send call carries the legacy header block: it is
//! transcoded, the HTTP/3 context is created lazily, and the request is
//! submitted. Later send calls carry body bytes. Every recv call drives the
//! pump and then drains the engine's HTTP/3 event queue.

use tracing::{debug, info, warn};

use crate::engine::{EngineConnection, Http3Context, ProtocolEngine, TransportEvent};
use crate::error::{Result, TransportError};
use crate::headers::transcode;
use crate::probe::ConnectionPhase;
use crate::session::{QuicSession, StreamRequestState, UPLOAD_LEN_UNKNOWN};
use crate::socket::DatagramIo;

/// Observer invoked once per response header field. Failures are logged and
/// do not abort the receive operation.
pub type HeaderObserver = Box<dyn FnMut(&[u8], &[u8]) -> anyhow::Result<()>>;

impl<E: ProtocolEngine, S: DatagramIo> QuicSession<E, S> {
    /// Write request bytes. The first call must carry the complete
    /// CRLF-delimited header block; subsequent calls carry body bytes.
    /// Returns the number of bytes consumed.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize> {
        if self.phase != ConnectionPhase::Established {
            return Err(TransportError::Send("connection not established".into()));
        }

        let (stream_id, fin) = match &self.request {
            None => return self.submit_request(buf),
            Some(state) => {
                let fin = match state.upload_left {
                    UPLOAD_LEN_UNKNOWN => true,
                    left => buf.len() as i64 >= left,
                };
                (state.stream_id, fin)
            }
        };

        let sent = self
            .conn
            .stream_send(stream_id, buf, fin)
            .map_err(|e| TransportError::Send(format!("stream send failed: {}", e)))?;

        if let Some(state) = self.request.as_mut() {
            if state.upload_left > 0 {
                state.upload_left = (state.upload_left - sent as i64).max(0);
            }
        }

        // Push the bytes out before reporting them consumed.
        self.flush_egress()?;

        Ok(sent)
    }

    /// Transcode the header block, create the HTTP/3 context and submit the
    /// request. Requests without a body are finished immediately; for
    /// body-bearing methods the upload length is recorded and the body is
    /// expected from later send calls.
    fn submit_request(&mut self, block: &[u8]) -> Result<usize> {
        let headers = transcode(block, self.is_secure())?;

        let has_body = matches!(headers.method(), b"POST" | b"PUT" | b"PATCH");
        let upload_left = if has_body {
            headers
                .field(b"content-length")
                .and_then(|v| std::str::from_utf8(v).ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|&n| n >= 0)
                .unwrap_or(UPLOAD_LEN_UNKNOWN)
        } else {
            0
        };

        let mut h3 = self
            .engine
            .new_http3(&mut self.conn)
            .map_err(|e| TransportError::Send(format!("HTTP/3 context creation failed: {}", e)))?;

        let stream_id = h3
            .send_request(&mut self.conn, headers.entries(), !has_body)
            .map_err(|e| TransportError::Send(format!("request send failed: {}", e)))?;

        info!("using HTTP/3 stream id {:x}", stream_id);

        self.h3 = Some(h3);
        self.request = Some(StreamRequestState {
            stream_id,
            upload_left,
            has_body,
        });

        Ok(block.len())
    }

    /// Read response bytes into `buf`. Returns the number of bytes produced,
    /// or [`TransportError::Retry`] when the engine has nothing yet.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.phase != ConnectionPhase::Established {
            return Err(TransportError::Recv("connection not established".into()));
        }

        self.process_ingress()?;

        let stream_id = self.request.as_ref().map_or(0, |r| r.stream_id);
        let mut recvd = match self.conn.stream_recv(stream_id, buf) {
            Ok((n, _fin)) => n,
            Err(e) if e.is_done() => return Err(TransportError::Retry),
            Err(e) => {
                return Err(TransportError::Recv(format!("stream recv failed: {}", e)))
            }
        };

        debug!("{} bytes of H3 to deal with", recvd);

        if let Some(h3) = self.h3.as_mut() {
            loop {
                let Ok(Some((event_stream, event))) = h3.poll(&mut self.conn) else {
                    break;
                };

                match event {
                    TransportEvent::HeadersReceived(fields) => {
                        for field in &fields {
                            match self.header_observer.as_mut() {
                                Some(observer) => {
                                    if let Err(e) = observer(&field.name, &field.value) {
                                        warn!("failed to process headers: {}", e);
                                    }
                                }
                                None => debug!(
                                    "got HTTP header: {}={}",
                                    String::from_utf8_lossy(&field.name),
                                    String::from_utf8_lossy(&field.value)
                                ),
                            }
                        }
                    }
                    TransportEvent::DataAvailable => {
                        // A zero-length or failed body read produces no
                        // value; the count from the stream read stands.
                        if let Ok(n) = h3.recv_body(&mut self.conn, event_stream, buf) {
                            if n > 0 {
                                recvd = n;
                            }
                        }
                    }
                    TransportEvent::StreamFinished => {
                        if let Err(e) = self.conn.close(true, 0, b"") {
                            warn!("failed to close connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(recvd)
    }
}
