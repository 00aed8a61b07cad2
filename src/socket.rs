//! Non-blocking datagram I/O seam.
//!
//! The pump never blocks: every read either returns a datagram immediately
//! or reports [`std::io::ErrorKind::WouldBlock`], which the pump treats as
//! "nothing pending". Implementations exist for a connected
//! [`std::net::UdpSocket`] in non-blocking mode and for a connected
//! [`tokio::net::UdpSocket`] via its `try_*` calls, so the adapter can be
//! driven from a plain poll loop or from a tokio scheduler.

use std::io;

/// Connected, non-blocking datagram socket.
pub trait DatagramIo {
    /// Read one datagram, or `WouldBlock` when none is pending.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send one datagram.
    fn send(&self, buf: &[u8]) -> io::Result<usize>;
}

impl DatagramIo for std::net::UdpSocket {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        std::net::UdpSocket::recv(self, buf)
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        std::net::UdpSocket::send(self, buf)
    }
}

impl DatagramIo for tokio::net::UdpSocket {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.try_recv(buf)
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.try_send(buf)
    }
}

/// True when an I/O error only means "retry after the next readiness
/// notification".
pub fn is_would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}
