//! Socket abstraction layer
//!
//! The server listens on one well-known endpoint. Every accepted transfer
//! gets its own [`Socket`]: a fresh UDP socket on an OS-assigned port,
//! connected to the requesting peer, so datagrams from other peers never
//! reach the session.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};

/// The well-known request endpoint
pub struct ServerSocket {
    inner: UdpSocket,
}

impl ServerSocket {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(addr).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    pub async fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> io::Result<()> {
        self.inner.send_to(bytes, peer).await.map(|_| ())
    }
}

/// A per-transfer endpoint connected to exactly one peer
pub struct Socket {
    inner: UdpSocket,
    peer: SocketAddr,
}

impl Socket {
    /// Binds an ephemeral port on `local_ip` and connects it to `peer`.
    ///
    /// Falls back to the unspecified address of the peer's family when
    /// `local_ip` cannot reach it.
    pub async fn connect(local_ip: IpAddr, peer: SocketAddr) -> io::Result<Self> {
        let ip = match (local_ip, peer) {
            (IpAddr::V4(_), SocketAddr::V4(_)) | (IpAddr::V6(_), SocketAddr::V6(_)) => local_ip,
            (_, SocketAddr::V4(_)) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            (_, SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };

        let inner = UdpSocket::bind(SocketAddr::new(ip, 0)).await?;
        inner.connect(peer).await?;
        Ok(Self { inner, peer })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.inner.send(bytes).await.map(|_| ())
    }

    /// Receives one datagram from the peer, or `None` once `deadline` passes
    pub async fn recv_until(&self, buf: &mut [u8], deadline: Instant) -> io::Result<Option<usize>> {
        match timeout_at(deadline, self.inner.recv(buf)).await {
            Ok(Ok(n)) => Ok(Some(n)),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }
}
