//! UDP transport for mixer communication.
//!
//! This module provides [`UdpTransport`], a datagram-oriented transport.
//! The socket is deliberately left unconnected: one device session sends
//! to a single mixer, but the discovery scanner sends to broadcast
//! addresses and hears replies from many sources on the same socket.
//!
//! Two receive flavours are offered. [`UdpTransport::recv_from`] waits
//! indefinitely and is meant to be one arm of a `tokio::select!` loop that
//! also watches for cancellation. [`UdpTransport::recv_from_timeout`] is for
//! one-shot exchanges such as a single discovery round.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use xairlib_core::error::{Error, Result};

/// UDP transport for datagram-based mixer communication.
///
/// Wraps a [`tokio::net::UdpSocket`] with error mapping and tracing
/// consistent with the rest of xairlib.
#[derive(Debug)]
pub struct UdpTransport {
    /// The underlying UDP socket.
    socket: UdpSocket,
    /// The local address the socket is bound to.
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to a local address.
    ///
    /// Use `"0.0.0.0:0"` to bind to any available port on all interfaces.
    ///
    /// # Arguments
    ///
    /// * `addr` - A `host:port` string (e.g., `"0.0.0.0:0"` or `"127.0.0.1:0"`)
    pub async fn bind(addr: &str) -> Result<Self> {
        tracing::debug!(addr = %addr, "Binding UDP socket");

        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "Failed to bind UDP socket");
            Error::Transport(format!("failed to bind UDP socket on {}: {}", addr, e))
        })?;

        let local_addr = socket.local_addr().map_err(|e| {
            tracing::error!(error = %e, "Failed to get local address");
            Error::Io(e)
        })?;

        tracing::debug!(local_addr = %local_addr, "UDP socket bound");

        Ok(Self { socket, local_addr })
    }

    /// Get the local address this socket is bound to.
    ///
    /// This is useful when binding to port 0 to discover the assigned port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send a datagram to the specified address.
    ///
    /// The entire `data` slice is sent as a single datagram. UDP does not
    /// guarantee delivery or ordering, but each datagram either arrives in
    /// full or not at all.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        tracing::trace!(
            local = %self.local_addr,
            remote = %addr,
            bytes = data.len(),
            "Sending datagram"
        );

        self.socket.send_to(data, addr).await.map_err(|e| {
            tracing::error!(
                local = %self.local_addr,
                remote = %addr,
                error = %e,
                "Failed to send datagram"
            );
            Error::Io(e)
        })?;

        Ok(())
    }

    /// Wait for the next datagram. Returns `(bytes_read, source_addr)`.
    ///
    /// There is no timeout; callers race this against their cancellation
    /// token. Bytes beyond `buf.len()` are silently discarded (standard UDP
    /// behavior).
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        match self.socket.recv_from(buf).await {
            Ok((n, src)) => {
                tracing::trace!(
                    local = %self.local_addr,
                    remote = %src,
                    bytes = n,
                    "Received datagram"
                );
                Ok((n, src))
            }
            Err(e) => {
                tracing::debug!(
                    local = %self.local_addr,
                    error = %e,
                    "Failed to receive datagram"
                );
                Err(Error::Io(e))
            }
        }
    }

    /// Receive a datagram with timeout. Returns `(bytes_read, source_addr)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if no datagram arrives within `timeout`.
    pub async fn recv_from_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(usize, SocketAddr)> {
        match tokio::time::timeout(timeout, self.recv_from(buf)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::trace!(
                    local = %self.local_addr,
                    timeout_ms = timeout.as_millis(),
                    "Timeout waiting for datagram"
                );
                Err(Error::Transport(format!(
                    "no datagram within {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Enable or disable broadcast on this socket.
    ///
    /// This must be enabled before sending to broadcast addresses
    /// (e.g., `255.255.255.255`), which mixer discovery relies on.
    pub fn set_broadcast(&self, enable: bool) -> Result<()> {
        tracing::debug!(
            local = %self.local_addr,
            enable = enable,
            "Setting broadcast"
        );

        self.socket.set_broadcast(enable).map_err(|e| {
            tracing::error!(
                local = %self.local_addr,
                error = %e,
                "Failed to set broadcast"
            );
            Error::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_and_local_addr() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr();

        assert_eq!(addr.ip(), std::net::Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0, "OS should assign a nonzero port");
    }

    #[tokio::test]
    async fn bind_invalid_address_is_transport_error() {
        let result = UdpTransport::bind("not-an-address").await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn recv_from_returns_source() {
        let socket_a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let socket_b = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        socket_a
            .send_to(b"/xremote\0\0\0\0", socket_b.local_addr())
            .await
            .unwrap();

        let mut buf = [0u8; 256];
        let (n, src) = socket_b
            .recv_from_timeout(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(&buf[..n], b"/xremote\0\0\0\0");
        assert_eq!(src, socket_a.local_addr(), "source should be socket A");
    }

    #[tokio::test]
    async fn recv_timeout() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        let mut buf = [0u8; 256];
        let result = transport
            .recv_from_timeout(&mut buf, Duration::from_millis(50))
            .await;

        assert!(
            matches!(result, Err(Error::Transport(_))),
            "expected Transport timeout, got: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn datagrams_arrive_in_order_on_loopback() {
        let sender = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let dest = receiver.local_addr();

        let messages: &[&[u8]] = &[b"/ch/01\0\0", b"/ch/02\0\0", b"/ch/03\0\0"];
        for msg in messages {
            sender.send_to(msg, dest).await.unwrap();
        }

        let mut buf = [0u8; 256];
        for expected in messages {
            let (n, _) = receiver
                .recv_from_timeout(&mut buf, Duration::from_secs(2))
                .await
                .unwrap();
            assert_eq!(&buf[..n], *expected);
        }
    }

    #[tokio::test]
    async fn set_broadcast_succeeds() {
        let transport = UdpTransport::bind("0.0.0.0:0").await.unwrap();
        transport.set_broadcast(true).unwrap();
        transport.set_broadcast(false).unwrap();
    }
}
