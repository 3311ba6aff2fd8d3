//! X-Air LAN discovery via `/xinfo`.
//!
//! Mixers answer an argument-less `/xinfo` message sent to UDP port 10024
//! with four strings: their IP address, network name, model, and firmware
//! version. The identity is built from the datagram's source address, not
//! the reported IP, so it is always an address we can actually reach.
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use xairlib_xair::discovery;
//!
//! # async fn example() -> xairlib_core::Result<()> {
//! let mixers = discovery::discover(Duration::from_secs(2)).await?;
//! for mixer in &mixers {
//!     println!("{}", mixer);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use xairlib_core::error::{Error, Result};
use xairlib_core::{DeviceIdentity, OscMessage};
use xairlib_osc::{XAIR_PORT, XINFO_ADDRESS, codec};
use xairlib_transport::UdpTransport;

use crate::client::RECV_BUFFER_SIZE;

/// Limited broadcast on the mixer port.
pub const DEFAULT_TARGET: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, XAIR_PORT));

/// Pause after a failed receive before trying again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Build an identity from an `/xinfo` reply received from `src`.
///
/// Accepts `[ip, name, model, version]` as sent by real mixers, and the
/// shorter `[name, model, version]`.
pub fn identity_from_reply(message: &OscMessage, src: SocketAddr) -> Result<DeviceIdentity> {
    if message.address != XINFO_ADDRESS {
        return Err(Error::Decode(format!(
            "expected {} reply, got {}",
            XINFO_ADDRESS, message.address
        )));
    }

    let strings: Option<Vec<&str>> = message.args.iter().map(|a| a.as_str()).collect();
    let (name, model, version) = match strings.as_deref() {
        Some([_ip, name, model, version]) => (*name, *model, *version),
        Some([name, model, version]) => (*name, *model, *version),
        _ => {
            return Err(Error::Decode(format!(
                "malformed {} reply: {}",
                XINFO_ADDRESS, message
            )));
        }
    };

    Ok(DeviceIdentity::new(src.ip(), src.port(), name, model, version))
}

/// Bind a broadcast-capable socket for discovery traffic.
pub(crate) async fn bind_discovery_socket(bind_addr: &str) -> Result<UdpTransport> {
    let transport = UdpTransport::bind(bind_addr).await?;
    transport.set_broadcast(true)?;
    Ok(transport)
}

/// Send one `/xinfo` request to every target. Returns how many sends succeeded.
pub(crate) async fn send_probe(transport: &UdpTransport, targets: &[SocketAddr]) -> usize {
    let bytes = match codec::encode(&OscMessage::query(XINFO_ADDRESS)) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Cannot encode discovery request");
            return 0;
        }
    };

    let mut sent = 0;
    for target in targets {
        match transport.send_to(&bytes, *target).await {
            Ok(()) => sent += 1,
            Err(e) => tracing::warn!(target = %target, error = %e, "Discovery send failed"),
        }
    }
    sent
}

/// Broadcast `/xinfo` once and collect every mixer that answers within `timeout`.
pub async fn discover(timeout: Duration) -> Result<Vec<DeviceIdentity>> {
    discover_on(&[DEFAULT_TARGET], timeout).await
}

/// Like [`discover`], sending the request to each of `targets` instead.
///
/// Useful for directed subnet broadcasts or probing known addresses.
pub async fn discover_on(targets: &[SocketAddr], timeout: Duration) -> Result<Vec<DeviceIdentity>> {
    let transport = bind_discovery_socket("0.0.0.0:0").await?;
    if send_probe(&transport, targets).await == 0 && !targets.is_empty() {
        return Err(Error::Transport(
            "discovery request could not be sent to any target".into(),
        ));
    }

    tracing::debug!(targets = targets.len(), "Listening for /xinfo replies");

    let mut found = BTreeSet::new();
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match transport.recv_from_timeout(&mut buf, remaining).await {
            Ok((n, src)) => {
                let identity =
                    codec::decode(&buf[..n]).and_then(|m| identity_from_reply(&m, src));
                match identity {
                    Ok(identity) => {
                        if found.insert(identity.clone()) {
                            tracing::debug!(device = %identity, "Discovered mixer");
                        }
                    }
                    Err(e) => tracing::trace!(src = %src, error = %e, "Ignoring datagram"),
                }
            }
            Err(Error::Transport(_)) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Discovery recv error");
                tokio::time::sleep(RECV_ERROR_BACKOFF.min(remaining)).await;
            }
        }
    }

    tracing::debug!(count = found.len(), "Discovery complete");
    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use xairlib_core::OscArg;
    use xairlib_test_harness::MockDevice;

    fn src() -> SocketAddr {
        "192.168.1.20:10024".parse().unwrap()
    }

    #[test]
    fn four_string_reply_uses_source_address() {
        let reply = OscMessage::new(
            "/xinfo",
            vec![
                "10.9.9.9".into(),
                "XR18-5E-91-5A".into(),
                "XR18".into(),
                "1.17".into(),
            ],
        );
        let identity = identity_from_reply(&reply, src()).unwrap();
        assert_eq!(identity.socket_addr(), src());
        assert_eq!(identity.name, "XR18-5E-91-5A");
        assert_eq!(identity.model, "XR18");
        assert_eq!(identity.version, "1.17");
    }

    #[test]
    fn three_string_reply_is_accepted() {
        let reply = OscMessage::new("/xinfo", vec!["MR18".into(), "MR18".into(), "1.5".into()]);
        let identity = identity_from_reply(&reply, src()).unwrap();
        assert_eq!(identity.model, "MR18");
        assert_eq!(identity.version, "1.5");
    }

    #[test]
    fn malformed_replies_are_decode_errors() {
        let wrong_address = OscMessage::new("/status", vec!["a".into(), "b".into(), "c".into()]);
        let short = OscMessage::new("/xinfo", vec!["XR18".into()]);
        let wrong_type = OscMessage::new(
            "/xinfo",
            vec!["XR18".into(), OscArg::Int(18), "1.17".into()],
        );

        for reply in [wrong_address, short, wrong_type] {
            assert!(matches!(
                identity_from_reply(&reply, src()),
                Err(Error::Decode(_))
            ));
        }
    }

    #[tokio::test]
    async fn discover_on_collects_answering_devices() {
        let a = MockDevice::start().await.unwrap();
        a.announce("XR18-AA", "XR18", "1.17");
        let b = MockDevice::start().await.unwrap();
        b.announce("XR12-BB", "XR12", "1.12");
        let quiet = MockDevice::start().await.unwrap();

        let found = discover_on(
            &[a.addr(), b.addr(), quiet.addr()],
            Duration::from_millis(300),
        )
        .await
        .unwrap();

        assert_eq!(found.len(), 2);
        assert!(found.contains(&a.identity()));
        assert!(found.contains(&b.identity()));
    }

    #[tokio::test]
    async fn discover_on_closed_port_ends_at_deadline() {
        let closed = {
            let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
            socket.local_addr().unwrap()
        };

        let started = tokio::time::Instant::now();
        let found = discover_on(&[closed], Duration::from_millis(200))
            .await
            .unwrap();

        assert!(found.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn discover_on_nothing_returns_empty() {
        let found = discover_on(&[], Duration::from_millis(30)).await.unwrap();
        assert!(found.is_empty());
    }
}
