//! Device identity value type.
//!
//! A [`DeviceIdentity`] is built from a discovery reply: the datagram's
//! source address plus the name, model, and firmware version the mixer
//! reports about itself. It keys every piece of per-device state in the
//! scanner and the fleet manager.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// A mixer discovered on the local network.
///
/// Two identities are equal only if every field matches, so a device that
/// is renamed or re-flashed shows up as a new identity and the old one
/// ages out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIdentity {
    /// IP address the discovery reply came from.
    pub ip: IpAddr,
    /// UDP port the discovery reply came from (10024 on real hardware).
    pub port: u16,
    /// User-assigned network name (e.g. "XR18-5E-91-5A").
    pub name: String,
    /// Model string (e.g. "XR18", "XR16", "XR12").
    pub model: String,
    /// Firmware version string.
    pub version: String,
}

impl DeviceIdentity {
    /// Create an identity from its parts.
    pub fn new(
        ip: IpAddr,
        port: u16,
        name: impl Into<String>,
        model: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            ip,
            port,
            name: name.into(),
            model: model.into(),
            version: version.into(),
        }
    }

    /// The socket address control traffic for this device is sent to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' ({}) at {}",
            self.model,
            self.name,
            self.version,
            self.socket_addr()
        )
    }
}
