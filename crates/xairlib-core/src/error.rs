//! Error types for xairlib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Socket failures, wire-format faults,
//! request timeouts, and directory lookups are all captured here.

use crate::identity::DeviceIdentity;

/// The error type for all xairlib operations.
///
/// Cancellation of a background task is never reported through this type:
/// loops treat it as the normal shutdown signal and return cleanly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (bind failure, unreachable broadcast address).
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound datagram could not be decoded (truncated packet, bad
    /// length prefix, unterminated string, unknown type tag).
    #[error("decode error: {0}")]
    Decode(String),

    /// An outbound message cannot be represented on the wire.
    #[error("encode error: {0}")]
    Encode(String),

    /// A `get` exhausted its retry budget without a matching reply.
    ///
    /// This typically indicates the mixer is powered off, on another
    /// subnet, or does not recognise the queried address.
    #[error("request timed out after {attempts} attempts: {address}")]
    RequestTimeout {
        /// The address that was queried.
        address: String,
        /// How many queries were sent before giving up.
        attempts: u32,
    },

    /// The device identity is not present in the scanner or fleet directory.
    #[error("unknown device: {0}")]
    IdentityNotFound(DeviceIdentity),

    /// The device session is not running (never connected, or cancelled).
    #[error("not connected")]
    NotConnected,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_decode() {
        let e = Error::Decode("unterminated string".into());
        assert_eq!(e.to_string(), "decode error: unterminated string");
    }

    #[test]
    fn error_display_encode() {
        let e = Error::Encode("string contains NUL".into());
        assert_eq!(e.to_string(), "encode error: string contains NUL");
    }

    #[test]
    fn error_display_request_timeout() {
        let e = Error::RequestTimeout {
            address: "/status".into(),
            attempts: 3,
        };
        assert_eq!(e.to_string(), "request timed out after 3 attempts: /status");
    }

    #[test]
    fn error_display_identity_not_found() {
        let identity = DeviceIdentity::new(
            "192.168.1.20".parse().unwrap(),
            10024,
            "XR18-5E-91-5A",
            "XR18",
            "1.17",
        );
        let e = Error::IdentityNotFound(identity);
        assert_eq!(
            e.to_string(),
            "unknown device: XR18 'XR18-5E-91-5A' (1.17) at 192.168.1.20:10024"
        );
    }

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("port taken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
