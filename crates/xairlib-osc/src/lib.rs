//! OSC protocol support for Behringer X-Air / Midas MR mixers.
//!
//! - **Codec** ([`codec`]) -- encode and decode OSC 1.0 messages
//! - **Meters** ([`meters`]) -- meter refresh requests and decoding of the
//!   little-endian binary meter frames
//!
//! The well-known addresses used by the session and discovery layers are
//! exported as constants.

pub mod codec;
pub mod meters;

pub use codec::{decode, encode};

/// UDP port mixers listen on for OSC.
pub const XAIR_PORT: u16 = 10024;

/// Discovery request/reply address.
pub const XINFO_ADDRESS: &str = "/xinfo";

/// Heartbeat address that keeps the mixer pushing updates to this client.
pub const XREMOTE_ADDRESS: &str = "/xremote";
