//! Transport implementations for xairlib.
//!
//! Mixers speak OSC over plain UDP datagrams, so this crate provides a
//! single transport:
//!
//! - [`UdpTransport`]: a UDP socket with broadcast support and error
//!   mapping into [`xairlib_core::Error`], used by device sessions, the
//!   discovery scanner, and one-shot discovery
//!
//! # Example
//!
//! ```no_run
//! use xairlib_transport::UdpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> xairlib_core::Result<()> {
//! let transport = UdpTransport::bind("0.0.0.0:0").await?;
//! transport.set_broadcast(true)?;
//!
//! // Encoded "/xinfo" request
//! let xinfo = b"/xinfo\0\0,\0\0\0";
//! transport
//!     .send_to(xinfo, "255.255.255.255:10024".parse().unwrap())
//!     .await?;
//!
//! let mut buf = [0u8; 4096];
//! let (n, src) = transport.recv_from_timeout(&mut buf, Duration::from_secs(2)).await?;
//! println!("{} bytes from {}", n, src);
//! # Ok(())
//! # }
//! ```

pub mod udp;

pub use udp::UdpTransport;
