//! xairlib-core: Core types, identities, and error definitions for xairlib.
//!
//! This crate defines the values every other xairlib crate passes around.
//! It performs no I/O and has no async dependencies.
//!
//! # Key types
//!
//! - [`OscMessage`] / [`OscArg`] -- a wire message as a plain value
//! - [`DeviceIdentity`] -- a discovered mixer, usable as a map key
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod identity;
pub mod message;

pub use error::{Error, Result};
pub use identity::DeviceIdentity;
pub use message::{OscArg, OscMessage};
