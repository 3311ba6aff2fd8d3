//! xairlib-test-harness: Test utilities for xairlib.
//!
//! This crate provides [`MockDevice`], a scripted stub mixer bound to a
//! loopback UDP port, for deterministic testing of device sessions, the
//! discovery scanner, and the fleet manager without real hardware.

pub mod mock_device;

pub use mock_device::MockDevice;
