//! Behringer X-Air / Midas MR mixer sessions for xairlib.
//!
//! This crate talks OSC over UDP to X-Air family mixers (XR12, XR16, XR18,
//! MR18). It provides:
//!
//! - **Device sessions** ([`client`]) -- a [`DeviceClient`] handle backed by
//!   one task that owns the socket, an address cache, registered meter
//!   streams, and subscriber queues. `get` layers retried request/response
//!   on top of the fire-and-forget protocol; `put` writes optimistically.
//! - **Supervisors** ([`supervisor`]) -- a [`DeviceSupervisor`] owns one
//!   session task as a cancellable unit and decides when its device is
//!   stale.
//! - **Discovery** ([`discovery`]) -- one-shot `/xinfo` probing, and the
//!   continuous [`DeviceScanner`] ([`scanner`]) that tracks which mixers are
//!   alive and publishes membership snapshots.
//! - **Fleet management** ([`manager`]) -- a [`FleetManager`] that keeps
//!   one connected session per mixer the scanner reports. Construct it from
//!   [`FleetOptions`] or with the [`FleetManagerBuilder`] ([`builder`]).
//!
//! # Architecture
//!
//! Every component with mutable state (session, scanner, fleet manager) is
//! a handle/session pair. The session is run on its own task until a
//! `CancellationToken` fires; the handle is `Clone` and sends requests to
//! it over a channel. Subscriptions are deregistered when their handle is
//! dropped.
//!
//! # Example
//!
//! ```no_run
//! use xairlib_xair::FleetManagerBuilder;
//!
//! # async fn example() -> xairlib_core::Result<()> {
//! let (fleet, handle) = FleetManagerBuilder::new().spawn().await?;
//! let mut changes = fleet.subscribe().await?;
//!
//! while let Some(members) = changes.recv().await {
//!     for identity in &members {
//!         let client = fleet.get_client(identity).await?;
//!         let name = client.get("/lr/config/name").await?;
//!         println!("{} -> {}", identity, name);
//!     }
//! }
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod discovery;
pub mod manager;
pub mod meters;
pub mod scanner;
pub mod subscription;
pub mod supervisor;
pub mod task;

pub use builder::FleetManagerBuilder;
pub use client::{ClientOptions, DeviceClient, DeviceSession};
pub use manager::{FleetManager, FleetOptions, FleetSession};
pub use meters::MeterRegistry;
pub use scanner::{DeviceScanner, ScannerOptions, ScannerSession, Snapshot};
pub use subscription::Subscription;
pub use supervisor::{DeviceSupervisor, SupervisorState};
pub use task::TaskHandle;
