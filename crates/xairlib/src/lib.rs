//! # xairlib -- Network Control for X-Air Mixers
//!
//! `xairlib` is an asynchronous Rust library for finding and controlling
//! Behringer X-Air and Midas MR digital mixers over their OSC/UDP remote
//! protocol. It handles discovery, keeps sessions alive, turns the
//! fire-and-forget protocol into retried reads, and decodes the binary
//! meter streams.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use xairlib::{ClientOptions, DeviceSupervisor, OscArg, discovery};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mixers = discovery::discover(Duration::from_secs(2)).await?;
//!     let Some(identity) = mixers.into_iter().next() else {
//!         return Ok(());
//!     };
//!
//!     let mut supervisor = DeviceSupervisor::start(identity, &ClientOptions::default()).await?;
//!     if let Some(mixer) = supervisor.client() {
//!         let fader = mixer.get("/lr/mix/fader").await?;
//!         println!("main fader: {}", fader);
//!         mixer.put("/lr/mix/on", vec![OscArg::Int(1)]).await?;
//!     }
//!     supervisor.cancel().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                  | Purpose                                          |
//! |------------------------|--------------------------------------------------|
//! | `xairlib-core`         | [`OscMessage`], [`DeviceIdentity`], errors       |
//! | `xairlib-transport`    | UDP transport                                    |
//! | `xairlib-osc`          | OSC 1.0 codec and meter frame decoding           |
//! | `xairlib-xair`         | Sessions, supervisors, scanner, fleet manager    |
//! | **`xairlib`**          | This facade crate -- re-exports everything       |
//!
//! ## Meters
//!
//! Meter streams are opt-in twice: the session must keep the stream alive
//! with [`DeviceClient::enable_meter`], and a subscriber must ask for meter
//! traffic with `subscribe(true)`. Frames arrive as an [`OscMessage`] on
//! `/meters/<id>` whose arguments are the decoded `i16` samples as
//! [`OscArg::Int`].
//!
//! ```no_run
//! # async fn example(mixer: &xairlib::DeviceClient) -> xairlib::Result<()> {
//! mixer.enable_meter(2, None)?;
//! let mut frames = mixer.subscribe(true).await?;
//! while let Some(frame) = frames.recv().await {
//!     if xairlib::osc::meters::is_meter_address(&frame.address) {
//!         println!("{}", frame);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub use xairlib_core::*;

pub use xairlib_xair::{
    ClientOptions, DeviceClient, DeviceScanner, DeviceSession, DeviceSupervisor, FleetManager,
    FleetManagerBuilder, FleetOptions, FleetSession, MeterRegistry, ScannerOptions,
    ScannerSession, Snapshot, Subscription, SupervisorState, TaskHandle,
};
pub use xairlib_xair::{builder, client, discovery, manager, scanner, supervisor};

/// OSC wire format: codec, meter frames, and well-known addresses.
pub mod osc {
    pub use xairlib_osc::*;
}

/// UDP transport used by sessions and discovery.
pub mod transport {
    pub use xairlib_transport::*;
}
