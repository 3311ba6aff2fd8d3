//! FleetManagerBuilder -- fluent builder for [`FleetManager`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use xairlib_xair::builder::FleetManagerBuilder;
//!
//! # async fn example() -> xairlib_core::Result<()> {
//! let (fleet, handle) = FleetManagerBuilder::new()
//!     .broadcast_period(Duration::from_secs(5))
//!     .get_timeout(Duration::from_millis(500))
//!     .spawn()
//!     .await?;
//!
//! for identity in fleet.list_identities().await? {
//!     println!("{}", identity);
//! }
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use xairlib_core::error::Result;

use crate::manager::{FleetManager, FleetOptions, FleetSession};
use crate::task::TaskHandle;

/// Fluent builder for [`FleetManager`].
///
/// Every setting has a default (see [`FleetOptions::default`]), so
/// `FleetManagerBuilder::new().spawn().await?` scans the local broadcast
/// domain with stock timings.
#[derive(Debug, Clone, Default)]
pub struct FleetManagerBuilder {
    options: FleetOptions,
    custom_targets: bool,
}

impl FleetManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local address for the discovery socket (default: `0.0.0.0:0`).
    pub fn discovery_bind_addr(mut self, addr: &str) -> Self {
        self.options.scanner.bind_addr = addr.to_string();
        self
    }

    /// Local address for each device session socket (default: `0.0.0.0:0`).
    pub fn session_bind_addr(mut self, addr: &str) -> Self {
        self.options.client.bind_addr = addr.to_string();
        self
    }

    /// Add a discovery target.
    ///
    /// The first call replaces the default limited-broadcast target.
    pub fn target(mut self, target: SocketAddr) -> Self {
        if !self.custom_targets {
            self.options.scanner.targets.clear();
            self.custom_targets = true;
        }
        self.options.scanner.targets.push(target);
        self
    }

    /// Replace all discovery targets.
    pub fn targets(mut self, targets: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.options.scanner.targets = targets.into_iter().collect();
        self.custom_targets = true;
        self
    }

    /// Interval between discovery broadcasts (default: 10s).
    pub fn broadcast_period(mut self, period: Duration) -> Self {
        self.options.scanner.broadcast_period = period;
        self
    }

    /// How long a device may stay silent before it is dropped (default: 30s).
    pub fn stale_timeout(mut self, timeout: Duration) -> Self {
        self.options.scanner.stale_timeout = timeout;
        self
    }

    /// Per-attempt `get` timeout for every session (default: 1s).
    pub fn get_timeout(mut self, timeout: Duration) -> Self {
        self.options.client.get_timeout = timeout;
        self
    }

    /// Total `get` attempts for every session (default: 3).
    pub fn get_attempts(mut self, attempts: u32) -> Self {
        self.options.client.get_attempts = attempts;
        self
    }

    /// Heartbeat and meter refresh interval for every session (default: 8s).
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.options.client.keepalive_interval = interval;
        self
    }

    /// The options this builder would construct the manager with.
    pub fn options(&self) -> &FleetOptions {
        &self.options
    }

    /// Bind the manager without starting it.
    pub async fn build(self) -> Result<(FleetManager, FleetSession)> {
        FleetManager::bind(self.options).await
    }

    /// Bind the manager and run it on a background task.
    pub async fn spawn(self) -> Result<(FleetManager, TaskHandle)> {
        FleetManager::spawn(self.options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DEFAULT_TARGET;

    #[test]
    fn defaults_match_options() {
        let builder = FleetManagerBuilder::new();
        let options = builder.options();
        assert_eq!(options.scanner.targets, vec![DEFAULT_TARGET]);
        assert_eq!(options.scanner.broadcast_period, Duration::from_secs(10));
        assert_eq!(options.scanner.stale_timeout, Duration::from_secs(30));
        assert_eq!(options.client.get_timeout, Duration::from_secs(1));
        assert_eq!(options.client.get_attempts, 3);
        assert_eq!(options.client.keepalive_interval, Duration::from_secs(8));
    }

    #[test]
    fn first_target_replaces_broadcast_default() {
        let a: SocketAddr = "192.168.1.255:10024".parse().unwrap();
        let b: SocketAddr = "10.0.0.7:10024".parse().unwrap();
        let builder = FleetManagerBuilder::new().target(a).target(b);
        assert_eq!(builder.options().scanner.targets, vec![a, b]);
    }

    #[test]
    fn setters_reach_nested_options() {
        let builder = FleetManagerBuilder::new()
            .discovery_bind_addr("127.0.0.1:0")
            .session_bind_addr("127.0.0.1:0")
            .stale_timeout(Duration::from_secs(5))
            .get_attempts(5)
            .keepalive_interval(Duration::from_secs(4));
        let options = builder.options();
        assert_eq!(options.scanner.bind_addr, "127.0.0.1:0");
        assert_eq!(options.client.bind_addr, "127.0.0.1:0");
        assert_eq!(options.scanner.stale_timeout, Duration::from_secs(5));
        assert_eq!(options.client.get_attempts, 5);
        assert_eq!(options.client.keepalive_interval, Duration::from_secs(4));
    }

    #[tokio::test]
    async fn spawn_and_shutdown() {
        let (fleet, handle) = FleetManagerBuilder::new()
            .discovery_bind_addr("127.0.0.1:0")
            .targets([])
            .spawn()
            .await
            .unwrap();
        assert!(fleet.list_identities().await.unwrap().is_empty());
        handle.shutdown().await;
    }
}
