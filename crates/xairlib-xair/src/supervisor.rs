//! Lifecycle wrapper around one device session task.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use xairlib_core::DeviceIdentity;
use xairlib_core::error::Result;

use crate::client::{ClientOptions, DeviceClient};

/// Where a supervisor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SupervisorState {
    /// Created, session not yet running.
    Starting = 0,
    /// Session task is running.
    Running = 1,
    /// Cancellation requested, task not yet joined.
    Cancelling = 2,
    /// Task has been joined (or never started).
    Stopped = 3,
}

impl SupervisorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SupervisorState::Starting,
            1 => SupervisorState::Running,
            2 => SupervisorState::Cancelling,
            _ => SupervisorState::Stopped,
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Cancelling => "cancelling",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Owns one [`DeviceClient`]'s background session as a cancellable unit.
///
/// A supervisor may also exist without a session, purely to track when its
/// device was last sighted by discovery. Dropping a supervisor cancels its
/// session without waiting for it; use [`cancel`](Self::cancel) to wait.
pub struct DeviceSupervisor {
    identity: DeviceIdentity,
    client: Option<DeviceClient>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
    sighted: Instant,
}

impl DeviceSupervisor {
    /// An unconnected supervisor, sighted now.
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            client: None,
            task: None,
            cancel: CancellationToken::new(),
            state: Arc::new(AtomicU8::new(SupervisorState::Starting as u8)),
            sighted: Instant::now(),
        }
    }

    /// Create a supervisor and immediately [`connect`](Self::connect) it.
    pub async fn start(identity: DeviceIdentity, options: &ClientOptions) -> Result<Self> {
        let mut supervisor = Self::new(identity);
        supervisor.connect(options).await?;
        Ok(supervisor)
    }

    /// Bind a session for this device and spawn its run loop.
    ///
    /// Returns the existing client if already connected.
    pub async fn connect(&mut self, options: &ClientOptions) -> Result<DeviceClient> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        let (client, session) = DeviceClient::bind(self.identity.clone(), options).await?;
        self.task = Some(tokio::spawn(session.run(self.cancel.clone())));
        self.client = Some(client.clone());
        self.set_state(SupervisorState::Running);

        tracing::debug!(device = %self.identity, "Supervisor connected");
        Ok(client)
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The session handle, if connected.
    pub fn client(&self) -> Option<&DeviceClient> {
        self.client.as_ref()
    }

    pub fn state(&self) -> SupervisorState {
        SupervisorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Record that discovery has just seen this device.
    pub fn refresh(&mut self) {
        self.sighted = Instant::now();
    }

    /// True when neither discovery nor the session has heard from the
    /// device within `timeout`.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        let unsighted = self.sighted.elapsed() > timeout;
        let silent = self.client.as_ref().is_none_or(|c| c.is_stale(timeout));
        unsighted && silent
    }

    /// Request termination of the session.
    ///
    /// The session is signalled before this returns. Await the returned
    /// future before treating the device as gone; it resolves once the run
    /// loop has exited.
    pub fn cancel(&mut self) -> impl Future<Output = ()> + Send + 'static {
        let task = self.task.take();
        let state = Arc::clone(&self.state);
        let identity = self.identity.clone();

        if task.is_some() {
            self.set_state(SupervisorState::Cancelling);
        }
        self.cancel.cancel();

        async move {
            if let Some(task) = task {
                if let Err(e) = task.await {
                    tracing::warn!(device = %identity, error = %e, "Session task ended abnormally");
                }
            }
            state.store(SupervisorState::Stopped as u8, Ordering::Release);
            tracing::debug!(device = %identity, "Supervisor stopped");
        }
    }
}

impl Drop for DeviceSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for DeviceSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSupervisor")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("connected", &self.client.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xairlib_core::Error;
    use xairlib_test_harness::MockDevice;

    fn options() -> ClientOptions {
        ClientOptions {
            bind_addr: "127.0.0.1:0".into(),
            get_timeout: Duration::from_millis(100),
            ..ClientOptions::default()
        }
    }

    #[tokio::test]
    async fn lifecycle_moves_through_every_state() {
        let device = MockDevice::start().await.unwrap();
        device.respond("/status", vec!["active".into()]);

        let mut supervisor = DeviceSupervisor::new(device.identity());
        assert_eq!(supervisor.state(), SupervisorState::Starting);
        assert!(supervisor.client().is_none());

        let client = supervisor.connect(&options()).await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert!(client.get("/status").await.is_ok());

        let done = supervisor.cancel();
        assert_eq!(supervisor.state(), SupervisorState::Cancelling);
        done.await;
        assert_eq!(supervisor.state(), SupervisorState::Stopped);

        assert!(matches!(client.get("/other").await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn connect_twice_reuses_session() {
        let device = MockDevice::start().await.unwrap();
        let mut supervisor = DeviceSupervisor::start(device.identity(), &options())
            .await
            .unwrap();

        let first = supervisor.client().unwrap().local_addr();
        let again = supervisor.connect(&options()).await.unwrap();
        assert_eq!(again.local_addr(), first);

        supervisor.cancel().await;
    }

    #[tokio::test]
    async fn cancel_without_session_stops_immediately() {
        let device = MockDevice::start().await.unwrap();
        let mut supervisor = DeviceSupervisor::new(device.identity());
        supervisor.cancel().await;
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn staleness_requires_both_sources_silent() {
        let device = MockDevice::start().await.unwrap();
        let mut supervisor = DeviceSupervisor::new(device.identity());
        assert!(!supervisor.is_stale(Duration::from_millis(30)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(supervisor.is_stale(Duration::from_millis(30)));

        supervisor.refresh();
        assert!(!supervisor.is_stale(Duration::from_millis(30)));
    }

    #[tokio::test]
    async fn session_traffic_keeps_supervisor_fresh() {
        let device = MockDevice::start().await.unwrap();
        device.respond("/status", vec!["active".into()]);
        let mut supervisor = DeviceSupervisor::start(device.identity(), &options())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        supervisor.client().unwrap().get("/status").await.unwrap();

        // Discovery has not refreshed it, but the session just heard a reply.
        assert!(!supervisor.is_stale(Duration::from_millis(30)));
        supervisor.cancel().await;
    }
}
