//! Continuous discovery and membership tracking.
//!
//! [`ScannerSession`] periodically sends `/xinfo` to its targets, keeps one
//! [`DeviceSupervisor`] per mixer that answers, and retires supervisors
//! whose device has gone quiet. Every time the set of tracked identities
//! changes it publishes a [`Snapshot`] to subscribers.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use xairlib_core::error::{Error, Result};
use xairlib_core::{DeviceIdentity, OscMessage};
use xairlib_osc::codec;
use xairlib_transport::UdpTransport;

use crate::client::{ClientOptions, DeviceClient, RECV_BUFFER_SIZE};
use crate::discovery::{self, DEFAULT_TARGET};
use crate::subscription::{Subscribers, Subscription};
use crate::supervisor::DeviceSupervisor;
use crate::task::TaskHandle;

/// The set of identities currently tracked.
pub type Snapshot = BTreeSet<DeviceIdentity>;

/// Scanner configuration.
#[derive(Debug, Clone)]
pub struct ScannerOptions {
    /// Local address for the discovery socket.
    pub bind_addr: String,
    /// Where each `/xinfo` request is sent.
    pub targets: Vec<SocketAddr>,
    pub broadcast_period: Duration,
    /// A device unheard for longer than this is dropped.
    pub stale_timeout: Duration,
    /// Start a session for each newly discovered device.
    pub connect: bool,
    /// Meter ids enabled on each new session (only used with `connect`).
    pub meters: Vec<u32>,
    /// Options for sessions started when `connect` is set.
    pub client: ClientOptions,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:0".into(),
            targets: vec![DEFAULT_TARGET],
            broadcast_period: Duration::from_secs(10),
            stale_timeout: Duration::from_secs(30),
            connect: false,
            meters: Vec::new(),
            client: ClientOptions::default(),
        }
    }
}

enum ScanRequest {
    Subscribe {
        reply: oneshot::Sender<(u64, mpsc::UnboundedReceiver<Snapshot>)>,
    },
    Unsubscribe {
        id: u64,
    },
    Get {
        identity: DeviceIdentity,
        reply: oneshot::Sender<Result<DeviceClient>>,
    },
    List {
        reply: oneshot::Sender<Snapshot>,
    },
}

/// Handle to a running scanner.
#[derive(Debug, Clone)]
pub struct DeviceScanner {
    requests: mpsc::UnboundedSender<ScanRequest>,
    local_addr: SocketAddr,
}

impl DeviceScanner {
    /// Bind the discovery socket and build the scanner and its session.
    pub async fn bind(options: ScannerOptions) -> Result<(DeviceScanner, ScannerSession)> {
        let transport = discovery::bind_discovery_socket(&options.bind_addr).await?;
        let local_addr = transport.local_addr();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();

        tracing::debug!(
            local = %local_addr,
            targets = ?options.targets,
            "Scanner bound"
        );

        let scanner = DeviceScanner {
            requests: requests_tx,
            local_addr,
        };
        let session = ScannerSession {
            transport,
            options,
            requests: requests_rx,
            supervisors: HashMap::new(),
            published: Snapshot::new(),
            subscribers: Subscribers::new(),
        };
        Ok((scanner, session))
    }

    /// Bind and run the scanner on a background task.
    pub async fn spawn(options: ScannerOptions) -> Result<(DeviceScanner, TaskHandle)> {
        let (scanner, session) = Self::bind(options).await?;
        let handle = TaskHandle::spawn(move |cancel| session.run(cancel));
        Ok((scanner, handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> ScanRequest) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(build(reply_tx))
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    /// Receive a snapshot each time the tracked set changes.
    ///
    /// Membership already published before subscribing is not replayed;
    /// call [`list`](Self::list) for the current set.
    pub async fn subscribe(&self) -> Result<Subscription<Snapshot>> {
        let (id, rx) = self.call(|reply| ScanRequest::Subscribe { reply }).await?;
        let requests = self.requests.clone();
        Ok(Subscription::new(id, rx, move |id| {
            let _ = requests.send(ScanRequest::Unsubscribe { id });
        }))
    }

    /// The session for a tracked device.
    ///
    /// Fails with [`Error::IdentityNotFound`] for an untracked identity and
    /// [`Error::NotConnected`] if the scanner does not start sessions.
    pub async fn get(&self, identity: &DeviceIdentity) -> Result<DeviceClient> {
        let identity = identity.clone();
        self.call(|reply| ScanRequest::Get { identity, reply }).await?
    }

    pub async fn list(&self) -> Result<Snapshot> {
        self.call(|reply| ScanRequest::List { reply }).await
    }
}

/// The task-owned half of a scanner.
pub struct ScannerSession {
    transport: UdpTransport,
    options: ScannerOptions,
    requests: mpsc::UnboundedReceiver<ScanRequest>,
    supervisors: HashMap<DeviceIdentity, DeviceSupervisor>,
    published: Snapshot,
    subscribers: Subscribers<Snapshot>,
}

impl ScannerSession {
    /// Broadcast, track replies, and age out silent devices until `cancel`
    /// fires. Every supervisor is cancelled and awaited before returning.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::debug!(
            period_ms = self.options.broadcast_period.as_millis(),
            "Scanner started"
        );

        let mut ticker = tokio::time::interval(self.options.broadcast_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut requests_open = true;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                request = self.requests.recv(), if requests_open => match request {
                    Some(request) => self.handle_request(request),
                    None => requests_open = false,
                },

                _ = ticker.tick() => {
                    self.retire_stale().await;
                    discovery::send_probe(&self.transport, &self.options.targets).await;
                }

                received = self.transport.recv_from(&mut buf) => match received {
                    Ok((n, src)) => self.handle_datagram(&buf[..n], src).await,
                    Err(e) => tracing::debug!(error = %e, "Scanner receive failed"),
                },
            }
        }

        for (_, mut supervisor) in self.supervisors.drain() {
            supervisor.cancel().await;
        }
        tracing::debug!("Scanner stopped");
    }

    fn handle_request(&mut self, request: ScanRequest) {
        match request {
            ScanRequest::Subscribe { reply } => {
                let _ = reply.send(self.subscribers.add(()));
            }
            ScanRequest::Unsubscribe { id } => {
                self.subscribers.remove(id);
            }
            ScanRequest::Get { identity, reply } => {
                let result = match self.supervisors.get(&identity) {
                    None => Err(Error::IdentityNotFound(identity)),
                    Some(supervisor) => supervisor.client().cloned().ok_or(Error::NotConnected),
                };
                let _ = reply.send(result);
            }
            ScanRequest::List { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        self.supervisors.keys().cloned().collect()
    }

    /// Publish the tracked set if it differs from the last one published.
    fn notify(&mut self) {
        let current = self.snapshot();
        if current != self.published {
            tracing::debug!(devices = current.len(), "Membership changed");
            self.subscribers.publish(&current, |_| true);
            self.published = current;
        }
    }

    async fn retire_stale(&mut self) {
        let timeout = self.options.stale_timeout;
        let stale: Vec<DeviceIdentity> = self
            .supervisors
            .iter()
            .filter(|(_, supervisor)| supervisor.is_stale(timeout))
            .map(|(identity, _)| identity.clone())
            .collect();

        for identity in stale {
            if let Some(supervisor) = self.supervisors.get_mut(&identity) {
                supervisor.cancel().await;
            }
            self.supervisors.remove(&identity);
            tracing::info!(device = %identity, "Device went stale");
            self.notify();
        }
    }

    async fn handle_datagram(&mut self, data: &[u8], src: SocketAddr) {
        let message = match codec::decode(data) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(src = %src, error = %e, "Dropping undecodable discovery datagram");
                return;
            }
        };
        if message.is_query() {
            // Our own broadcast, looped back.
            return;
        }
        self.handle_reply(&message, src).await;
    }

    async fn handle_reply(&mut self, message: &OscMessage, src: SocketAddr) {
        let identity = match discovery::identity_from_reply(message, src) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::debug!(src = %src, error = %e, "Ignoring discovery datagram");
                return;
            }
        };

        if let Some(supervisor) = self.supervisors.get_mut(&identity) {
            supervisor.refresh();
            return;
        }

        let supervisor = if self.options.connect {
            match DeviceSupervisor::start(identity.clone(), &self.options.client).await {
                Ok(supervisor) => {
                    if let Some(client) = supervisor.client() {
                        for &meter in &self.options.meters {
                            let _ = client.enable_meter(meter, None);
                        }
                    }
                    supervisor
                }
                Err(e) => {
                    tracing::warn!(device = %identity, error = %e, "Failed to start device session");
                    return;
                }
            }
        } else {
            DeviceSupervisor::new(identity.clone())
        };

        tracing::info!(device = %identity, "Device discovered");
        self.supervisors.insert(identity, supervisor);
        self.notify();
    }
}
