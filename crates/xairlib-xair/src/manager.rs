//! Fleet supervision: one live session per discovered mixer.
//!
//! A [`FleetSession`] runs its own non-connecting [`DeviceScanner`] and
//! follows its snapshots. Each identity that appears gets a connected
//! [`DeviceSupervisor`]; each identity that disappears has its supervisor
//! cancelled and awaited before it leaves the directory. Subscribers see a
//! snapshot whenever the directory's membership changes.
//!
//! An identity whose session fails to start is retried once per broadcast
//! period for as long as the scanner keeps reporting it.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use xairlib_core::DeviceIdentity;
use xairlib_core::error::{Error, Result};

use crate::client::{ClientOptions, DeviceClient};
use crate::scanner::{DeviceScanner, ScannerOptions, ScannerSession, Snapshot};
use crate::subscription::{Subscribers, Subscription};
use crate::supervisor::DeviceSupervisor;
use crate::task::TaskHandle;

/// Fleet manager configuration.
#[derive(Debug, Clone, Default)]
pub struct FleetOptions {
    /// Discovery settings. `connect` and `meters` are ignored: the manager
    /// runs its own sessions.
    pub scanner: ScannerOptions,
    /// Options for every device session the manager starts.
    pub client: ClientOptions,
}

enum FleetRequest {
    Subscribe {
        reply: oneshot::Sender<(u64, mpsc::UnboundedReceiver<Snapshot>)>,
    },
    Unsubscribe {
        id: u64,
    },
    GetClient {
        identity: DeviceIdentity,
        reply: oneshot::Sender<Result<DeviceClient>>,
    },
    List {
        reply: oneshot::Sender<Snapshot>,
    },
}

/// Handle to a running fleet manager.
#[derive(Debug, Clone)]
pub struct FleetManager {
    requests: mpsc::UnboundedSender<FleetRequest>,
}

impl FleetManager {
    /// Bind the discovery socket and build the manager and its session.
    pub async fn bind(options: FleetOptions) -> Result<(FleetManager, FleetSession)> {
        let retry_interval = options.scanner.broadcast_period;
        let scanner_options = ScannerOptions {
            connect: false,
            meters: Vec::new(),
            ..options.scanner
        };
        let (scanner, scanner_session) = DeviceScanner::bind(scanner_options).await?;
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();

        let manager = FleetManager {
            requests: requests_tx,
        };
        let session = FleetSession {
            scanner,
            scanner_session: Some(scanner_session),
            client_options: options.client,
            requests: requests_rx,
            directory: HashMap::new(),
            pending: BTreeSet::new(),
            retry_interval,
            published: Snapshot::new(),
            subscribers: Subscribers::new(),
        };
        Ok((manager, session))
    }

    /// Bind and run the manager on a background task.
    pub async fn spawn(options: FleetOptions) -> Result<(FleetManager, TaskHandle)> {
        let (manager, session) = Self::bind(options).await?;
        let handle = TaskHandle::spawn(move |cancel| session.run(cancel));
        Ok((manager, handle))
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> FleetRequest) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(build(reply_tx))
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    /// The live session for `identity`.
    pub async fn get_client(&self, identity: &DeviceIdentity) -> Result<DeviceClient> {
        let identity = identity.clone();
        self.call(|reply| FleetRequest::GetClient { identity, reply })
            .await?
    }

    /// Identities that currently have a running session.
    pub async fn list_identities(&self) -> Result<Snapshot> {
        self.call(|reply| FleetRequest::List { reply }).await
    }

    /// Receive a snapshot each time the directory's membership changes.
    pub async fn subscribe(&self) -> Result<Subscription<Snapshot>> {
        let (id, rx) = self.call(|reply| FleetRequest::Subscribe { reply }).await?;
        let requests = self.requests.clone();
        Ok(Subscription::new(id, rx, move |id| {
            let _ = requests.send(FleetRequest::Unsubscribe { id });
        }))
    }
}

/// The task-owned half of a fleet manager.
pub struct FleetSession {
    scanner: DeviceScanner,
    scanner_session: Option<ScannerSession>,
    client_options: ClientOptions,
    requests: mpsc::UnboundedReceiver<FleetRequest>,
    directory: HashMap<DeviceIdentity, DeviceSupervisor>,
    /// Reported identities whose session could not be started.
    pending: BTreeSet<DeviceIdentity>,
    retry_interval: Duration,
    published: Snapshot,
    subscribers: Subscribers<Snapshot>,
}

impl FleetSession {
    /// Follow the scanner until `cancel` fires, then stop every session and
    /// the scanner itself.
    pub async fn run(mut self, cancel: CancellationToken) {
        let Some(scanner_session) = self.scanner_session.take() else {
            return;
        };
        let scanner_task = TaskHandle::spawn(move |token| scanner_session.run(token));

        let mut snapshots = match self.scanner.subscribe().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                tracing::error!(error = %e, "Cannot subscribe to scanner");
                scanner_task.shutdown().await;
                return;
            }
        };
        // Anything the scanner found before the subscription took effect.
        if let Ok(current) = self.scanner.list().await {
            self.reconcile(current).await;
        }

        tracing::debug!("Fleet manager started");
        let mut requests_open = true;
        let mut scanner_open = true;
        let mut retry = tokio::time::interval(self.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        retry.reset();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                request = self.requests.recv(), if requests_open => match request {
                    Some(request) => self.handle_request(request),
                    None => requests_open = false,
                },

                snapshot = snapshots.recv(), if scanner_open => match snapshot {
                    Some(snapshot) => self.reconcile(snapshot).await,
                    None => {
                        tracing::warn!("Scanner stopped unexpectedly");
                        scanner_open = false;
                    }
                },

                _ = retry.tick(), if !self.pending.is_empty() => {
                    tracing::debug!(pending = self.pending.len(), "Retrying device sessions");
                    if let Ok(current) = self.scanner.list().await {
                        self.reconcile(current).await;
                    }
                }
            }
        }

        drop(snapshots);
        for (_, mut supervisor) in self.directory.drain() {
            supervisor.cancel().await;
        }
        scanner_task.shutdown().await;
        tracing::debug!("Fleet manager stopped");
    }

    fn handle_request(&mut self, request: FleetRequest) {
        match request {
            FleetRequest::Subscribe { reply } => {
                let _ = reply.send(self.subscribers.add(()));
            }
            FleetRequest::Unsubscribe { id } => {
                self.subscribers.remove(id);
            }
            FleetRequest::GetClient { identity, reply } => {
                let result = match self.directory.get(&identity) {
                    None => Err(Error::IdentityNotFound(identity)),
                    Some(supervisor) => supervisor.client().cloned().ok_or(Error::NotConnected),
                };
                let _ = reply.send(result);
            }
            FleetRequest::List { reply } => {
                let _ = reply.send(self.directory.keys().cloned().collect());
            }
        }
    }

    /// Bring the directory in line with `snapshot`.
    async fn reconcile(&mut self, snapshot: Snapshot) {
        let removed: Vec<DeviceIdentity> = self
            .directory
            .keys()
            .filter(|identity| !snapshot.contains(*identity))
            .cloned()
            .collect();

        for identity in removed {
            if let Some(supervisor) = self.directory.get_mut(&identity) {
                supervisor.cancel().await;
            }
            self.directory.remove(&identity);
            tracing::info!(device = %identity, "Device left fleet");
        }
        self.pending.retain(|identity| snapshot.contains(identity));

        for identity in snapshot {
            if self.directory.contains_key(&identity) {
                continue;
            }
            match DeviceSupervisor::start(identity.clone(), &self.client_options).await {
                Ok(supervisor) => {
                    tracing::info!(device = %identity, "Device joined fleet");
                    self.pending.remove(&identity);
                    self.directory.insert(identity, supervisor);
                }
                Err(e) => {
                    if self.pending.insert(identity.clone()) {
                        tracing::warn!(device = %identity, error = %e, "Failed to start device session");
                    } else {
                        tracing::debug!(device = %identity, error = %e, "Device session still failing");
                    }
                }
            }
        }

        let current: Snapshot = self.directory.keys().cloned().collect();
        if current != self.published {
            self.subscribers.publish(&current, |_| true);
            self.published = current;
        }
    }
}
