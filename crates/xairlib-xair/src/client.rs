//! Per-device OSC session.
//!
//! A session is split in two halves, as in the single-IO-task pattern:
//!
//! - [`DeviceSession`] owns the UDP socket, the address cache, the meter
//!   registry, and the subscriber set. Its [`run`](DeviceSession::run) loop
//!   is the only code that touches that state.
//! - [`DeviceClient`] is a cheap, cloneable handle. Every operation is a
//!   [`Request`] sent to the session over a channel; replies come back on a
//!   oneshot.
//!
//! The mixer never acknowledges anything, so [`DeviceClient::get`] builds
//! request/response on top of the fan-out: it subscribes, sends a query,
//! and waits for a message on the same address, retrying a bounded number
//! of times.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use xairlib_core::error::{Error, Result};
use xairlib_core::{DeviceIdentity, OscArg, OscMessage};
use xairlib_osc::{XREMOTE_ADDRESS, codec, meters};
use xairlib_transport::UdpTransport;

use crate::meters::MeterRegistry;
use crate::subscription::{Subscribers, Subscription};

/// Largest datagram the session will read.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Tunables for one device session.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Local address to bind the session socket to.
    pub bind_addr: String,
    /// How long each `get` attempt waits for a reply.
    pub get_timeout: Duration,
    /// Total number of queries `get` sends before giving up.
    pub get_attempts: u32,
    /// Interval between `/xremote` heartbeats and meter refreshes.
    pub keepalive_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:0".into(),
            get_timeout: Duration::from_secs(1),
            get_attempts: 3,
            keepalive_interval: Duration::from_secs(8),
        }
    }
}

/// A request sent from [`DeviceClient`] handles to the session task.
pub(crate) enum Request {
    /// Transmit an already-encoded datagram.
    Send {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Cache, transmit, and fan out a locally originated write.
    Put {
        message: OscMessage,
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Lookup {
        address: String,
        reply: oneshot::Sender<Option<OscMessage>>,
    },
    Subscribe {
        meters: bool,
        reply: oneshot::Sender<(u64, mpsc::UnboundedReceiver<OscMessage>)>,
    },
    Unsubscribe {
        id: u64,
    },
    SubscriberCount {
        reply: oneshot::Sender<usize>,
    },
    EnableMeter {
        id: u32,
        channel: Option<i32>,
    },
    DisableMeter {
        id: u32,
        channel: Option<i32>,
    },
}

/// Handle to a running device session.
///
/// Cloning is cheap; all clones talk to the same session. Once the session
/// has been cancelled every async operation fails with
/// [`Error::NotConnected`].
#[derive(Debug, Clone)]
pub struct DeviceClient {
    identity: DeviceIdentity,
    local_addr: SocketAddr,
    requests: mpsc::UnboundedSender<Request>,
    last_seen: watch::Receiver<Instant>,
    get_timeout: Duration,
    get_attempts: u32,
}

impl DeviceClient {
    /// Bind a socket for `identity` and build the session and its handle.
    ///
    /// Nothing is sent until the returned [`DeviceSession`] is run.
    pub async fn bind(
        identity: DeviceIdentity,
        options: &ClientOptions,
    ) -> Result<(DeviceClient, DeviceSession)> {
        let transport = UdpTransport::bind(&options.bind_addr).await?;
        let local_addr = transport.local_addr();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (last_seen_tx, last_seen_rx) = watch::channel(Instant::now());

        tracing::debug!(
            device = %identity,
            local = %local_addr,
            "Device session bound"
        );

        let client = DeviceClient {
            identity: identity.clone(),
            local_addr,
            requests: requests_tx,
            last_seen: last_seen_rx,
            get_timeout: options.get_timeout,
            get_attempts: options.get_attempts.max(1),
        };
        let session = DeviceSession {
            device_addr: identity.socket_addr(),
            identity,
            transport,
            requests: requests_rx,
            cache: HashMap::new(),
            meters: MeterRegistry::new(),
            subscribers: Subscribers::new(),
            last_seen: last_seen_tx,
            keepalive_interval: options.keepalive_interval,
        };
        Ok((client, session))
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Local address of the session socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn request(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| Error::NotConnected)
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(build(reply_tx))?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    /// Encode and transmit `message` to the device. No reply is awaited.
    pub async fn send(&self, message: &OscMessage) -> Result<()> {
        let bytes = codec::encode(message)?;
        self.call(|reply| Request::Send { bytes, reply }).await?
    }

    /// Read `address`, from the cache if possible, otherwise by querying the
    /// device with the configured per-attempt timeout.
    pub async fn get(&self, address: &str) -> Result<OscMessage> {
        self.get_with_timeout(address, self.get_timeout).await
    }

    /// [`get`](Self::get) with an explicit per-attempt timeout.
    pub async fn get_with_timeout(&self, address: &str, timeout: Duration) -> Result<OscMessage> {
        if let Some(hit) = self.cached(address).await? {
            tracing::trace!(address = %address, "Cache hit");
            return Ok(hit);
        }

        let mut subscription = self.subscribe(false).await?;
        let query = OscMessage::query(address);
        let attempts = self.get_attempts;

        for attempt in 1..=attempts {
            self.send(&query).await?;
            let deadline = Instant::now() + timeout;

            loop {
                match tokio::time::timeout_at(deadline, subscription.recv()).await {
                    Ok(Some(message)) if message.address == address => {
                        tracing::info!(
                            device = %self.identity,
                            address = %address,
                            attempt,
                            "Get answered"
                        );
                        return Ok(message);
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => return Err(Error::NotConnected),
                    Err(_) => break,
                }
            }

            if attempt < attempts {
                tracing::warn!(
                    device = %self.identity,
                    address = %address,
                    attempt,
                    attempts,
                    "Get timed out, retrying"
                );
            } else {
                tracing::error!(
                    device = %self.identity,
                    address = %address,
                    attempt,
                    attempts,
                    "Get timed out on final attempt"
                );
            }
        }

        Err(Error::RequestTimeout {
            address: address.to_string(),
            attempts,
        })
    }

    /// Write `args` to `address`.
    ///
    /// The cache is updated and subscribers are notified before the device
    /// has seen the write. There is no confirmation from the mixer.
    pub async fn put(&self, address: &str, args: Vec<OscArg>) -> Result<()> {
        let message = OscMessage::new(address, args);
        let bytes = codec::encode(&message)?;
        tracing::info!(device = %self.identity, message = %message, "Put");
        self.call(|reply| Request::Put {
            message,
            bytes,
            reply,
        })
        .await?
    }

    /// Keep meter stream `id` alive from the next heartbeat on.
    pub fn enable_meter(&self, id: u32, channel: Option<i32>) -> Result<()> {
        self.request(Request::EnableMeter { id, channel })
    }

    /// Stop refreshing meter stream `id`; the mixer lets it lapse.
    pub fn disable_meter(&self, id: u32, channel: Option<i32>) -> Result<()> {
        self.request(Request::DisableMeter { id, channel })
    }

    /// Receive every message from now on. Meter frames are included only when
    /// `meters` is true.
    ///
    /// The subscription is removed when the returned handle is dropped.
    pub async fn subscribe(&self, meters: bool) -> Result<Subscription<OscMessage>> {
        let (id, rx) = self.call(|reply| Request::Subscribe { meters, reply }).await?;
        let requests = self.requests.clone();
        Ok(Subscription::new(id, rx, move |id| {
            let _ = requests.send(Request::Unsubscribe { id });
        }))
    }

    /// The cached message for `address`, without touching the network.
    pub async fn cached(&self, address: &str) -> Result<Option<OscMessage>> {
        let address = address.to_string();
        self.call(|reply| Request::Lookup { address, reply }).await
    }

    pub async fn subscriber_count(&self) -> Result<usize> {
        self.call(|reply| Request::SubscriberCount { reply }).await
    }

    /// When the last datagram arrived from the device (the bind time if none has).
    pub fn last_seen(&self) -> Instant {
        *self.last_seen.borrow()
    }

    /// True when nothing has been received from the device for longer than `timeout`.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_seen().elapsed() > timeout
    }
}

/// The task-owned half of a device session.
pub struct DeviceSession {
    identity: DeviceIdentity,
    device_addr: SocketAddr,
    transport: UdpTransport,
    requests: mpsc::UnboundedReceiver<Request>,
    cache: HashMap<String, OscMessage>,
    meters: MeterRegistry,
    subscribers: Subscribers<OscMessage, bool>,
    last_seen: watch::Sender<Instant>,
    keepalive_interval: Duration,
}

impl DeviceSession {
    /// Serve requests, send heartbeats, and dispatch inbound datagrams until
    /// `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::debug!(device = %self.identity, "Device session started");

        let mut keepalive = tokio::time::interval(self.keepalive_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut requests_open = true;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                request = self.requests.recv(), if requests_open => match request {
                    Some(request) => self.handle_request(request).await,
                    None => requests_open = false,
                },

                _ = keepalive.tick() => self.send_keepalive().await,

                received = self.transport.recv_from(&mut buf) => match received {
                    Ok((n, src)) => self.handle_datagram(&buf[..n], src),
                    Err(e) => {
                        tracing::debug!(device = %self.identity, error = %e, "Receive failed");
                    }
                },
            }
        }

        tracing::debug!(device = %self.identity, "Device session stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Send { bytes, reply } => {
                let result = self.transport.send_to(&bytes, self.device_addr).await;
                let _ = reply.send(result);
            }
            Request::Put {
                message,
                bytes,
                reply,
            } => {
                self.cache.insert(message.address.clone(), message.clone());
                let result = self.transport.send_to(&bytes, self.device_addr).await;
                self.subscribers.publish(&message, |_| true);
                let _ = reply.send(result);
            }
            Request::Lookup { address, reply } => {
                let _ = reply.send(self.cache.get(&address).cloned());
            }
            Request::Subscribe { meters, reply } => {
                let (id, rx) = self.subscribers.add(meters);
                tracing::trace!(device = %self.identity, subscription = id, meters, "Subscribed");
                let _ = reply.send((id, rx));
            }
            Request::Unsubscribe { id } => {
                if self.subscribers.remove(id) {
                    tracing::trace!(device = %self.identity, subscription = id, "Unsubscribed");
                }
            }
            Request::SubscriberCount { reply } => {
                let _ = reply.send(self.subscribers.len());
            }
            Request::EnableMeter { id, channel } => {
                tracing::debug!(device = %self.identity, meter = id, ?channel, "Meter enabled");
                self.meters.enable(id, channel);
            }
            Request::DisableMeter { id, channel } => {
                if self.meters.disable(id, channel) {
                    tracing::debug!(device = %self.identity, meter = id, ?channel, "Meter disabled");
                }
            }
        }
    }

    async fn send_keepalive(&self) {
        let mut outgoing = vec![OscMessage::query(XREMOTE_ADDRESS)];
        outgoing.extend(
            self.meters
                .requests()
                .map(|args| OscMessage::new(meters::METERS_ADDRESS, args.clone())),
        );

        for message in &outgoing {
            let bytes = match codec::encode(message) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(device = %self.identity, message = %message, error = %e, "Cannot encode keep-alive");
                    continue;
                }
            };
            if let Err(e) = self.transport.send_to(&bytes, self.device_addr).await {
                tracing::warn!(device = %self.identity, error = %e, "Keep-alive send failed");
            }
        }
        tracing::trace!(device = %self.identity, meters = self.meters.len(), "Keep-alive sent");
    }

    fn handle_datagram(&mut self, data: &[u8], src: SocketAddr) {
        if src != self.device_addr {
            tracing::trace!(device = %self.identity, src = %src, "Dropping datagram from foreign source");
            return;
        }
        self.last_seen.send_replace(Instant::now());

        let message = match codec::decode(data) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(device = %self.identity, error = %e, "Dropping undecodable datagram");
                return;
            }
        };

        if meters::is_meter_address(&message.address) {
            match meters::expand_message(message) {
                Ok(frame) => self.subscribers.publish(&frame, |wants| *wants),
                Err(e) => {
                    tracing::warn!(device = %self.identity, error = %e, "Dropping malformed meter frame");
                }
            }
            return;
        }

        tracing::trace!(device = %self.identity, message = %message, "Received");
        self.cache.insert(message.address.clone(), message.clone());
        self.subscribers.publish(&message, |_| true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;
    use tokio::task::JoinHandle;
    use xairlib_test_harness::MockDevice;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_options() -> ClientOptions {
        ClientOptions {
            bind_addr: "127.0.0.1:0".into(),
            get_timeout: Duration::from_millis(100),
            ..ClientOptions::default()
        }
    }

    struct Running {
        client: DeviceClient,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    async fn connect(device: &MockDevice, options: ClientOptions) -> Running {
        let (client, session) = DeviceClient::bind(device.identity(), &options)
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(cancel.clone()));
        Running {
            client,
            cancel,
            task,
        }
    }

    async fn recv(sub: &mut Subscription<OscMessage>) -> OscMessage {
        tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn get_returns_device_reply() {
        let device = MockDevice::start().await.unwrap();
        device.respond("/status", vec!["active".into()]);
        let running = connect(&device, fast_options()).await;

        let reply = running.client.get("/status").await.unwrap();
        assert_eq!(reply, OscMessage::new("/status", vec!["active".into()]));
    }

    #[tokio::test]
    async fn cached_get_sends_nothing() {
        let device = MockDevice::start().await.unwrap();
        device.respond("/status", vec!["active".into()]);
        let running = connect(&device, fast_options()).await;

        running.client.get("/status").await.unwrap();
        assert_eq!(device.query_count("/status"), 1);

        let again = running.client.get("/status").await.unwrap();
        assert_eq!(again.args, vec![OscArg::from("active")]);
        assert_eq!(device.query_count("/status"), 1);
    }

    #[tokio::test]
    async fn get_succeeds_on_third_attempt() {
        let device = MockDevice::start().await.unwrap();
        device.respond("/status", vec!["active".into()]);
        device.drop_queries("/status", 2);
        let running = connect(&device, fast_options()).await;

        let reply = running.client.get("/status").await.unwrap();
        assert_eq!(reply.args, vec![OscArg::from("active")]);
        assert_eq!(device.query_count("/status"), 3);
    }

    #[tokio::test]
    async fn get_ignores_unrelated_traffic() {
        let device = MockDevice::start().await.unwrap();
        device.respond("/status", vec!["active".into()]);
        device.drop_queries("/status", 1);
        let running = connect(&device, fast_options()).await;
        device.wait_for_peer(WAIT).await.unwrap();

        let chatter = async {
            for i in 0..20 {
                let level = OscArg::Float(i as f32 / 20.0);
                let fader = OscMessage::new("/ch/01/mix/fader", vec![level]);
                device.push(&fader).await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        let (reply, ()) = tokio::join!(
            running.client.get_with_timeout("/status", Duration::from_millis(150)),
            chatter
        );

        let reply = reply.unwrap();
        assert_eq!(reply.address, "/status");
        assert_eq!(reply.args, vec![OscArg::from("active")]);
        assert_eq!(device.query_count("/status"), 2);
    }

    #[tokio::test]
    async fn get_times_out_after_three_attempts() {
        let device = MockDevice::start().await.unwrap();
        let running = connect(&device, fast_options()).await;

        let err = running
            .client
            .get_with_timeout("/nothing", Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            Error::RequestTimeout { address, attempts } => {
                assert_eq!(address, "/nothing");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(device.query_count("/nothing"), 3);
        assert_eq!(running.client.subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn put_updates_cache_before_any_reply() {
        let device = MockDevice::start().await.unwrap();
        device.set_silent(true);
        let running = connect(&device, fast_options()).await;

        running
            .client
            .put("/lr/mix/on", vec![OscArg::Int(1)])
            .await
            .unwrap();

        let cached = running.client.cached("/lr/mix/on").await.unwrap();
        assert_eq!(cached, Some(OscMessage::new("/lr/mix/on", vec![OscArg::Int(1)])));

        let written = device
            .wait_for(WAIT, |m| m.address == "/lr/mix/on")
            .await
            .unwrap();
        assert_eq!(written.args, vec![OscArg::Int(1)]);
    }

    #[tokio::test]
    async fn put_fans_out_to_subscribers() {
        let device = MockDevice::start().await.unwrap();
        let running = connect(&device, fast_options()).await;
        let mut sub = running.client.subscribe(false).await.unwrap();

        running
            .client
            .put("/ch/01/mix/fader", vec![OscArg::Float(0.75)])
            .await
            .unwrap();

        let seen = recv(&mut sub).await;
        assert_eq!(seen.address, "/ch/01/mix/fader");
        assert_eq!(seen.args, vec![OscArg::Float(0.75)]);
    }

    #[tokio::test]
    async fn subscription_sees_only_messages_while_active() {
        let device = MockDevice::start().await.unwrap();
        let running = connect(&device, fast_options()).await;
        device.wait_for_peer(WAIT).await.unwrap();

        let before = OscMessage::new("/ch/01/mix/on", vec![OscArg::Int(0)]);
        device.push(&before).await.unwrap();
        while running.client.cached("/ch/01/mix/on").await.unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut sub = running.client.subscribe(false).await.unwrap();
        let first = OscMessage::new("/ch/02/mix/on", vec![OscArg::Int(1)]);
        let second = OscMessage::new("/ch/03/mix/on", vec![OscArg::Int(1)]);
        device.push(&first).await.unwrap();
        device.push(&second).await.unwrap();

        // `before` arrived ahead of the subscription and must not be replayed.
        assert_eq!(recv(&mut sub).await, first);
        assert_eq!(recv(&mut sub).await, second);
        assert!(sub.try_recv().is_none());

        assert_eq!(running.client.subscriber_count().await.unwrap(), 1);
        drop(sub);
        assert_eq!(running.client.subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn meter_frames_reach_only_meter_subscribers() {
        let device = MockDevice::start().await.unwrap();
        let running = connect(&device, fast_options()).await;
        device.wait_for_peer(WAIT).await.unwrap();

        let mut metered = running.client.subscribe(true).await.unwrap();
        let mut plain = running.client.subscribe(false).await.unwrap();

        let frame = OscMessage::new(
            "/meters/2",
            vec![OscArg::Blob(vec![2, 0, 0, 0, 0xE8, 0x03, 0x18, 0xFC])],
        );
        device.push(&frame).await.unwrap();
        let marker = OscMessage::new("/lr/mix/on", vec![OscArg::Int(1)]);
        device.push(&marker).await.unwrap();

        let samples = recv(&mut metered).await;
        assert_eq!(samples.address, "/meters/2");
        assert_eq!(samples.args, vec![OscArg::Int(1000), OscArg::Int(-1000)]);
        assert_eq!(recv(&mut metered).await, marker);

        assert_eq!(recv(&mut plain).await, marker);
        assert_eq!(running.client.cached("/meters/2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn enabled_meter_is_requested_on_keepalive() {
        let device = MockDevice::start().await.unwrap();
        let options = ClientOptions {
            keepalive_interval: Duration::from_millis(50),
            ..fast_options()
        };
        let running = connect(&device, options).await;

        running.client.enable_meter(2, None).unwrap();

        let request = device
            .wait_for(WAIT, |m| {
                m.address == "/meters" && m.args.first().and_then(OscArg::as_str) == Some("/meters/2")
            })
            .await;
        assert!(request.is_some());
        assert!(device.query_count("/xremote") >= 1);
    }

    #[tokio::test]
    async fn datagrams_from_other_sources_are_dropped() {
        let device = MockDevice::start().await.unwrap();
        let running = connect(&device, fast_options()).await;
        device.wait_for_peer(WAIT).await.unwrap();
        let mut sub = running.client.subscribe(false).await.unwrap();

        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let spoof = OscMessage::new("/lr/mix/fader", vec![OscArg::Float(1.0)]);
        stranger
            .send_to(&codec::encode(&spoof).unwrap(), running.client.local_addr())
            .await
            .unwrap();

        let marker = OscMessage::new("/lr/mix/on", vec![OscArg::Int(0)]);
        device.push(&marker).await.unwrap();

        assert_eq!(recv(&mut sub).await, marker);
        assert_eq!(running.client.cached("/lr/mix/fader").await.unwrap(), None);
    }

    #[tokio::test]
    async fn undecodable_datagram_does_not_stop_session() {
        let device = MockDevice::start().await.unwrap();
        let running = connect(&device, fast_options()).await;
        device.wait_for_peer(WAIT).await.unwrap();
        let mut sub = running.client.subscribe(false).await.unwrap();

        device.push_raw(b"/broken").await.unwrap();
        let marker = OscMessage::new("/lr/mix/on", vec![OscArg::Int(1)]);
        device.push(&marker).await.unwrap();

        assert_eq!(recv(&mut sub).await, marker);
    }

    #[tokio::test]
    async fn staleness_tracks_inbound_traffic() {
        let device = MockDevice::start().await.unwrap();
        let running = connect(&device, fast_options()).await;
        device.wait_for_peer(WAIT).await.unwrap();
        let mut sub = running.client.subscribe(false).await.unwrap();

        device
            .push(&OscMessage::new("/lr/mix/on", vec![OscArg::Int(1)]))
            .await
            .unwrap();
        recv(&mut sub).await;
        assert!(!running.client.is_stale(Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(running.client.is_stale(Duration::from_millis(30)));
    }

    #[tokio::test]
    async fn cancelled_session_rejects_requests() {
        let device = MockDevice::start().await.unwrap();
        let running = connect(&device, fast_options()).await;

        running.cancel.cancel();
        running.task.await.unwrap();

        assert!(matches!(
            running.client.get("/status").await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            running.client.enable_meter(1, None),
            Err(Error::NotConnected)
        ));
    }
}
