//! Mock mixer for protocol-level testing.
//!
//! [`MockDevice`] binds a UDP socket on localhost and behaves like a very
//! small X-Air: it answers `/xinfo` discovery requests, answers queries for
//! scripted addresses, remembers writes, and records every message it
//! receives so tests can assert on wire traffic.
//!
//! # Example
//!
//! ```
//! use xairlib_core::OscArg;
//! use xairlib_test_harness::MockDevice;
//!
//! # async fn example() -> xairlib_core::Result<()> {
//! let device = MockDevice::start().await?;
//! device.announce("XR18-00-00-00", "XR18", "1.17");
//! device.respond("/status", vec![OscArg::from("active")]);
//!
//! let identity = device.identity();
//! // ... point a DeviceClient at `identity` ...
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use xairlib_core::error::{Error, Result};
use xairlib_core::{DeviceIdentity, OscArg, OscMessage};
use xairlib_osc::{XINFO_ADDRESS, codec};

/// Name/model/version reported in `/xinfo` replies.
#[derive(Debug, Clone)]
struct Announcement {
    name: String,
    model: String,
    version: String,
}

#[derive(Debug, Default)]
struct MockState {
    /// Address -> arguments returned for a query on that address.
    values: HashMap<String, Vec<OscArg>>,
    /// Address -> number of upcoming queries to ignore.
    drops: HashMap<String, u32>,
    announcement: Option<Announcement>,
    /// When set, nothing is answered (messages are still recorded).
    silent: bool,
    /// Last sender of non-discovery traffic; target of [`MockDevice::push`].
    peer: Option<SocketAddr>,
    received: Vec<OscMessage>,
}

/// A mock mixer listening on a random loopback UDP port.
///
/// The serving task is aborted when the mock is dropped.
pub struct MockDevice {
    addr: SocketAddr,
    socket: Arc<UdpSocket>,
    state: Arc<Mutex<MockState>>,
    task: JoinHandle<()>,
}

impl MockDevice {
    /// Bind to `127.0.0.1:0` and start serving.
    pub async fn start() -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock device: {}", e)))?;
        let addr = socket.local_addr().map_err(Error::Io)?;
        let socket = Arc::new(socket);
        let state = Arc::new(Mutex::new(MockState::default()));

        let task = tokio::spawn(serve(Arc::clone(&socket), Arc::clone(&state)));
        tracing::debug!(addr = %addr, "Mock device started");

        Ok(Self {
            addr,
            socket,
            state,
            task,
        })
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only happens if a test already panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The address the mock is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The identity a scanner will derive from this mock's `/xinfo` reply.
    ///
    /// Uses the announced name/model/version, or placeholders if
    /// [`announce`](Self::announce) has not been called.
    pub fn identity(&self) -> DeviceIdentity {
        let announcement = self.state().announcement.clone();
        let (name, model, version) = match announcement {
            Some(a) => (a.name, a.model, a.version),
            None => ("MOCK".into(), "XR18".into(), "0.0".into()),
        };
        DeviceIdentity::new(self.addr.ip(), self.addr.port(), name, model, version)
    }

    /// Answer `/xinfo` with the given name, model, and version.
    pub fn announce(&self, name: &str, model: &str, version: &str) {
        self.state().announcement = Some(Announcement {
            name: name.into(),
            model: model.into(),
            version: version.into(),
        });
    }

    /// Answer queries on `address` with `args`.
    pub fn respond(&self, address: &str, args: Vec<OscArg>) {
        self.state().values.insert(address.into(), args);
    }

    /// Ignore the next `count` queries on `address`.
    pub fn drop_queries(&self, address: &str, count: u32) {
        self.state().drops.insert(address.into(), count);
    }

    /// Stop (or resume) answering anything, including discovery.
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Every message received so far, in arrival order.
    pub fn received(&self) -> Vec<OscMessage> {
        self.state().received.clone()
    }

    /// Number of no-argument queries received for `address`.
    pub fn query_count(&self, address: &str) -> usize {
        self.state()
            .received
            .iter()
            .filter(|m| m.address == address && m.is_query())
            .count()
    }

    /// Poll until a received message satisfies `pred`, or `timeout` elapses.
    pub async fn wait_for<F>(&self, timeout: Duration, pred: F) -> Option<OscMessage>
    where
        F: Fn(&OscMessage) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(found) = self.state().received.iter().find(|m| pred(m)).cloned() {
                return Some(found);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until some client has sent control traffic, so pushes have a target.
    pub async fn wait_for_peer(&self, timeout: Duration) -> Option<SocketAddr> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(peer) = self.state().peer {
                return Some(peer);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Send an unsolicited message to the last client that talked to us.
    pub async fn push(&self, message: &OscMessage) -> Result<()> {
        let bytes = codec::encode(message)?;
        self.push_raw(&bytes).await
    }

    /// Send raw bytes to the last client that talked to us.
    pub async fn push_raw(&self, bytes: &[u8]) -> Result<()> {
        let peer = self.state().peer.ok_or(Error::NotConnected)?;
        self.socket.send_to(bytes, peer).await.map_err(Error::Io)?;
        Ok(())
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serving loop: record, then answer according to the scripted state.
async fn serve(socket: Arc<UdpSocket>, state: Arc<Mutex<MockState>>) {
    let mut buf = [0u8; 4096];

    loop {
        let (n, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::trace!(error = %e, "Mock device recv error");
                continue;
            }
        };

        let message = match codec::decode(&buf[..n]) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = %e, "Mock device got undecodable datagram");
                continue;
            }
        };

        let reply = {
            let mut s = state.lock().unwrap_or_else(|e| e.into_inner());
            s.received.push(message.clone());
            if message.address != XINFO_ADDRESS {
                s.peer = Some(src);
            }
            reply_for(&mut s, &message, socket_ip(&socket))
        };

        if let Some(reply) = reply {
            match codec::encode(&reply) {
                Ok(bytes) => {
                    let _ = socket.send_to(&bytes, src).await;
                }
                Err(e) => tracing::debug!(error = %e, "Mock device failed to encode reply"),
            }
        }
    }
}

fn socket_ip(socket: &UdpSocket) -> String {
    socket
        .local_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_default()
}

fn reply_for(state: &mut MockState, message: &OscMessage, ip: String) -> Option<OscMessage> {
    if state.silent {
        return None;
    }

    if message.address == XINFO_ADDRESS {
        let a = state.announcement.as_ref()?;
        return Some(OscMessage::new(
            XINFO_ADDRESS,
            vec![
                OscArg::String(ip),
                OscArg::String(a.name.clone()),
                OscArg::String(a.model.clone()),
                OscArg::String(a.version.clone()),
            ],
        ));
    }

    if !message.is_query() {
        // A write: remember it so later queries see the new value.
        state
            .values
            .insert(message.address.clone(), message.args.clone());
        return None;
    }

    if let Some(remaining) = state.drops.get_mut(&message.address) {
        if *remaining > 0 {
            *remaining -= 1;
            return None;
        }
    }

    state
        .values
        .get(&message.address)
        .map(|args| OscMessage::new(message.address.clone(), args.clone()))
}
