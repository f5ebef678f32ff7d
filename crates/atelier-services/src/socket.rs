//! Push-channel connection manager.
//!
//! One [`SocketManager`] per process owns the connection lifecycle. It
//! connects when a token is available, heartbeats while open, and after an
//! unexpected close retries on a fixed interval up to a capped number of
//! attempts. Task updates from the server fan out to observers registered
//! with [`SocketManager::on_task_update`].
//!
//! Every connect attempt and every manual disconnect bumps an epoch.
//! Events from a connection whose epoch is stale are ignored, so a late
//! close from a replaced connection cannot schedule a reconnect.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use atelier_core::config::AtelierConfig;
use atelier_core::wire::{push_url, ClientFrame, ServerFrame};
use atelier_core::{TaskId, TaskUpdate};

use crate::api::TokenSource;
use crate::observers::{ObserverHandle, Observers};
use crate::transport::{Connector, Link, LinkEvent};

/// Lifecycle of the push connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Transient. Always followed by `Disconnected`.
    Error,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// A connection is open or being opened.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connected | Self::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone)]
pub struct SocketSettings {
    /// REST base URL; the push URL is derived from it.
    pub base_url: String,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    /// Zero disables the heartbeat.
    pub heartbeat_interval: Duration,
}

impl SocketSettings {
    pub fn from_config(config: &AtelierConfig) -> Self {
        Self {
            base_url: config.api.base_url.clone(),
            reconnect_interval: config.socket.reconnect_interval(),
            max_reconnect_attempts: config.socket.max_reconnect_attempts,
            heartbeat_interval: config.socket.heartbeat_interval(),
        }
    }
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self::from_config(&AtelierConfig::default())
    }
}

/// Handle to the push connection. Cheap to clone; clones share one
/// connection.
#[derive(Clone)]
pub struct SocketManager {
    inner: Arc<Inner>,
}

struct LiveLink {
    epoch: u64,
    outbound: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl LiveLink {
    /// Stop the link's tasks. Dropping `outbound` closes the transport.
    fn shutdown(self) {
        self.heartbeat.abort();
        self.reader.abort();
    }
}

struct Inner {
    settings: SocketSettings,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenSource>,
    state: watch::Sender<ConnectionState>,
    epoch: AtomicU64,
    reconnect_attempts: AtomicU32,
    link: Mutex<Option<LiveLink>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    /// Tasks the caller asked about; re-subscribed after every reconnect.
    subscriptions: DashSet<TaskId>,
    observers: Observers<TaskUpdate>,
}

impl SocketManager {
    pub fn new(
        settings: SocketSettings,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                settings,
                connector,
                tokens,
                state,
                epoch: AtomicU64::new(0),
                reconnect_attempts: AtomicU32::new(0),
                link: Mutex::new(None),
                reconnect_timer: Mutex::new(None),
                subscriptions: DashSet::new(),
                observers: Observers::new(),
            }),
        }
    }

    /// Open the push connection.
    ///
    /// No-op while connected or connecting. Without a token the state stays
    /// (or becomes) `Disconnected` and no attempt is made. A manual connect
    /// starts a fresh reconnect budget. Returns once the attempt resolves.
    pub async fn connect(&self) {
        if self.state().is_active() {
            return;
        }
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        self.inner.establish(None).await;
    }

    /// Close the connection and stop any pending reconnect. Idempotent.
    /// A manual disconnect never triggers an automatic reconnect.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        // Held across the epoch bump so an `open` or `closed` of the old
        // epoch either finishes first or sees the new epoch.
        let mut live = lock(&inner.link);
        inner.state.send_if_modified(|s| {
            inner.epoch.fetch_add(1, Ordering::SeqCst);
            let changed = *s != ConnectionState::Disconnected;
            *s = ConnectionState::Disconnected;
            changed
        });
        if let Some(timer) = lock(&inner.reconnect_timer).take() {
            timer.abort();
        }
        if let Some(link) = live.take() {
            link.shutdown();
            tracing::info!("push channel disconnected");
        }
    }

    /// Ask the server for updates about `task_id`.
    ///
    /// Returns `false` without sending anything when not connected. Once
    /// sent, the task is re-subscribed after every reconnect until
    /// [`release`](Self::release) is called.
    pub fn subscribe(&self, task_id: &TaskId) -> bool {
        let live = lock(&self.inner.link);
        let Some(link) = live.as_ref() else {
            tracing::debug!(task_id = %task_id, "subscribe skipped; push channel down");
            return false;
        };
        self.inner.subscriptions.insert(task_id.clone());
        let frame = ClientFrame::Subscribe {
            task_id: task_id.clone(),
        };
        if link.outbound.send(frame.to_text()).is_err() {
            tracing::debug!(task_id = %task_id, "subscribe send failed; link is closing");
            return false;
        }
        tracing::debug!(task_id = %task_id, "subscribed to task updates");
        true
    }

    /// Stop re-subscribing to `task_id` on reconnect.
    pub fn release(&self, task_id: &TaskId) {
        self.inner.subscriptions.remove(task_id);
    }

    /// Register a callback for every task update the server pushes.
    /// Dropping the handle unregisters it.
    pub fn on_task_update(
        &self,
        callback: impl Fn(&TaskUpdate) + Send + Sync + 'static,
    ) -> ObserverHandle<TaskUpdate> {
        self.inner.observers.add(callback)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Follow state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Automatic reconnect attempts since the last successful open or
    /// manual connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn subscribed_tasks(&self) -> Vec<TaskId> {
        self.inner.subscriptions.iter().map(|id| id.key().clone()).collect()
    }
}

impl Inner {
    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Set `next` only while `epoch` is still current, checked under the
    /// state lock. Returns `false` if the epoch moved on.
    fn set_state_if_current(&self, epoch: u64, next: ConnectionState) -> bool {
        let mut current = true;
        self.state.send_if_modified(|s| {
            if self.current_epoch() != epoch {
                current = false;
                return false;
            }
            let changed = *s != next;
            *s = next;
            changed
        });
        current
    }

    /// One connection attempt. `expected_epoch` is set by the reconnect
    /// timer: if anything happened since it was armed, the attempt is void.
    async fn establish(self: &Arc<Self>, expected_epoch: Option<u64>) {
        let Some(token) = self.tokens.token() else {
            self.state.send_if_modified(|s| {
                if s.is_active() || *s == ConnectionState::Disconnected {
                    return false;
                }
                *s = ConnectionState::Disconnected;
                true
            });
            tracing::debug!("no auth token; push channel stays down");
            return;
        };

        let mut epoch = 0;
        let began = self.state.send_if_modified(|s| {
            if s.is_active() {
                return false;
            }
            if expected_epoch.is_some_and(|e| e != self.current_epoch()) {
                return false;
            }
            epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *s = ConnectionState::Connecting;
            true
        });
        if !began {
            return;
        }

        tracing::debug!(epoch, "connecting push channel");
        let url = push_url(&self.settings.base_url, &token);
        match self.connector.connect(&url).await {
            Ok(link) if self.current_epoch() == epoch => self.open(epoch, link),
            Ok(_) => tracing::debug!(epoch, "connect superseded; dropping link"),
            Err(e) => {
                if !self.set_state_if_current(epoch, ConnectionState::Error) {
                    return;
                }
                tracing::warn!(error = %e, "push channel connect failed");
                self.closed(epoch);
            }
        }
    }

    fn open(self: &Arc<Self>, epoch: u64, link: Link) {
        let Link {
            outbound,
            mut inbound,
        } = link;

        let mut live = lock(&self.link);
        if self.current_epoch() != epoch {
            return;
        }

        let heartbeat = tokio::spawn(heartbeat(
            outbound.clone(),
            self.settings.heartbeat_interval,
        ));

        let weak = Arc::downgrade(self);
        let reader = tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match event {
                    LinkEvent::Text(text) => inner.dispatch(&text),
                    LinkEvent::Error(e) => {
                        tracing::warn!(error = %e, "push channel error");
                        inner.set_state_if_current(epoch, ConnectionState::Error);
                    }
                    LinkEvent::Closed => break,
                }
            }
            if let Some(inner) = weak.upgrade() {
                inner.closed(epoch);
            }
        });

        for task_id in self.subscriptions.iter() {
            let frame = ClientFrame::Subscribe {
                task_id: task_id.key().clone(),
            };
            let _ = outbound.send(frame.to_text());
        }

        if let Some(old) = live.replace(LiveLink {
            epoch,
            outbound,
            reader,
            heartbeat,
        }) {
            old.shutdown();
        }
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.set_state_if_current(epoch, ConnectionState::Connected);
        drop(live);

        tracing::info!(
            resubscribed = self.subscriptions.len(),
            "push channel connected"
        );
    }

    /// The connection of `epoch` is gone, by close or by failed connect.
    fn closed(self: &Arc<Self>, epoch: u64) {
        {
            let mut live = lock(&self.link);
            if self.current_epoch() != epoch {
                return;
            }
            if live.as_ref().is_some_and(|l| l.epoch == epoch) {
                if let Some(link) = live.take() {
                    link.heartbeat.abort();
                }
            }
            if !self.set_state_if_current(epoch, ConnectionState::Disconnected) {
                return;
            }
        }
        self.schedule_reconnect(epoch);
    }

    fn schedule_reconnect(self: &Arc<Self>, epoch: u64) {
        let max = self.settings.max_reconnect_attempts;
        let used = self.reconnect_attempts.load(Ordering::SeqCst);
        if used >= max {
            tracing::warn!(attempts = used, "push channel reconnect attempts exhausted");
            return;
        }
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.settings.reconnect_interval;
        tracing::info!(
            attempt,
            max,
            delay_ms = delay.as_millis() as u64,
            "push channel closed, reconnecting"
        );

        let weak = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.establish(Some(epoch)).await;
            }
        });
        // The previous timer, if any, has already fired; this one replaces it.
        *lock(&self.reconnect_timer) = Some(timer);
    }

    fn dispatch(&self, text: &str) {
        match ServerFrame::parse(text) {
            Some(ServerFrame::TaskUpdate(update)) => {
                tracing::debug!(
                    task_id = %update.task_id,
                    status = %update.status,
                    "task update pushed"
                );
                self.observers.notify(&update);
            }
            Some(ServerFrame::Subscribed { task_id }) => {
                tracing::debug!(task_id = %task_id, "subscription acknowledged");
            }
            Some(ServerFrame::Heartbeat) => tracing::trace!("heartbeat echoed"),
            Some(ServerFrame::Unknown) => tracing::trace!("ignoring unknown push frame"),
            None => tracing::debug!(len = text.len(), "dropping malformed push frame"),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.reconnect_timer).take() {
            timer.abort();
        }
        if let Some(link) = lock(&self.link).take() {
            link.shutdown();
        }
    }
}

async fn heartbeat(outbound: mpsc::UnboundedSender<String>, every: Duration) {
    if every.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    loop {
        ticker.tick().await;
        if outbound.send(ClientFrame::Heartbeat.to_text()).is_err() {
            return;
        }
        tracing::trace!("heartbeat sent");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
