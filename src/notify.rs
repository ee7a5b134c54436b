use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{QueueTrack, RepeatMode, SessionKey};

/// Identity of one connected socket, minted by the socket transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketId(String);

impl SocketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a client can observe, one variant per externally visible
/// player transition. Serializes to the `{event, data?}` frame clients
/// consume.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum PlayerEvent {
    NowPlaying(QueueTrack),
    NewQueueSongs(Vec<QueueTrack>),
    #[serde(rename_all = "camelCase")]
    RemoveQueueSong {
        queue_id: String,
    },
    ClearQueue,
    QueueEnd,
    NoQueueTrack,
    Pause,
    Resume,
    Stop,
    Repeat(RepeatMode),
    Volume(f32),
}

#[derive(Default)]
struct BusInner {
    /// Outbound channel per connected socket; one writer task drains each,
    /// so per-socket delivery order is publish order.
    sockets: HashMap<SocketId, UnboundedSender<String>>,
    /// Sockets watching each session.
    subscribers: HashMap<SessionKey, HashSet<SocketId>>,
    /// Reverse index: which session a socket watches (at most one).
    watching: HashMap<SocketId, SessionKey>,
}

/// Fan-out of player events to subscribed sockets. Shared across all
/// sessions; every operation takes the one short-held lock and never
/// blocks inside it (sends go to unbounded channels).
#[derive(Default)]
pub struct NotificationBus {
    inner: Mutex<BusInner>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Called by the socket transport when a connection is accepted.
    pub fn register_socket(&self, socket_id: SocketId, sender: UnboundedSender<String>) {
        self.lock().sockets.insert(socket_id, sender);
    }

    /// Subscribes a socket to a session. Idempotent; a socket watches at
    /// most one session, so any prior subscription is replaced.
    pub fn subscribe(&self, key: SessionKey, socket_id: &SocketId) {
        let mut inner = self.lock();
        if !inner.sockets.contains_key(socket_id) {
            warn!("Ignoring subscribe from unregistered socket {socket_id}");
            return;
        }
        if let Some(previous) = inner.watching.insert(socket_id.clone(), key) {
            if previous == key {
                return;
            }
            if let Some(set) = inner.subscribers.get_mut(&previous) {
                set.remove(socket_id);
                if set.is_empty() {
                    inner.subscribers.remove(&previous);
                }
            }
        }
        inner
            .subscribers
            .entry(key)
            .or_default()
            .insert(socket_id.clone());
        debug!("Socket {socket_id} subscribed to player {key}");
    }

    pub fn unsubscribe(&self, socket_id: &SocketId) {
        let mut inner = self.lock();
        if let Some(key) = inner.watching.remove(socket_id) {
            if let Some(set) = inner.subscribers.get_mut(&key) {
                set.remove(socket_id);
                if set.is_empty() {
                    inner.subscribers.remove(&key);
                }
            }
        }
    }

    /// Unsubscribe plus release of the socket's outbound channel.
    pub fn on_socket_closed(&self, socket_id: &SocketId) {
        self.unsubscribe(socket_id);
        self.lock().sockets.remove(socket_id);
    }

    /// Sends `event` to every socket subscribed to `key`. Best effort:
    /// sockets whose channel is gone are pruned, the rest still receive.
    pub fn publish(&self, key: SessionKey, event: &PlayerEvent) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Could not serialize event for player {key}: {err}");
                return;
            }
        };

        let mut inner = self.lock();
        let Some(subscribed) = inner.subscribers.get(&key) else {
            return;
        };
        let dead: Vec<SocketId> = subscribed
            .iter()
            .filter(|&socket_id| match inner.sockets.get(socket_id) {
                Some(sender) => sender.send(frame.clone()).is_err(),
                None => true,
            })
            .cloned()
            .collect();
        for socket_id in dead {
            debug!("Pruning dead socket {socket_id}");
            if let Some(key) = inner.watching.remove(&socket_id) {
                if let Some(set) = inner.subscribers.get_mut(&key) {
                    set.remove(&socket_id);
                    if set.is_empty() {
                        inner.subscribers.remove(&key);
                    }
                }
            }
            inner.sockets.remove(&socket_id);
        }
    }

    pub fn subscriber_count(&self, key: SessionKey) -> usize {
        self.lock().subscribers.get(&key).map_or(0, HashSet::len)
    }
}
