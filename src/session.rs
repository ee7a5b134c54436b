use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::PlayerError;
use crate::models::{JoinTarget, PlaybackStatus, RepeatMode, SessionKey};
use crate::queue::QueueStore;
use crate::transport::{TransportEvents, TransportHandle, VoiceConnector};

/// Mutable playback state of one session. Guarded by the session's
/// command mutex, which is held for the whole of every mutating
/// operation so user commands and transport callbacks never interleave.
#[derive(Debug)]
pub struct SessionState {
    pub current_track_id: Option<String>,
    pub status: PlaybackStatus,
    pub repeat: RepeatMode,
    pub volume: f32,
}

impl SessionState {
    fn new(volume: f32) -> Self {
        Self {
            current_track_id: None,
            status: PlaybackStatus::Idle,
            repeat: RepeatMode::Off,
            volume,
        }
    }
}

/// One voice-channel membership: the transport handle it owns plus the
/// playback state behind it.
pub struct Session {
    pub key: SessionKey,
    pub channel_id: u64,
    pub transport: Arc<dyn TransportHandle>,
    state: Mutex<SessionState>,
    reconnected: Notify,
    idle_timer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn new(
        key: SessionKey,
        channel_id: u64,
        transport: Arc<dyn TransportHandle>,
        volume: f32,
    ) -> Self {
        Self {
            key,
            channel_id,
            transport,
            state: Mutex::new(SessionState::new(volume)),
            reconnected: Notify::new(),
            idle_timer: std::sync::Mutex::new(None),
        }
    }

    /// Serializes every mutating operation against this session.
    pub async fn lock_state(&self) -> tokio::sync::MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Replaces any armed idle timer with `handle`; `None` disarms.
    pub(crate) fn set_idle_timer(&self, handle: Option<JoinHandle<()>>) {
        let mut slot = self
            .idle_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = handle;
    }

    fn note_reconnected(&self) {
        self.reconnected.notify_waiters();
    }
}

/// Owns every live session, one per session key, and the transport
/// lifecycle around them.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, Arc<Session>>>,
    connector: Arc<dyn VoiceConnector>,
    queues: Arc<QueueStore>,
    reconnect_grace: Duration,
    default_volume: f32,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn VoiceConnector>,
        queues: Arc<QueueStore>,
        reconnect_grace: Duration,
        default_volume: f32,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            connector,
            queues,
            reconnect_grace,
            default_volume,
        }
    }

    /// Returns the live session for `key`, joining voice if none exists.
    /// The registry lock is held across the join, so two concurrent
    /// creates for one key can never open two transports. When `is_new`
    /// is false the caller still owns its channel-membership checks: the
    /// existing session may sit in a different channel than `target`.
    pub async fn get_or_create(
        &self,
        key: SessionKey,
        target: JoinTarget,
        events: Arc<dyn TransportEvents>,
    ) -> Result<(Arc<Session>, bool), PlayerError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&key) {
            return Ok((session.clone(), false));
        }

        let transport = self.connector.join(target, events).await?;
        let session = Arc::new(Session::new(
            key,
            target.channel_id,
            transport,
            self.default_volume,
        ));
        sessions.insert(key, session.clone());
        info!("Created session for guild {key} in channel {}", target.channel_id);
        Ok((session.clone(), true))
    }

    pub async fn get(&self, key: SessionKey) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(&key).cloned()
    }

    /// Destroys a session: disarms its timer, disconnects the transport,
    /// clears the persisted queue, drops the registry entry. Idempotent;
    /// safe to race from the idle timer and the disconnect watcher.
    pub async fn teardown(&self, key: SessionKey) {
        let removed = self.sessions.lock().await.remove(&key);
        let Some(session) = removed else {
            return;
        };

        // Never reached from inside the timer task (that path is
        // `idle_timeout_fired`), so aborting it here cannot cancel us.
        session.set_idle_timer(None);
        self.release(&session).await;
    }

    /// Teardown variant for the idle timer itself. Must not abort the
    /// timer handle (it would cancel the running task), and must not
    /// touch a session that was recreated under the same key after the
    /// timer was armed.
    pub(crate) async fn idle_timeout_fired(&self, session: &Arc<Session>) {
        {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&session.key) {
                Some(current) if Arc::ptr_eq(current, session) => {
                    sessions.remove(&session.key);
                }
                _ => return,
            }
        }
        self.release(session).await;
    }

    async fn release(&self, session: &Session) {
        let key = session.key;
        session.transport.disconnect().await;
        if let Err(err) = self.queues.clear(key).await {
            warn!("Could not clear queue for guild {key} on teardown: {err}");
        }
        info!("Tore down session for guild {key}");
    }

    /// Handles an unexpected transport drop: waits one grace window for
    /// the reconnect signal, then tears the session down if it never came.
    pub fn begin_disconnect_grace(self: &Arc<Self>, key: SessionKey) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let Some(session) = registry.get(key).await else {
                return;
            };
            let reconnected = session.reconnected.notified();
            tokio::pin!(reconnected);

            tokio::select! {
                _ = &mut reconnected => {
                    info!("Transport for guild {key} reconnected inside grace window");
                }
                _ = tokio::time::sleep(registry.reconnect_grace) => {
                    info!("Transport for guild {key} did not reconnect, tearing down");
                    registry.teardown(key).await;
                }
            }
        });
    }

    /// Called by the transport adapter when the connection re-established
    /// itself inside the grace window.
    pub async fn note_reconnected(&self, key: SessionKey) {
        if let Some(session) = self.get(key).await {
            session.note_reconnected();
        }
    }
}
