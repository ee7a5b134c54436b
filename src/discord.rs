use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use songbird::input::{ytdl, ytdl_search};
use songbird::tracks::TrackHandle;
use songbird::{Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use tracing::{info, warn};

use groove_bot::error::TransportError;
use groove_bot::models::{JoinTarget, SessionKey};
use groove_bot::provider::AudioSource;
use groove_bot::transport::{TransportEvents, TransportHandle, VoiceConnector};

/// Joins guild voice channels through songbird and wraps each call in a
/// [`SongbirdTransport`].
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn join(
        &self,
        target: JoinTarget,
        events: Arc<dyn TransportEvents>,
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        let guild_id = songbird::id::GuildId::from(target.guild_id);
        let channel_id = songbird::id::ChannelId::from(target.channel_id);

        let (call, join_result) = self.manager.join(guild_id, channel_id).await;
        join_result.map_err(|err| TransportError::JoinFailed(err.to_string()))?;

        {
            let mut call = call.lock().await;
            if !call.is_deaf() {
                if let Err(err) = call.deafen(true).await {
                    info!("Deafen failed due to {err:?}");
                }
            }
        }

        Ok(Arc::new(SongbirdTransport {
            key: SessionKey(target.guild_id),
            manager: self.manager.clone(),
            call,
            current: Arc::new(Mutex::new(None)),
            events,
        }))
    }
}

/// One live voice connection. Owns the call and the handle of whatever
/// track is in flight; pause/resume/stop/volume go through that handle
/// the same way the chat commands drive it.
pub struct SongbirdTransport {
    key: SessionKey,
    manager: Arc<Songbird>,
    call: Arc<tokio::sync::Mutex<songbird::Call>>,
    /// Handle of the in-flight track. Cleared before any commanded stop
    /// or replacement so only a natural end reaches the controller.
    current: Arc<Mutex<Option<TrackHandle>>>,
    events: Arc<dyn TransportEvents>,
}

impl SongbirdTransport {
    fn current_handle(&self) -> Result<TrackHandle, TransportError> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(TransportError::NoActiveTrack)
    }

    fn swap_current(&self, handle: Option<TrackHandle>) -> Option<TrackHandle> {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *current, handle)
    }
}

#[async_trait]
impl TransportHandle for SongbirdTransport {
    async fn play(&self, source: AudioSource, volume: f32) -> Result<(), TransportError> {
        let input = match source {
            AudioSource::Url(url) => ytdl(&url).await,
            AudioSource::Search(query) => ytdl_search(&query).await,
        }
        .map_err(|err| TransportError::SourceUnavailable(err.to_string()))?;

        // Drop the old handle first: its End event must read as replaced,
        // not as a natural end.
        self.swap_current(None);

        let mut call = self.call.lock().await;
        call.stop();
        let handle = call.play_source(input);

        if let Err(err) = handle.set_volume(volume) {
            warn!("Could not set initial volume for guild {}: {err}", self.key);
        }
        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    key: self.key,
                    uuid: handle.uuid(),
                    current: self.current.clone(),
                    events: self.events.clone(),
                },
            )
            .map_err(|err| TransportError::Defunct(format!("could not attach end event: {err}")))?;

        self.swap_current(Some(handle));
        Ok(())
    }

    async fn pause(&self) -> Result<(), TransportError> {
        self.current_handle()?
            .pause()
            .map_err(|err| TransportError::Defunct(err.to_string()))
    }

    async fn resume(&self) -> Result<(), TransportError> {
        self.current_handle()?
            .play()
            .map_err(|err| TransportError::Defunct(err.to_string()))
    }

    async fn stop(&self) -> Result<(), TransportError> {
        match self.swap_current(None) {
            Some(handle) => handle
                .stop()
                .map_err(|err| TransportError::Defunct(err.to_string())),
            None => Err(TransportError::NoActiveTrack),
        }
    }

    async fn set_volume(&self, volume: f32) -> Result<(), TransportError> {
        self.current_handle()?
            .set_volume(volume)
            .map_err(|err| TransportError::Defunct(err.to_string()))
    }

    async fn disconnect(&self) {
        self.swap_current(None);
        if let Err(err) = self.manager.remove(songbird::id::GuildId::from(self.key.0)).await {
            info!("Voice handler for guild {} was already gone: {err}", self.key);
        }
    }
}

/// Fires when a track ends for any reason; only a handle that is still
/// the transport's current one counts as a natural end.
struct TrackEndNotifier {
    key: SessionKey,
    uuid: uuid::Uuid,
    current: Arc<Mutex<Option<TrackHandle>>>,
    events: Arc<dyn TransportEvents>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let ended_naturally = {
            let mut current = self
                .current
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if current.as_ref().map(TrackHandle::uuid) == Some(self.uuid) {
                *current = None;
                true
            } else {
                false
            }
        };

        if ended_naturally {
            info!("Track ended naturally for guild {}", self.key);
            self.events.track_ended(self.key).await;
        }
        None
    }
}
