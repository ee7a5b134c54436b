use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::{ControlError, PlayerError, TransportError};
use crate::models::{PlaybackStatus, ProviderId, QueueTrack, RepeatMode, SessionKey, TrackData};
use crate::notify::{NotificationBus, PlayerEvent};
use crate::provider::ProviderRegistry;
use crate::queue::QueueStore;
use crate::session::{Session, SessionRegistry, SessionState};
use crate::transport::TransportEvents;

/// Result of a play or advance operation. `QueueEnd` is a terminal state,
/// not a failure; `NoStream` and `NoTrack` are recoverable and leave the
/// session queryable.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    Playing(QueueTrack),
    QueueEnd,
    NoTrack,
    NoStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

/// What `enqueue` did: rejected up front, or queued (plus the play
/// outcome when the track was started immediately because the session
/// was idle or the caller forced it).
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    /// The identifier failed provider validation or resolution; nothing
    /// was queued.
    Rejected,
    Queued {
        track: QueueTrack,
        started: Option<PlayOutcome>,
    },
}

/// The per-session state machine. Every mutating operation locks the
/// session for its whole duration, including provider resolution and the
/// transport push, so a user skip and the transport's end-of-track
/// callback serialize instead of racing on `current_track_id`.
pub struct PlaybackController {
    registry: Arc<SessionRegistry>,
    queues: Arc<QueueStore>,
    providers: Arc<ProviderRegistry>,
    bus: Arc<NotificationBus>,
    idle_timeout: Duration,
}

impl PlaybackController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        queues: Arc<QueueStore>,
        providers: Arc<ProviderRegistry>,
        bus: Arc<NotificationBus>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            queues,
            providers,
            bus,
            idle_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn queues(&self) -> &Arc<QueueStore> {
        &self.queues
    }

    async fn session(&self, key: SessionKey) -> Result<Arc<Session>, PlayerError> {
        self.registry
            .get(key)
            .await
            .ok_or(PlayerError::SessionNotFound(key.0))
    }

    /// Validates and resolves `identifier`, appends it to the queue and,
    /// when the session is idle (or `force` is set), starts it right away.
    pub async fn enqueue(
        &self,
        key: SessionKey,
        provider_id: ProviderId,
        identifier: &str,
        force: bool,
    ) -> Result<Enqueued, PlayerError> {
        let session = self.session(key).await?;
        let provider = self.providers.get(provider_id)?;

        match provider.validate(identifier).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Rejected identifier {identifier}");
                return Ok(Enqueued::Rejected);
            }
            Err(err) => {
                warn!("Validation failed for {identifier}: {err}");
                return Ok(Enqueued::Rejected);
            }
        }
        let data = match provider.resolve(identifier).await {
            Ok(data) => data,
            Err(err) => {
                warn!("Could not resolve {identifier}: {err}");
                return Ok(Enqueued::Rejected);
            }
        };

        let mut state = session.lock_state().await;
        let queued = self.queues.append(key, vec![data]).await?;
        let track = queued[0].clone();
        self.bus
            .publish(key, &PlayerEvent::NewQueueSongs(queued.clone()));

        let started = if state.status == PlaybackStatus::Idle || force {
            let outcome = self.play_locked(&session, &mut state, track.clone()).await?;
            if let PlayOutcome::Playing(playing) = &outcome {
                self.bus.publish(key, &PlayerEvent::NowPlaying(playing.clone()));
            }
            Some(outcome)
        } else {
            None
        };

        Ok(Enqueued::Queued { track, started })
    }

    /// Plays a specific queued entry; `NoTrack` if the id is gone.
    pub async fn play_by_queue_id(
        &self,
        key: SessionKey,
        queue_id: &str,
    ) -> Result<PlayOutcome, PlayerError> {
        let session = self.session(key).await?;
        let mut state = session.lock_state().await;
        let outcome = self
            .play_by_queue_id_locked(&session, &mut state, Some(queue_id))
            .await?;
        if let PlayOutcome::Playing(track) = &outcome {
            self.bus.publish(key, &PlayerEvent::NowPlaying(track.clone()));
        }
        Ok(outcome)
    }

    /// Moves to the neighbor of the current track and plays it. Emits
    /// `now-playing` or `queue-end`; `NoTrack`/`NoStream` only travel back
    /// to the caller, since nothing observable changed.
    pub async fn advance(
        &self,
        key: SessionKey,
        direction: Direction,
    ) -> Result<PlayOutcome, PlayerError> {
        let session = self.session(key).await?;
        let mut state = session.lock_state().await;
        let outcome = self.advance_locked(&session, &mut state, direction).await?;
        match &outcome {
            PlayOutcome::Playing(track) => {
                self.bus.publish(key, &PlayerEvent::NowPlaying(track.clone()));
            }
            PlayOutcome::QueueEnd => {
                self.bus.publish(key, &PlayerEvent::QueueEnd);
            }
            PlayOutcome::NoTrack | PlayOutcome::NoStream => {}
        }
        Ok(outcome)
    }

    /// Reaction to the transport reporting a natural end of stream. Repeat
    /// policy is applied here, with exactly one queue-restart attempt when
    /// `repeat == Queue` hits the end; failures of that single retry are
    /// surfaced as events, never retried again.
    pub async fn on_track_ended(&self, key: SessionKey) -> Result<(), PlayerError> {
        let session = self.session(key).await?;
        let mut state = session.lock_state().await;

        let outcome = if state.repeat == RepeatMode::Track {
            let current = state.current_track_id.clone();
            self.play_by_queue_id_locked(&session, &mut state, current.as_deref())
                .await?
        } else {
            self.advance_locked(&session, &mut state, Direction::Next)
                .await?
        };

        let outcome = match outcome {
            PlayOutcome::QueueEnd if state.repeat == RepeatMode::Queue => {
                match self.queues.by_position(key, 0).await? {
                    Some(first) => self.play_locked(&session, &mut state, first).await?,
                    None => PlayOutcome::QueueEnd,
                }
            }
            other => other,
        };

        match &outcome {
            PlayOutcome::Playing(track) => {
                self.bus.publish(key, &PlayerEvent::NowPlaying(track.clone()));
            }
            PlayOutcome::QueueEnd => {
                self.set_status(&session, &mut state, PlaybackStatus::Idle);
                self.bus.publish(key, &PlayerEvent::QueueEnd);
            }
            PlayOutcome::NoTrack => {
                self.set_status(&session, &mut state, PlaybackStatus::Idle);
                self.bus.publish(key, &PlayerEvent::NoQueueTrack);
            }
            PlayOutcome::NoStream => {
                // Recoverable from the client's side; no event in the
                // vocabulary for it, so it only reaches the log.
                warn!("Stream error while advancing after track end for guild {key}");
                self.set_status(&session, &mut state, PlaybackStatus::Idle);
            }
        }
        Ok(())
    }

    pub async fn pause(&self, key: SessionKey) -> Result<(), PlayerError> {
        let session = self.session(key).await?;
        let mut state = session.lock_state().await;
        if state.status != PlaybackStatus::Playing {
            return Err(ControlError::NotPlaying.into());
        }
        session.transport.pause().await?;
        state.status = PlaybackStatus::Paused;
        self.bus.publish(key, &PlayerEvent::Pause);
        Ok(())
    }

    pub async fn resume(&self, key: SessionKey) -> Result<(), PlayerError> {
        let session = self.session(key).await?;
        let mut state = session.lock_state().await;
        if state.status != PlaybackStatus::Paused {
            return Err(ControlError::NotPaused.into());
        }
        session.transport.resume().await?;
        state.status = PlaybackStatus::Playing;
        self.bus.publish(key, &PlayerEvent::Resume);
        Ok(())
    }

    /// Stops playback for good. Only legal from `Paused`, which keeps an
    /// accidental stop from killing a live stream.
    pub async fn stop(&self, key: SessionKey) -> Result<(), PlayerError> {
        let session = self.session(key).await?;
        let mut state = session.lock_state().await;
        if state.status != PlaybackStatus::Paused {
            return Err(ControlError::NotPaused.into());
        }
        session.transport.stop().await?;
        state.current_track_id = None;
        self.set_status(&session, &mut state, PlaybackStatus::Idle);
        self.bus.publish(key, &PlayerEvent::Stop);
        Ok(())
    }

    pub async fn set_repeat(&self, key: SessionKey, mode: RepeatMode) -> Result<(), PlayerError> {
        let session = self.session(key).await?;
        let mut state = session.lock_state().await;
        if state.repeat != mode {
            state.repeat = mode;
            self.bus.publish(key, &PlayerEvent::Repeat(mode));
        }
        Ok(())
    }

    /// Stores the session volume and pushes it into the in-flight stream
    /// gain when one is attached.
    pub async fn set_volume(&self, key: SessionKey, volume: f32) -> Result<(), PlayerError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(ControlError::InvalidVolume.into());
        }
        let session = self.session(key).await?;
        let mut state = session.lock_state().await;
        let changed = (state.volume - volume).abs() > f32::EPSILON;
        state.volume = volume;
        if let Err(err) = session.transport.set_volume(volume).await {
            // No stream attached is fine; the stored value applies to the
            // next play.
            info!("Volume not pushed live for guild {key}: {err}");
        }
        if changed {
            self.bus.publish(key, &PlayerEvent::Volume(volume));
        }
        Ok(())
    }

    /// Current track and status, the way the read API reports them.
    pub async fn current(
        &self,
        key: SessionKey,
    ) -> Result<(Option<QueueTrack>, PlaybackStatus), PlayerError> {
        let session = self.session(key).await?;
        let state = session.lock_state().await;
        let track = match &state.current_track_id {
            Some(id) => self.queues.by_queue_id(key, Some(id)).await?.track,
            None => None,
        };
        Ok((track, state.status))
    }

    pub async fn queue_view(&self, key: SessionKey) -> Result<Vec<QueueTrack>, PlayerError> {
        Ok(self.queues.all(key).await?)
    }

    /// Deletes one queued entry. Removing the currently-playing entry is
    /// surface-only: playback continues and the session reports `NoTrack`
    /// on its next advance.
    pub async fn remove_track(&self, key: SessionKey, queue_id: &str) -> Result<bool, PlayerError> {
        let session = self.session(key).await?;
        let _state = session.lock_state().await;
        let removed = self.queues.remove_by_queue_id(key, queue_id).await?;
        if removed {
            self.bus.publish(
                key,
                &PlayerEvent::RemoveQueueSong {
                    queue_id: queue_id.to_string(),
                },
            );
        }
        Ok(removed)
    }

    /// Replaces the whole queue (requeue-from-playlist) and starts from
    /// position 0.
    pub async fn requeue(
        &self,
        key: SessionKey,
        tracks: Vec<TrackData>,
    ) -> Result<PlayOutcome, PlayerError> {
        let session = self.session(key).await?;
        let mut state = session.lock_state().await;

        self.queues.clear(key).await?;
        self.bus.publish(key, &PlayerEvent::ClearQueue);
        let queued = self.queues.append(key, tracks).await?;
        self.bus
            .publish(key, &PlayerEvent::NewQueueSongs(queued.clone()));

        let Some(first) = queued.first().cloned() else {
            return Ok(PlayOutcome::QueueEnd);
        };
        let outcome = self.play_locked(&session, &mut state, first).await?;
        if let PlayOutcome::Playing(track) = &outcome {
            self.bus.publish(key, &PlayerEvent::NowPlaying(track.clone()));
        }
        Ok(outcome)
    }

    async fn advance_locked(
        &self,
        session: &Arc<Session>,
        state: &mut SessionState,
        direction: Direction,
    ) -> Result<PlayOutcome, PlayerError> {
        let neighbors = self
            .queues
            .by_queue_id(session.key, state.current_track_id.as_deref())
            .await?;

        match direction {
            Direction::Next => {
                if state.current_track_id.is_some()
                    && neighbors.track.is_none()
                    && neighbors.next.is_none()
                {
                    // Current entry was deleted out from under us; its
                    // position is gone, so there is no "next" to define.
                    return Ok(PlayOutcome::NoTrack);
                }
                match neighbors.next {
                    Some(next) => self.play_locked(session, state, next).await,
                    None => {
                        state.current_track_id = None;
                        if let Err(err) = session.transport.stop().await {
                            info!("Transport already stopped for guild {}: {err}", session.key);
                        }
                        self.set_status(session, state, PlaybackStatus::Idle);
                        Ok(PlayOutcome::QueueEnd)
                    }
                }
            }
            Direction::Prev => {
                // First track: no wraparound, the current track replays.
                match neighbors.prev.or(neighbors.track) {
                    Some(prev) => self.play_locked(session, state, prev).await,
                    None => Ok(PlayOutcome::NoTrack),
                }
            }
        }
    }

    async fn play_by_queue_id_locked(
        &self,
        session: &Arc<Session>,
        state: &mut SessionState,
        queue_id: Option<&str>,
    ) -> Result<PlayOutcome, PlayerError> {
        let Some(queue_id) = queue_id else {
            return Ok(PlayOutcome::NoTrack);
        };
        let neighbors = self.queues.by_queue_id(session.key, Some(queue_id)).await?;
        match neighbors.track {
            Some(track) => self.play_locked(session, state, track).await,
            None => Ok(PlayOutcome::NoTrack),
        }
    }

    /// Resolves the stream and pushes it into the transport. Nothing is
    /// mutated until the push succeeds, so a dead stream leaves
    /// `current_track_id` and the status untouched.
    async fn play_locked(
        &self,
        session: &Arc<Session>,
        state: &mut SessionState,
        track: QueueTrack,
    ) -> Result<PlayOutcome, PlayerError> {
        let provider = self.providers.get(track.data.provider_id)?;
        let source = match provider.open_stream(&track).await {
            Ok(source) => source,
            Err(err) => {
                warn!(
                    "No stream for {} ({}): {err}",
                    track.data.title, track.data.permalink
                );
                return Ok(PlayOutcome::NoStream);
            }
        };

        match session.transport.play(source, state.volume).await {
            Ok(()) => {}
            Err(TransportError::SourceUnavailable(reason)) => {
                warn!("No stream for {}: {reason}", track.data.title);
                return Ok(PlayOutcome::NoStream);
            }
            Err(err) => {
                error!("Transport rejected {} for guild {}: {err}", track.data.title, session.key);
                return Err(err.into());
            }
        }

        state.current_track_id = Some(track.queue_id.clone());
        self.set_status(session, state, PlaybackStatus::Playing);
        info!("Playing {} for guild {}", track.data.title, session.key);
        Ok(PlayOutcome::Playing(track))
    }

    /// Status transitions own the idle-teardown timer: entering `Idle`
    /// arms it, entering `Playing` disarms it.
    fn set_status(&self, session: &Arc<Session>, state: &mut SessionState, status: PlaybackStatus) {
        state.status = status;
        match status {
            PlaybackStatus::Playing => session.set_idle_timer(None),
            PlaybackStatus::Idle => {
                let registry = Arc::clone(&self.registry);
                let watched = Arc::downgrade(session);
                let timeout = self.idle_timeout;
                session.set_idle_timer(Some(tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let Some(session) = watched.upgrade() else {
                        return;
                    };
                    info!("Idle timeout for guild {}, leaving voice", session.key);
                    registry.idle_timeout_fired(&session).await;
                })));
            }
            PlaybackStatus::Buffering | PlaybackStatus::Paused => {}
        }
    }
}

/// The transport drives the controller through this seam; disconnect
/// signals are delegated to the registry's grace logic.
#[async_trait]
impl TransportEvents for PlaybackController {
    async fn track_ended(&self, key: SessionKey) {
        if let Err(err) = self.on_track_ended(key).await {
            warn!("Track-end handling failed for guild {key}: {err}");
        }
    }

    async fn transport_disconnected(&self, key: SessionKey) {
        self.registry.begin_disconnect_grace(key);
    }

    async fn transport_reconnected(&self, key: SessionKey) {
        self.registry.note_reconnected(key).await;
    }
}
