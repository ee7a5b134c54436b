use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::models::{JoinTarget, SessionKey};
use crate::provider::AudioSource;

/// Live connection to one voice channel. Opaque to the core beyond the
/// operations here; the session owns its handle for the session lifetime.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Replaces whatever is playing with `source` at the given gain.
    async fn play(&self, source: AudioSource, volume: f32) -> Result<(), TransportError>;

    async fn pause(&self) -> Result<(), TransportError>;

    async fn resume(&self) -> Result<(), TransportError>;

    /// Commanded stop; must not surface as a natural track end.
    async fn stop(&self) -> Result<(), TransportError>;

    /// Adjusts the in-flight stream gain, if a stream is attached.
    async fn set_volume(&self, volume: f32) -> Result<(), TransportError>;

    async fn disconnect(&self);
}

/// Signals the transport pushes back into the engine. The playback
/// controller implements this; adapters call it from their event handlers.
#[async_trait]
pub trait TransportEvents: Send + Sync {
    /// A stream ran to completion on its own (never from pause/stop).
    async fn track_ended(&self, key: SessionKey);

    /// The transport dropped unexpectedly; a reconnect may follow.
    async fn transport_disconnected(&self, key: SessionKey);

    /// The transport came back inside the grace window.
    async fn transport_reconnected(&self, key: SessionKey);
}

/// Joins voice channels and hands out transport handles.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn join(
        &self,
        target: JoinTarget,
        events: Arc<dyn TransportEvents>,
    ) -> Result<Arc<dyn TransportHandle>, TransportError>;
}
