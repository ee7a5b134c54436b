use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PlayerError, ProviderError};
use crate::models::{ProviderId, QueueTrack, TrackData};

/// Playable resource handed from a provider to the voice transport. The
/// transport's stream loader does the heavy lifting; providers only say
/// where to point it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Page or direct stream URL.
    Url(String),
    /// Free-text query, resolved to the first match.
    Search(String),
}

/// One content provider (SoundCloud today, selected by [`ProviderId`]).
/// Implementations live outside the core; the binary ships a yt-dlp backed
/// SoundCloud adapter.
#[async_trait]
pub trait TrackProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Cheap identifier check run before anything is queued.
    async fn validate(&self, identifier: &str) -> Result<bool, ProviderError>;

    /// Resolves an identifier into track metadata.
    async fn resolve(&self, identifier: &str) -> Result<TrackData, ProviderError>;

    /// Produces the playable resource for a queued track.
    async fn open_stream(&self, track: &QueueTrack) -> Result<AudioSource, ProviderError>;
}

/// Providers keyed by id, so callers dispatch on `providerId` instead of
/// chaining equality checks.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Arc<dyn TrackProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn TrackProvider>) -> Self {
        self.providers.insert(provider.id(), provider);
        self
    }

    pub fn get(&self, id: ProviderId) -> Result<&Arc<dyn TrackProvider>, PlayerError> {
        self.providers
            .get(&id)
            .ok_or(PlayerError::UnknownProvider(id))
    }
}
