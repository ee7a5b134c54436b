use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key of one playback session: the guild the bot is voiced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub u64);

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Voice channel the transport should join, resolved by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTarget {
    pub guild_id: u64,
    pub channel_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Soundcloud,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderId::Soundcloud => write!(f, "soundcloud"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackAuthor {
    pub username: String,
    pub permalink: String,
}

/// Resolved provider metadata for one track, before it is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackData {
    pub provider_id: ProviderId,
    pub provider_track_id: String,
    pub title: String,
    pub permalink: String,
    pub thumbnail: Option<String>,
    pub duration_seconds: u64,
    pub authors: Vec<TrackAuthor>,
}

/// One queue entry. `queue_id` is unique per insertion, so the same
/// provider track can sit in the queue twice under different ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTrack {
    pub queue_id: String,
    #[serde(flatten)]
    pub data: TrackData,
}

impl QueueTrack {
    pub fn new(data: TrackData) -> Self {
        Self {
            queue_id: Uuid::new_v4().to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    Off,
    Track,
    Queue,
}

impl RepeatMode {
    /// Parses the wire spelling used by clients ("off" | "track" | "queue").
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(RepeatMode::Off),
            "track" => Some(RepeatMode::Track),
            "queue" => Some(RepeatMode::Queue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Idle,
    Buffering,
    Playing,
    Paused,
}

impl PlaybackStatus {
    /// Clients only distinguish playing from not-playing; buffering counts
    /// as playing, same as the source API reported it.
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackStatus::Playing | PlaybackStatus::Buffering)
    }
}
