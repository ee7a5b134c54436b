use thiserror::Error;

use crate::models::ProviderId;

/// Failure talking to the external list store backing the queues.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure raised by a content provider adapter.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("identifier is not a {0} track")]
    InvalidIdentifier(ProviderId),
    #[error("track lookup failed: {0}")]
    Lookup(String),
    #[error("no playable stream: {0}")]
    NoStream(String),
}

/// Failure raised by the voice transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("voice join failed: {0}")]
    JoinFailed(String),
    /// The transport's stream loader could not open the source. Maps to
    /// a recoverable `NoStream` outcome, unlike the other variants.
    #[error("could not open stream source: {0}")]
    SourceUnavailable(String),
    #[error("no active track to control")]
    NoActiveTrack,
    #[error("transport handle is gone: {0}")]
    Defunct(String),
}

/// Fatal faults of a controller operation. Recoverable conditions
/// (no stream, missing track, queue end) travel in [`crate::player::PlayOutcome`]
/// instead; a session hit by one of these stays queryable and retriable.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("no session for guild {0}")]
    SessionNotFound(u64),
    #[error("queue is full ({max} tracks)")]
    CapacityExceeded { max: usize },
    #[error("no provider registered for {0}")]
    UnknownProvider(ProviderId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Rejected state transitions of the pause/resume/stop/volume surface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("player is not playing anything")]
    NotPlaying,
    #[error("player is not paused")]
    NotPaused,
    #[error("volume must be between 0.0 and 1.0")]
    InvalidVolume,
}
