use std::sync::Arc;

use tracing::warn;

use crate::error::{PlayerError, StoreError};
use crate::models::{QueueTrack, SessionKey, TrackData};
use crate::store::ListStore;

/// Neighborhood of one queue position, fetched in a single pass so a
/// caller learns the current entry and whether advancing is possible
/// without a second round-trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighbors {
    pub track: Option<QueueTrack>,
    pub prev: Option<QueueTrack>,
    pub next: Option<QueueTrack>,
}

/// Ordered per-session track queue persisted in an external list store.
/// Entries are stored as flat camelCase JSON, one element per track.
pub struct QueueStore {
    store: Arc<dyn ListStore>,
    max_len: usize,
}

fn list_key(key: SessionKey) -> String {
    format!("player:{key}#tracks")
}

impl QueueStore {
    pub fn new(store: Arc<dyn ListStore>, max_len: usize) -> Self {
        Self { store, max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Appends resolved tracks, minting a fresh `queueId` per entry.
    /// Rejects the whole batch if it would push the queue past capacity.
    pub async fn append(
        &self,
        key: SessionKey,
        tracks: Vec<TrackData>,
    ) -> Result<Vec<QueueTrack>, PlayerError> {
        let list_key = list_key(key);
        let current = self.store.len(&list_key).await?;
        if current + tracks.len() > self.max_len {
            return Err(PlayerError::CapacityExceeded { max: self.max_len });
        }

        let queued: Vec<QueueTrack> = tracks.into_iter().map(QueueTrack::new).collect();
        let serialized = queued
            .iter()
            .map(|track| serde_json::to_string(track).expect("queue track serializes"))
            .collect();
        self.store.push_back(&list_key, serialized).await?;
        Ok(queued)
    }

    pub async fn len(&self, key: SessionKey) -> Result<usize, StoreError> {
        self.store.len(&list_key(key)).await
    }

    /// All entries in playback order. Elements that no longer parse as a
    /// queue track (partial writes, out-of-band corruption) are dropped.
    pub async fn all(&self, key: SessionKey) -> Result<Vec<QueueTrack>, StoreError> {
        let raw = self.store.all(&list_key(key)).await?;
        Ok(raw
            .iter()
            .filter_map(|element| match serde_json::from_str(element) {
                Ok(track) => Some(track),
                Err(err) => {
                    warn!("Dropping malformed queue entry for player {key}: {err}");
                    None
                }
            })
            .collect())
    }

    pub async fn by_position(
        &self,
        key: SessionKey,
        index: usize,
    ) -> Result<Option<QueueTrack>, StoreError> {
        let raw = self.store.get(&list_key(key), index).await?;
        Ok(raw.and_then(|element| match serde_json::from_str(&element) {
            Ok(track) => Some(track),
            Err(err) => {
                warn!("Dropping malformed queue entry for player {key}: {err}");
                None
            }
        }))
    }

    /// Finds an entry and its neighbors by queue id. With `queue_id = None`
    /// this is the append-position lookup: `prev` is the last element. A
    /// queue id that is gone (deleted out of band) yields all-`None`, which
    /// callers treat as `NoTrack`, not as a resolution failure.
    pub async fn by_queue_id(
        &self,
        key: SessionKey,
        queue_id: Option<&str>,
    ) -> Result<Neighbors, StoreError> {
        let tracks = self.all(key).await?;

        let Some(queue_id) = queue_id else {
            return Ok(Neighbors {
                track: None,
                prev: tracks.last().cloned(),
                next: None,
            });
        };

        let Some(index) = tracks.iter().position(|track| track.queue_id == queue_id) else {
            return Ok(Neighbors::default());
        };

        Ok(Neighbors {
            prev: index.checked_sub(1).and_then(|i| tracks.get(i).cloned()),
            next: tracks.get(index + 1).cloned(),
            track: Some(tracks[index].clone()),
        })
    }

    /// Removes one entry by queue id; false if no such entry. Removal is
    /// by exact stored element, one store operation.
    pub async fn remove_by_queue_id(
        &self,
        key: SessionKey,
        queue_id: &str,
    ) -> Result<bool, StoreError> {
        let list_key = list_key(key);
        let raw = self.store.all(&list_key).await?;
        for element in &raw {
            let parsed: Option<QueueTrack> = serde_json::from_str(element).ok();
            if parsed.is_some_and(|track| track.queue_id == queue_id) {
                return self.store.remove_value(&list_key, element).await;
            }
        }
        Ok(false)
    }

    pub async fn clear(&self, key: SessionKey) -> Result<(), StoreError> {
        self.store.clear(&list_key(key)).await
    }
}
