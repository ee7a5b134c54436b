//! In-memory fakes for the voice transport and the content provider,
//! plus a wired-up engine the scenario tests drive.
#![allow(dead_code)] // each test binary uses its own slice of this

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use groove_bot::error::{ProviderError, TransportError};
use groove_bot::models::{
    JoinTarget, ProviderId, QueueTrack, SessionKey, TrackAuthor, TrackData,
};
use groove_bot::notify::{NotificationBus, SocketId};
use groove_bot::player::PlaybackController;
use groove_bot::provider::{AudioSource, ProviderRegistry, TrackProvider};
use groove_bot::queue::QueueStore;
use groove_bot::session::SessionRegistry;
use groove_bot::store::MemoryListStore;
use groove_bot::transport::{TransportEvents, TransportHandle, VoiceConnector};

pub const KEY: SessionKey = SessionKey(1);

pub const TARGET: JoinTarget = JoinTarget {
    guild_id: 1,
    channel_id: 10,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TransportOp {
    Play(String),
    Pause,
    Resume,
    Stop,
    SetVolume(f32),
    Disconnect,
}

/// Records every operation; `play` yields briefly so interleaving tests
/// get a real suspension point, like the transport push they stand for.
#[derive(Default)]
pub struct MockTransport {
    ops: Mutex<Vec<TransportOp>>,
    playing: Mutex<Option<String>>,
    dead_sources: Mutex<HashSet<String>>,
}

impl MockTransport {
    /// Makes the stream loader reject this source url.
    pub fn kill_source(&self, url: &str) {
        self.dead_sources.lock().unwrap().insert(url.to_string());
    }

    pub fn ops(&self) -> Vec<TransportOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn played(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TransportOp::Play(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: TransportOp) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl TransportHandle for MockTransport {
    async fn play(&self, source: AudioSource, _volume: f32) -> Result<(), TransportError> {
        let url = match source {
            AudioSource::Url(url) => url,
            AudioSource::Search(query) => query,
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        if self.dead_sources.lock().unwrap().contains(&url) {
            return Err(TransportError::SourceUnavailable(format!("no stream at {url}")));
        }
        *self.playing.lock().unwrap() = Some(url.clone());
        self.record(TransportOp::Play(url));
        Ok(())
    }

    async fn pause(&self) -> Result<(), TransportError> {
        self.record(TransportOp::Pause);
        Ok(())
    }

    async fn resume(&self) -> Result<(), TransportError> {
        self.record(TransportOp::Resume);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        *self.playing.lock().unwrap() = None;
        self.record(TransportOp::Stop);
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<(), TransportError> {
        if self.playing.lock().unwrap().is_none() {
            return Err(TransportError::NoActiveTrack);
        }
        self.record(TransportOp::SetVolume(volume));
        Ok(())
    }

    async fn disconnect(&self) {
        *self.playing.lock().unwrap() = None;
        self.record(TransportOp::Disconnect);
    }
}

#[derive(Default)]
pub struct MockConnector {
    pub joins: AtomicUsize,
    transports: Mutex<HashMap<SessionKey, Arc<MockTransport>>>,
}

impl MockConnector {
    pub fn transport(&self, key: SessionKey) -> Arc<MockTransport> {
        self.transports
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .expect("transport was created")
    }
}

#[async_trait]
impl VoiceConnector for MockConnector {
    async fn join(
        &self,
        target: JoinTarget,
        _events: Arc<dyn TransportEvents>,
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.joins.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new(MockTransport::default());
        self.transports
            .lock()
            .unwrap()
            .insert(SessionKey(target.guild_id), transport.clone());
        Ok(transport)
    }
}

/// Resolves any identifier into metadata; streams can be failed per
/// provider track id to exercise the `NoStream` paths.
#[derive(Default)]
pub struct MockProvider {
    dead_streams: Mutex<HashSet<String>>,
}

impl MockProvider {
    pub fn kill_stream(&self, provider_track_id: &str) {
        self.dead_streams
            .lock()
            .unwrap()
            .insert(provider_track_id.to_string());
    }
}

#[async_trait]
impl TrackProvider for MockProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Soundcloud
    }

    async fn validate(&self, identifier: &str) -> Result<bool, ProviderError> {
        Ok(!identifier.starts_with("invalid"))
    }

    async fn resolve(&self, identifier: &str) -> Result<TrackData, ProviderError> {
        if identifier.starts_with("unresolvable") {
            return Err(ProviderError::Lookup("no such track".to_string()));
        }
        Ok(track_data(identifier))
    }

    async fn open_stream(&self, track: &QueueTrack) -> Result<AudioSource, ProviderError> {
        if self
            .dead_streams
            .lock()
            .unwrap()
            .contains(&track.data.provider_track_id)
        {
            return Err(ProviderError::NoStream("stream gone".to_string()));
        }
        Ok(AudioSource::Url(track.data.permalink.clone()))
    }
}

pub fn track_data(name: &str) -> TrackData {
    TrackData {
        provider_id: ProviderId::Soundcloud,
        provider_track_id: name.to_string(),
        title: format!("Title of {name}"),
        permalink: format!("https://soundcloud.com/artist/{name}"),
        thumbnail: None,
        duration_seconds: 180,
        authors: vec![TrackAuthor {
            username: "artist".to_string(),
            permalink: "https://soundcloud.com/artist".to_string(),
        }],
    }
}

pub struct TestBed {
    pub controller: Arc<PlaybackController>,
    pub registry: Arc<SessionRegistry>,
    pub queues: Arc<QueueStore>,
    pub bus: Arc<NotificationBus>,
    pub connector: Arc<MockConnector>,
    pub provider: Arc<MockProvider>,
}

pub struct TestBedOptions {
    pub queue_max_len: usize,
    pub idle_timeout: Duration,
    pub reconnect_grace: Duration,
}

impl Default for TestBedOptions {
    fn default() -> Self {
        Self {
            queue_max_len: 100,
            idle_timeout: Duration::from_secs(300),
            reconnect_grace: Duration::from_millis(3000),
        }
    }
}

pub fn test_bed() -> TestBed {
    test_bed_with(TestBedOptions::default())
}

pub fn test_bed_with(options: TestBedOptions) -> TestBed {
    let store = Arc::new(MemoryListStore::new());
    let queues = Arc::new(QueueStore::new(store, options.queue_max_len));
    let connector = Arc::new(MockConnector::default());
    let registry = Arc::new(SessionRegistry::new(
        connector.clone(),
        queues.clone(),
        options.reconnect_grace,
        1.0,
    ));
    let provider = Arc::new(MockProvider::default());
    let providers = Arc::new(ProviderRegistry::new().with(provider.clone()));
    let bus = Arc::new(NotificationBus::new());
    let controller = Arc::new(PlaybackController::new(
        registry.clone(),
        queues.clone(),
        providers,
        bus.clone(),
        options.idle_timeout,
    ));

    TestBed {
        controller,
        registry,
        queues,
        bus,
        connector,
        provider,
    }
}

impl TestBed {
    /// Creates the session for [`KEY`] the way the command layer does.
    pub async fn join(&self) -> Arc<MockTransport> {
        let events: Arc<dyn TransportEvents> = self.controller.clone();
        self.registry
            .get_or_create(KEY, TARGET, events)
            .await
            .expect("join succeeds");
        self.connector.transport(KEY)
    }

    /// Seeds the queue directly, bypassing provider resolution.
    pub async fn seed_queue(&self, names: &[&str]) -> Vec<QueueTrack> {
        self.queues
            .append(KEY, names.iter().map(|name| track_data(name)).collect())
            .await
            .expect("seed fits the queue")
    }

    /// Subscribes a fresh socket to [`KEY`] and returns its frame stream.
    pub fn watch(&self) -> UnboundedReceiver<String> {
        let socket_id = SocketId::new();
        let (tx, rx) = unbounded_channel();
        self.bus.register_socket(socket_id.clone(), tx);
        self.bus.subscribe(KEY, &socket_id);
        rx
    }
}

/// Drains everything currently buffered on a watcher.
pub fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(serde_json::from_str(&frame).expect("frames are JSON"));
    }
    frames
}

/// The `event` names of the drained frames, for order assertions.
pub fn event_names(frames: &[serde_json::Value]) -> Vec<String> {
    frames
        .iter()
        .map(|frame| frame["event"].as_str().unwrap_or_default().to_string())
        .collect()
}
