use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::info;

use groove_bot::error::ProviderError;
use groove_bot::models::{ProviderId, QueueTrack, TrackAuthor, TrackData};
use groove_bot::provider::{AudioSource, TrackProvider};

/// SoundCloud adapter. Metadata comes out of a `yt-dlp -j` subprocess;
/// the actual stream is opened later by the voice transport's loader, so
/// `open_stream` only points it at the track page.
pub struct SoundcloudProvider;

impl SoundcloudProvider {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Deserialize)]
pub struct YtdlpTrack {
    pub id: String,
    pub title: String,
    #[serde(rename = "webpage_url")]
    pub webpage_url: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    #[serde(rename = "uploader_url")]
    pub uploader_url: Option<String>,
}

/// A track page lives at soundcloud.com/{artist}/{slug}; sets and artist
/// pages are not playable entries.
fn is_track_url(identifier: &str) -> bool {
    let Some(rest) = identifier
        .strip_prefix("https://")
        .or_else(|| identifier.strip_prefix("http://"))
    else {
        return false;
    };
    let mut segments = rest.trim_end_matches('/').split('/');
    let host = segments.next().unwrap_or_default();
    if !(host == "soundcloud.com"
        || host == "www.soundcloud.com"
        || host == "m.soundcloud.com"
        || host == "on.soundcloud.com")
    {
        return false;
    }
    let path: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();
    // short links carry a single opaque segment
    if host == "on.soundcloud.com" {
        return path.len() == 1;
    }
    path.len() == 2 && path[1] != "sets"
}

fn track_from_ytdlp(parsed: YtdlpTrack, fallback_permalink: &str) -> TrackData {
    let permalink = parsed
        .webpage_url
        .unwrap_or_else(|| fallback_permalink.to_string());
    let authors = match (parsed.uploader, parsed.uploader_url) {
        (Some(username), uploader_url) => vec![TrackAuthor {
            permalink: uploader_url.unwrap_or_default(),
            username,
        }],
        (None, _) => Vec::new(),
    };
    TrackData {
        provider_id: ProviderId::Soundcloud,
        provider_track_id: parsed.id,
        title: parsed.title,
        permalink,
        thumbnail: parsed.thumbnail,
        duration_seconds: parsed.duration.unwrap_or(0.0).round() as u64,
        authors,
    }
}

async fn ytdlp_json(target: &str) -> Result<YtdlpTrack, ProviderError> {
    info!("Resolving {target} through yt-dlp");

    let output = Command::new("yt-dlp")
        .arg("-j")
        .arg("--no-playlist")
        .arg(target)
        .output()
        .await
        .map_err(|err| ProviderError::Lookup(format!("yt-dlp did not start: {err}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProviderError::Lookup(format!(
            "yt-dlp exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| ProviderError::Lookup("yt-dlp produced no metadata".to_string()))?;
    serde_json::from_str(line).map_err(|err| ProviderError::Lookup(err.to_string()))
}

#[async_trait]
impl TrackProvider for SoundcloudProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Soundcloud
    }

    /// Track URLs pass, other URLs fail, and anything that is not a URL
    /// is accepted as a free-text search query.
    async fn validate(&self, identifier: &str) -> Result<bool, ProviderError> {
        if identifier.starts_with("http://") || identifier.starts_with("https://") {
            Ok(is_track_url(identifier))
        } else {
            Ok(!identifier.trim().is_empty())
        }
    }

    async fn resolve(&self, identifier: &str) -> Result<TrackData, ProviderError> {
        let target = if identifier.starts_with("http") {
            identifier.to_string()
        } else {
            format!("scsearch1:{identifier}")
        };
        let parsed = ytdlp_json(&target).await?;
        Ok(track_from_ytdlp(parsed, identifier))
    }

    async fn open_stream(&self, track: &QueueTrack) -> Result<AudioSource, ProviderError> {
        if !track.data.permalink.is_empty() {
            return Ok(AudioSource::Url(track.data.permalink.clone()));
        }
        // entry lost its permalink somewhere along the way; a title search
        // is still worth a shot, and yt-dlp resolves scsearch1: like a URL
        if !track.data.title.is_empty() {
            return Ok(AudioSource::Url(format!("scsearch1:{}", track.data.title)));
        }
        Err(ProviderError::NoStream(
            "track has neither permalink nor title".to_string(),
        ))
    }
}
