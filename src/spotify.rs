/*
 *  spotify.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Playback-provider boundary: the `PlaybackProvider` trait the
 *  orchestrator is written against, the wire structs of the Spotify Web
 *  API, and a client over the retrying transport. Wire payloads are
 *  parsed once here; only typed records cross into core logic.
 */

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::models::Track;
use crate::transport::{self, TransportError};

pub const DEFAULT_BASE_URL: &str = "https://api.spotify.com";

#[derive(Debug, Error)]
pub enum SpotifyError {
    #[error("provider transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("provider body read failed: {0}")]
    Body(#[from] reqwest::Error),
    #[error("provider payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed context URI: {0}")]
    MalformedUri(String),
}

/// Raw reference to the collection playback was started from; resolved
/// into a `PlaybackContext` by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub uri: String,
    pub kind: String,
}

/// What the provider says is playing right now. `track: None` with the
/// struct present happens for ads and local files; the whole struct being
/// absent means nothing is playing - both are valid, non-error results.
#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub track: Option<Track>,
    pub progress_ms: u64,
    pub is_playing: bool,
    pub context: Option<SourceRef>,
}

/// The provider's view of the play queue. Fetched separately from
/// [`NowPlaying`], so the two may disagree.
#[derive(Debug, Clone)]
pub struct PlayQueue {
    pub current: Option<Track>,
    pub next_up: Option<Track>,
}

/// Everything the orchestrator needs from the playback service.
#[async_trait]
pub trait PlaybackProvider: Send + Sync {
    async fn currently_playing(&self) -> Result<Option<NowPlaying>, SpotifyError>;
    async fn play_queue(&self) -> Result<PlayQueue, SpotifyError>;
    async fn playlist_name(&self, uri: &str) -> Result<String, SpotifyError>;
    async fn next_track(&self) -> Result<(), SpotifyError>;
    async fn previous_track(&self) -> Result<(), SpotifyError>;
    async fn save_track(&self, track_id: &str) -> Result<(), SpotifyError>;
    async fn pause_playback(&self) -> Result<(), SpotifyError>;
    async fn resume_playback(&self) -> Result<(), SpotifyError>;
}

// -- wire format ----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct WireAlbum {
    name: String,
    #[serde(default)]
    images: Vec<WireImage>,
}

#[derive(Debug, Deserialize)]
struct WireArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireTrack {
    id: Option<String>,
    name: String,
    duration_ms: u64,
    album: WireAlbum,
    #[serde(default)]
    artists: Vec<WireArtist>,
}

impl WireTrack {
    /// Tracks without a stable id (local files, ads) cannot be keyed or
    /// deduplicated downstream, so they collapse to `None`.
    fn into_track(self) -> Option<Track> {
        let id = self.id?;
        Some(Track {
            id,
            album_image_url: self
                .album
                .images
                .first()
                .map(|i| i.url.clone())
                .unwrap_or_default(),
            title: self.name,
            artists: self.artists.into_iter().map(|a| a.name).collect(),
            album: self.album.name,
            duration_ms: self.duration_ms,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireContext {
    uri: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct WireCurrentlyPlaying {
    context: Option<WireContext>,
    #[serde(default)]
    progress_ms: u64,
    #[serde(default)]
    is_playing: bool,
    item: Option<WireTrack>,
}

#[derive(Debug, Deserialize)]
struct WireQueue {
    currently_playing: Option<WireTrack>,
    #[serde(default)]
    queue: Vec<WireTrack>,
}

#[derive(Debug, Deserialize)]
struct WirePlaylist {
    name: String,
}

// -- client ---------------------------------------------------------------

/// Spotify Web API client. Token refresh lives with the platform layer;
/// this client only attaches the bearer token it is given.
pub struct SpotifyClient {
    client: Client,
    base_url: String,
    token: String,
}

impl SpotifyClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        SpotifyClient {
            client: transport::build_client(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, SpotifyError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self.client.get(&url).bearer_auth(&self.token);
        let response = transport::send_with_retry(request).await?;

        // 204 or an empty body both mean "nothing to report".
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = response.text().await?;
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    async fn action(&self, method: reqwest::Method, path: &str) -> Result<(), SpotifyError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self.client.request(method, &url).bearer_auth(&self.token);
        transport::send_with_retry(request).await?;
        Ok(())
    }

    fn playlist_id(uri: &str) -> Result<&str, SpotifyError> {
        match uri.rsplit(':').next() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(SpotifyError::MalformedUri(uri.to_string())),
        }
    }
}

#[async_trait]
impl PlaybackProvider for SpotifyClient {
    async fn currently_playing(&self) -> Result<Option<NowPlaying>, SpotifyError> {
        let wire: Option<WireCurrentlyPlaying> =
            self.get_json("/v1/me/player/currently-playing").await?;
        Ok(wire.map(|w| NowPlaying {
            track: w.item.and_then(WireTrack::into_track),
            progress_ms: w.progress_ms,
            is_playing: w.is_playing,
            context: w.context.map(|c| SourceRef {
                uri: c.uri,
                kind: c.kind,
            }),
        }))
    }

    async fn play_queue(&self) -> Result<PlayQueue, SpotifyError> {
        let wire: Option<WireQueue> = self.get_json("/v1/me/player/queue").await?;
        let Some(wire) = wire else {
            return Ok(PlayQueue {
                current: None,
                next_up: None,
            });
        };
        Ok(PlayQueue {
            current: wire.currently_playing.and_then(WireTrack::into_track),
            next_up: wire
                .queue
                .into_iter()
                .find_map(WireTrack::into_track),
        })
    }

    async fn playlist_name(&self, uri: &str) -> Result<String, SpotifyError> {
        let id = Self::playlist_id(uri)?;
        let wire: Option<WirePlaylist> = self
            .get_json(&format!("/v1/playlists/{id}?fields=name"))
            .await?;
        Ok(wire.map(|p| p.name).unwrap_or_default())
    }

    async fn next_track(&self) -> Result<(), SpotifyError> {
        debug!("provider action: next");
        self.action(reqwest::Method::POST, "/v1/me/player/next").await
    }

    async fn previous_track(&self) -> Result<(), SpotifyError> {
        debug!("provider action: previous");
        self.action(reqwest::Method::POST, "/v1/me/player/previous")
            .await
    }

    async fn save_track(&self, track_id: &str) -> Result<(), SpotifyError> {
        debug!("provider action: save {track_id}");
        self.action(reqwest::Method::PUT, &format!("/v1/me/tracks?ids={track_id}"))
            .await
    }

    async fn pause_playback(&self) -> Result<(), SpotifyError> {
        debug!("provider action: pause");
        self.action(reqwest::Method::PUT, "/v1/me/player/pause").await
    }

    async fn resume_playback(&self) -> Result<(), SpotifyError> {
        debug!("provider action: play");
        self.action(reqwest::Method::PUT, "/v1/me/player/play").await
    }
}
