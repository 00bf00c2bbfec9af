/*
 *  models.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Shared data types passed between the workers. Everything here is
 *  immutable once constructed from provider data.
 */

use std::fmt;
use std::time::Instant;

use image::RgbImage;

/// A single playable track as reported by the playback provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub album_image_url: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: String,
    pub duration_ms: u64,
}

/// What kind of collection the current track is playing from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Playlist,
    Artist,
    Album,
    Recommended,
    Unknown,
}

impl SourceKind {
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "playlist" => SourceKind::Playlist,
            "artist" => SourceKind::Artist,
            "album" => SourceKind::Album,
            _ => SourceKind::Unknown,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceKind::Playlist => "playlist",
            SourceKind::Artist => "artist",
            SourceKind::Album => "album",
            SourceKind::Recommended => "recommended",
            SourceKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// The collection the current track is playing from, with a resolved
/// human-readable title (may be empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackContext {
    pub uri: String,
    pub kind: SourceKind,
    pub title: String,
}

impl PlaybackContext {
    /// Placeholder used when the provider reports no context at all.
    pub fn unknown() -> Self {
        PlaybackContext {
            uri: String::new(),
            kind: SourceKind::Unknown,
            title: String::new(),
        }
    }
}

/// Snapshot of what the playback service is doing. Replaced wholesale on
/// every orchestrator tick, never mutated in place.
#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub now_playing: Option<Track>,
    pub next_up: Option<Track>,
    pub context: Option<PlaybackContext>,
    /// Monotonic instant at which the now-playing track is predicted to
    /// finish. `None` means unknown (treated as never).
    pub ends_at: Option<Instant>,
}

impl PlaybackState {
    /// The subset of fields used for change detection. `ends_at` is
    /// deliberately excluded: it drifts by a few milliseconds between
    /// polls and would produce spurious "changed" signals.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            now_playing: self.now_playing.as_ref().map(|t| t.id.clone()),
            next_up: self.next_up.as_ref().map(|t| t.id.clone()),
            context_uri: self.context.as_ref().map(|c| c.uri.clone()),
        }
    }
}

/// Value-compared change fingerprint, see [`PlaybackState::fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub now_playing: Option<String>,
    pub next_up: Option<String>,
    pub context_uri: Option<String>,
}

/// Discrete user action from the physical buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Next,
    Previous,
    Save,
    Toggle,
}

/// Whether a render request is for the track on screen or a pre-render of
/// the upcoming one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderRole {
    Current,
    Upcoming,
}

/// Work item for the image pipeline.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub role: RenderRole,
    pub track: Track,
    pub context: PlaybackContext,
}

/// A fully composed bitmap ready for the physical display.
#[derive(Debug, Clone)]
pub struct Frame {
    pub track_id: String,
    pub image: RgbImage,
}
