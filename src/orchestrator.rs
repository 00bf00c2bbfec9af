/*
 *  orchestrator.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Tracks playback state at the provider, diffs it by change
 *  fingerprint and feeds the render queue. Wakes either when a button
 *  command arrives or when the adaptive timer expires, whichever is
 *  first.
 */

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::evicting::EvictingQueue;
use crate::models::{Command, PlaybackContext, PlaybackState, RenderRequest, RenderRole, SourceKind};
use crate::spotify::{NowPlaying, PlaybackProvider, SourceRef, SpotifyError};

const RECOMMENDED_SUFFIX: &str = "recommended";

pub struct PlaybackOrchestrator<P: PlaybackProvider> {
    provider: P,
    commands: UnboundedReceiver<Command>,
    requests: Arc<EvictingQueue<RenderRequest>>,
    poll_interval: Duration,
    state: Option<PlaybackState>,
    next_wake: Instant,
}

impl<P: PlaybackProvider> PlaybackOrchestrator<P> {
    pub fn new(
        provider: P,
        commands: UnboundedReceiver<Command>,
        requests: Arc<EvictingQueue<RenderRequest>>,
        poll_interval: Duration,
    ) -> Self {
        PlaybackOrchestrator {
            provider,
            commands,
            requests,
            poll_interval,
            state: None,
            // First tick fires immediately.
            next_wake: Instant::now(),
        }
    }

    /// Resolves where the current track is playing from. An unchanged
    /// context URI reuses the stored context verbatim, skipping any
    /// lookup; only a playlist kind ever needs a provider round-trip.
    async fn resolve_context(
        &self,
        source: Option<&SourceRef>,
        playing: &NowPlaying,
    ) -> Result<Option<PlaybackContext>, SpotifyError> {
        let Some(source) = source else {
            return Ok(None);
        };

        if let Some(prev) = self.state.as_ref().and_then(|s| s.context.as_ref()) {
            if prev.uri == source.uri {
                return Ok(Some(prev.clone()));
            }
        }

        let mut kind = SourceKind::from_wire(&source.kind);
        let title = match kind {
            SourceKind::Playlist if source.uri.ends_with(RECOMMENDED_SUFFIX) => {
                kind = SourceKind::Recommended;
                String::new()
            }
            SourceKind::Playlist => self.provider.playlist_name(&source.uri).await?,
            SourceKind::Artist => playing
                .track
                .as_ref()
                .and_then(|t| t.artists.first())
                .cloned()
                .unwrap_or_default(),
            SourceKind::Album => playing
                .track
                .as_ref()
                .map(|t| t.album.clone())
                .unwrap_or_default(),
            _ => String::new(),
        };

        Ok(Some(PlaybackContext {
            uri: source.uri.clone(),
            kind,
            title,
        }))
    }

    /// Queries the provider and assembles a fresh PlaybackState.
    /// "Nothing playing" comes back as None and is a normal outcome.
    async fn fetch_state(&self) -> Result<Option<PlaybackState>, SpotifyError> {
        let Some(playing) = self.provider.currently_playing().await? else {
            return Ok(None);
        };
        // Two separate calls; the queue view may lag the now-playing
        // view and the two can briefly disagree.
        let queue = self.provider.play_queue().await?;

        let now_playing = queue.current.or_else(|| playing.track.clone());
        let ends_at = now_playing.as_ref().map(|t| {
            let remaining = t.duration_ms.saturating_sub(playing.progress_ms);
            Instant::now().into_std() + Duration::from_millis(remaining)
        });
        let context = self.resolve_context(playing.context.as_ref(), &playing).await?;

        Ok(Some(PlaybackState {
            now_playing,
            next_up: queue.next_up,
            context,
            ends_at,
        }))
    }

    fn enqueue_render_requests(&self, state: &PlaybackState) -> Vec<RenderRequest> {
        let context = state
            .context
            .clone()
            .unwrap_or_else(PlaybackContext::unknown);
        let mut out = Vec::new();
        if let Some(track) = &state.now_playing {
            out.push(RenderRequest {
                role: RenderRole::Current,
                track: track.clone(),
                context: context.clone(),
            });
        }
        if let Some(track) = &state.next_up {
            out.push(RenderRequest {
                role: RenderRole::Upcoming,
                track: track.clone(),
                context,
            });
        }
        out
    }

    /// Executes a button command, returning whether playback state is
    /// expected to have changed as a result.
    async fn handle_command(&mut self, command: Command) -> Result<bool, SpotifyError> {
        match command {
            Command::Next => {
                self.provider.next_track().await?;
                Ok(true)
            }
            Command::Previous => {
                self.provider.previous_track().await?;
                Ok(true)
            }
            Command::Save => {
                match self.state.as_ref().and_then(|s| s.now_playing.as_ref()) {
                    Some(track) => self.provider.save_track(&track.id).await?,
                    None => warn!("save requested with nothing playing, ignored"),
                }
                Ok(false)
            }
            Command::Toggle => {
                match self.provider.currently_playing().await? {
                    Some(playing) if playing.is_playing => self.provider.pause_playback().await?,
                    Some(_) => self.provider.resume_playback().await?,
                    None => debug!("toggle requested with nothing playing, ignored"),
                }
                Ok(false)
            }
        }
    }

    fn update_next_wake(&mut self) {
        let default_poll = Instant::now() + self.poll_interval;
        self.next_wake = match self.state.as_ref().and_then(|s| s.ends_at) {
            Some(ends_at) => Instant::from_std(ends_at).min(default_poll),
            None => default_poll,
        };
    }

    /// One wake-up: handle a command if one arrived, refresh state when
    /// warranted, enqueue renders on a fingerprint change and reschedule.
    pub async fn tick(&mut self, command: Option<Command>) -> Result<(), SpotifyError> {
        let refresh = match command {
            Some(cmd) => self.handle_command(cmd).await?,
            None => true,
        };
        if !refresh {
            return Ok(());
        }

        let candidate = self.fetch_state().await?;
        let changed = candidate.as_ref().map(PlaybackState::fingerprint)
            != self.state.as_ref().map(PlaybackState::fingerprint);
        if changed {
            self.state = candidate;
            if let Some(state) = &self.state {
                for request in self.enqueue_render_requests(state) {
                    debug!("enqueue {:?} render for {}", request.role, request.track.id);
                    self.requests.put(request).await;
                }
            }
        } else {
            self.state = candidate;
        }

        self.update_next_wake();
        Ok(())
    }

    /// Worker loop. A failed tick is logged and retried after the
    /// regular poll interval.
    pub async fn run(mut self, token: CancellationToken) {
        info!("playback orchestrator started");
        loop {
            let command = tokio::select! {
                _ = token.cancelled() => break,
                recv = timeout_at(self.next_wake, self.commands.recv()) => match recv {
                    Ok(Some(cmd)) => Some(cmd),
                    // All senders dropped, nothing left to drive us but
                    // the timer.
                    Ok(None) => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep_until(self.next_wake) => None,
                        }
                    }
                    Err(_) => None,
                },
            };

            if let Err(e) = self.tick(command).await {
                error!("playback tick failed: {e}");
                self.next_wake = Instant::now() + self.poll_interval;
            }
        }
        info!("playback orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Track;
    use crate::spotify::PlayQueue;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn track(id: &str) -> Track {
        Track {
            id: id.to_string(),
            album_image_url: String::new(),
            title: format!("title {id}"),
            artists: vec!["Artist One".to_string()],
            album: "Album".to_string(),
            duration_ms: 180_000,
        }
    }

    fn playing(id: &str, context_uri: &str, kind: &str) -> NowPlaying {
        NowPlaying {
            track: Some(track(id)),
            progress_ms: 5_000,
            is_playing: true,
            context: Some(SourceRef {
                uri: context_uri.to_string(),
                kind: kind.to_string(),
            }),
        }
    }

    #[derive(Default)]
    struct ScriptedProvider {
        playing: Mutex<VecDeque<Option<NowPlaying>>>,
        queues: Mutex<VecDeque<PlayQueue>>,
        playlist_lookups: Mutex<u32>,
        skips: Mutex<u32>,
    }

    #[async_trait]
    impl PlaybackProvider for ScriptedProvider {
        async fn currently_playing(&self) -> Result<Option<NowPlaying>, SpotifyError> {
            Ok(self.playing.lock().unwrap().pop_front().flatten())
        }
        async fn play_queue(&self) -> Result<PlayQueue, SpotifyError> {
            Ok(self
                .queues
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(PlayQueue {
                    current: None,
                    next_up: None,
                }))
        }
        async fn playlist_name(&self, _uri: &str) -> Result<String, SpotifyError> {
            *self.playlist_lookups.lock().unwrap() += 1;
            Ok("Chill".to_string())
        }
        async fn next_track(&self) -> Result<(), SpotifyError> {
            *self.skips.lock().unwrap() += 1;
            Ok(())
        }
        async fn previous_track(&self) -> Result<(), SpotifyError> {
            Ok(())
        }
        async fn save_track(&self, _track_id: &str) -> Result<(), SpotifyError> {
            Ok(())
        }
        async fn pause_playback(&self) -> Result<(), SpotifyError> {
            Ok(())
        }
        async fn resume_playback(&self) -> Result<(), SpotifyError> {
            Ok(())
        }
    }

    fn orchestrator(
        provider: ScriptedProvider,
    ) -> (
        PlaybackOrchestrator<ScriptedProvider>,
        Arc<EvictingQueue<RenderRequest>>,
    ) {
        let requests = Arc::new(EvictingQueue::new(2));
        let (_tx, rx) = mpsc::unbounded_channel();
        let orch =
            PlaybackOrchestrator::new(provider, rx, requests.clone(), Duration::from_secs(30));
        (orch, requests)
    }

    #[tokio::test]
    async fn test_change_enqueues_current_then_upcoming() {
        let provider = ScriptedProvider::default();
        provider
            .playing
            .lock()
            .unwrap()
            .push_back(Some(playing("a", "spotify:playlist:1", "playlist")));
        provider.queues.lock().unwrap().push_back(PlayQueue {
            current: Some(track("a")),
            next_up: Some(track("b")),
        });

        let (mut orch, requests) = orchestrator(provider);
        orch.tick(None).await.unwrap();

        let first = requests.get(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.role, RenderRole::Current);
        assert_eq!(first.track.id, "a");
        assert_eq!(first.context.title, "Chill");
        let second = requests.get(Duration::from_millis(10)).await.unwrap();
        assert_eq!(second.role, RenderRole::Upcoming);
        assert_eq!(second.track.id, "b");
    }

    #[tokio::test]
    async fn test_unchanged_fingerprint_enqueues_nothing() {
        let provider = ScriptedProvider::default();
        for _ in 0..2 {
            provider
                .playing
                .lock()
                .unwrap()
                .push_back(Some(playing("a", "spotify:playlist:1", "playlist")));
            provider.queues.lock().unwrap().push_back(PlayQueue {
                current: Some(track("a")),
                next_up: Some(track("b")),
            });
        }

        let (mut orch, requests) = orchestrator(provider);
        orch.tick(None).await.unwrap();
        let _ = requests.get(Duration::from_millis(10)).await;
        let _ = requests.get(Duration::from_millis(10)).await;

        orch.tick(None).await.unwrap();
        assert!(requests.get(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_context_reused_when_uri_unchanged() {
        let provider = ScriptedProvider::default();
        for id in ["a", "b"] {
            provider
                .playing
                .lock()
                .unwrap()
                .push_back(Some(playing(id, "spotify:playlist:1", "playlist")));
            provider.queues.lock().unwrap().push_back(PlayQueue {
                current: Some(track(id)),
                next_up: None,
            });
        }

        let (mut orch, _requests) = orchestrator(provider);
        orch.tick(None).await.unwrap();
        orch.tick(None).await.unwrap();
        assert_eq!(*orch.provider.playlist_lookups.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recommended_suffix_overrides_playlist_kind() {
        let provider = ScriptedProvider::default();
        provider.playing.lock().unwrap().push_back(Some(playing(
            "a",
            "spotify:playlist:recommended",
            "playlist",
        )));
        provider.queues.lock().unwrap().push_back(PlayQueue {
            current: Some(track("a")),
            next_up: None,
        });

        let (mut orch, requests) = orchestrator(provider);
        orch.tick(None).await.unwrap();

        let req = requests.get(Duration::from_millis(10)).await.unwrap();
        assert_eq!(req.context.kind, SourceKind::Recommended);
        assert!(req.context.title.is_empty());
        assert_eq!(*orch.provider.playlist_lookups.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nothing_playing_skips_enqueue_and_uses_poll_interval() {
        let provider = ScriptedProvider::default();
        provider.playing.lock().unwrap().push_back(None);

        let (mut orch, requests) = orchestrator(provider);
        let before = Instant::now();
        orch.tick(None).await.unwrap();
        assert!(requests.get(Duration::from_millis(10)).await.is_none());
        let wait = orch.next_wake - before;
        assert!(wait >= Duration::from_secs(29) && wait <= Duration::from_secs(31));
    }

    #[tokio::test]
    async fn test_next_wake_prefers_track_end() {
        let provider = ScriptedProvider::default();
        let mut np = playing("a", "spotify:playlist:1", "playlist");
        // 5s of track left against a 30s poll interval.
        np.track.as_mut().unwrap().duration_ms = 10_000;
        np.progress_ms = 5_000;
        provider.playing.lock().unwrap().push_back(Some(np));
        provider.queues.lock().unwrap().push_back(PlayQueue {
            current: Some({
                let mut t = track("a");
                t.duration_ms = 10_000;
                t
            }),
            next_up: None,
        });

        let (mut orch, _requests) = orchestrator(provider);
        let before = Instant::now();
        orch.tick(None).await.unwrap();
        let wait = orch.next_wake - before;
        assert!(wait <= Duration::from_secs(6), "wake in {wait:?}");
    }

    #[tokio::test]
    async fn test_next_command_forces_refresh() {
        let provider = ScriptedProvider::default();
        provider
            .playing
            .lock()
            .unwrap()
            .push_back(Some(playing("b", "spotify:playlist:1", "playlist")));
        provider.queues.lock().unwrap().push_back(PlayQueue {
            current: Some(track("b")),
            next_up: None,
        });

        let (mut orch, requests) = orchestrator(provider);
        orch.tick(Some(Command::Next)).await.unwrap();
        assert_eq!(*orch.provider.skips.lock().unwrap(), 1);
        assert!(requests.get(Duration::from_millis(10)).await.is_some());
    }

    #[tokio::test]
    async fn test_toggle_does_not_refresh() {
        let provider = ScriptedProvider::default();
        provider
            .playing
            .lock()
            .unwrap()
            .push_back(Some(playing("a", "spotify:playlist:1", "playlist")));

        let (mut orch, requests) = orchestrator(provider);
        orch.tick(Some(Command::Toggle)).await.unwrap();
        // The one scripted currently-playing answer went to the toggle
        // decision, not a refresh.
        assert!(requests.get(Duration::from_millis(10)).await.is_none());
        assert!(orch.state.is_none());
    }
}
