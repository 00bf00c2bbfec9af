/*
 *  end_to_end.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Drives the orchestrator, image pipeline and display worker against
 *  a scripted playback provider and checks what reaches the panel.
 */

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use inkbeat::canvas::CanvasError;
use inkbeat::evicting::EvictingQueue;
use inkbeat::models::{Frame, PlaybackContext, RenderRequest, RenderRole, Track};
use inkbeat::orchestrator::PlaybackOrchestrator;
use inkbeat::pipeline::{FrameRenderer, ImagePipeline};
use inkbeat::renderer::{DisplayWorker, MockEpaper};
use inkbeat::spotify::{NowPlaying, PlayQueue, PlaybackProvider, SourceRef, SpotifyError};

fn track(id: &str, title: &str) -> Track {
    Track {
        id: id.to_string(),
        album_image_url: String::new(),
        title: title.to_string(),
        artists: vec!["Artist".to_string()],
        album: "Album".to_string(),
        duration_ms: 3_000,
    }
}

fn now_playing(t: &Track, context_uri: &str) -> NowPlaying {
    NowPlaying {
        track: Some(t.clone()),
        progress_ms: 0,
        is_playing: true,
        context: Some(SourceRef {
            uri: context_uri.to_string(),
            kind: "playlist".to_string(),
        }),
    }
}

/// Scripted provider: each poll pops the next answer; the last answer
/// repeats once the script runs dry.
struct ScriptedProvider {
    playing: Mutex<VecDeque<NowPlaying>>,
    queues: Mutex<VecDeque<PlayQueue>>,
    last_playing: Mutex<Option<NowPlaying>>,
    last_queue: Mutex<Option<PlayQueue>>,
}

impl ScriptedProvider {
    fn new(playing: Vec<NowPlaying>, queues: Vec<PlayQueue>) -> Self {
        ScriptedProvider {
            playing: Mutex::new(playing.into()),
            queues: Mutex::new(queues.into()),
            last_playing: Mutex::new(None),
            last_queue: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PlaybackProvider for ScriptedProvider {
    async fn currently_playing(&self) -> Result<Option<NowPlaying>, SpotifyError> {
        let mut last = self.last_playing.lock().unwrap();
        if let Some(next) = self.playing.lock().unwrap().pop_front() {
            *last = Some(next);
        }
        Ok(last.clone())
    }

    async fn play_queue(&self) -> Result<PlayQueue, SpotifyError> {
        let mut last = self.last_queue.lock().unwrap();
        if let Some(next) = self.queues.lock().unwrap().pop_front() {
            *last = Some(next);
        }
        Ok(last.clone().unwrap_or(PlayQueue {
            current: None,
            next_up: None,
        }))
    }

    async fn playlist_name(&self, _uri: &str) -> Result<String, SpotifyError> {
        Ok("Chill".to_string())
    }

    async fn next_track(&self) -> Result<(), SpotifyError> {
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

struct StubRenderer;

#[async_trait]
impl FrameRenderer for StubRenderer {
    async fn render(
        &mut self,
        _track: &Track,
        _context: &PlaybackContext,
    ) -> Result<RgbImage, CanvasError> {
        Ok(RgbImage::new(8, 8))
    }
}

#[tokio::test]
async fn test_track_change_flows_to_panel_once() {
    let a = track("track-a", "Song A");
    let b = track("track-b", "Song B");
    let next = track("track-n", "Up Next");

    // Poll one: A playing from the Chill playlist with a next-up.
    // Poll two: B playing from a different context.
    let provider = ScriptedProvider::new(
        vec![
            now_playing(&a, "spotify:playlist:chill"),
            now_playing(&b, "spotify:album:other"),
        ],
        vec![
            PlayQueue {
                current: Some(a.clone()),
                next_up: Some(next.clone()),
            },
            PlayQueue {
                current: Some(b.clone()),
                next_up: None,
            },
        ],
    );

    let requests: Arc<EvictingQueue<RenderRequest>> = Arc::new(EvictingQueue::new(2));
    let (_command_tx, command_rx) = mpsc::unbounded_channel();
    let mut orchestrator = PlaybackOrchestrator::new(
        provider,
        command_rx,
        requests.clone(),
        Duration::from_secs(30),
    );

    // First tick: fingerprint changes from empty, CURRENT then UPCOMING.
    orchestrator.tick(None).await.unwrap();
    let first = requests.get(Duration::from_millis(20)).await.unwrap();
    assert_eq!(first.role, RenderRole::Current);
    assert_eq!(first.track.id, "track-a");
    assert_eq!(first.context.title, "Chill");
    let second = requests.get(Duration::from_millis(20)).await.unwrap();
    assert_eq!(second.role, RenderRole::Upcoming);
    assert_eq!(second.track.id, "track-n");

    // Second tick: the context and track both changed.
    orchestrator.tick(None).await.unwrap();
    let third = requests.get(Duration::from_millis(20)).await.unwrap();
    assert_eq!(third.role, RenderRole::Current);
    assert_eq!(third.track.id, "track-b");
    assert!(requests.get(Duration::from_millis(20)).await.is_none());
}

#[tokio::test]
async fn test_pipeline_and_display_forward_each_track_once() {
    let requests: Arc<EvictingQueue<RenderRequest>> = Arc::new(EvictingQueue::new(2));
    let frames: Arc<EvictingQueue<Frame>> = Arc::new(EvictingQueue::new(1));

    let pipeline = ImagePipeline::new(StubRenderer, requests.clone(), frames.clone());
    let panel = MockEpaper::new();
    let display = DisplayWorker::new(panel.clone(), frames.clone(), 0.75);

    let shutdown = CancellationToken::new();
    let pipeline_task = tokio::spawn(pipeline.run(shutdown.child_token()));
    let display_task = tokio::spawn(display.run(shutdown.child_token()));

    let context = PlaybackContext {
        uri: "spotify:playlist:chill".to_string(),
        kind: inkbeat::models::SourceKind::Playlist,
        title: "Chill".to_string(),
    };

    // A shows up twice; the repeat frame must not hit the panel again.
    for id in ["track-a", "track-a", "track-b"] {
        requests
            .put(RenderRequest {
                role: RenderRole::Current,
                track: track(id, id),
                context: context.clone(),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    shutdown.cancel();
    pipeline_task.await.unwrap();
    display_task.await.unwrap();

    // One refresh per distinct track id.
    assert_eq!(panel.show_calls(), 2);
    assert_eq!(panel.last_size(), Some((8, 8)));
}
