/*
 *  pipeline.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  The render worker. Pulls render requests off the bounded queue,
 *  keeps a two-slot pre-render cache (current track plus the expected
 *  next one) and pushes finished frames toward the display worker.
 */

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::canvas::{Canvas, CanvasError};
use crate::evicting::EvictingQueue;
use crate::lru::LruMap;
use crate::models::{Frame, PlaybackContext, RenderRequest, RenderRole, Track};

const RECV_TIMEOUT: Duration = Duration::from_millis(500);
const CACHE_SLOTS: usize = 2;

/// Anything that can turn a track into a display bitmap.
#[async_trait]
pub trait FrameRenderer: Send {
    async fn render(
        &mut self,
        track: &Track,
        context: &PlaybackContext,
    ) -> Result<RgbImage, CanvasError>;
}

#[async_trait]
impl FrameRenderer for Canvas {
    async fn render(
        &mut self,
        track: &Track,
        context: &PlaybackContext,
    ) -> Result<RgbImage, CanvasError> {
        Canvas::render(self, track, context).await
    }
}

pub struct ImagePipeline<R: FrameRenderer> {
    renderer: R,
    cache: LruMap<(String, String), RgbImage>,
    requests: Arc<EvictingQueue<RenderRequest>>,
    frames: Arc<EvictingQueue<Frame>>,
}

impl<R: FrameRenderer> ImagePipeline<R> {
    pub fn new(
        renderer: R,
        requests: Arc<EvictingQueue<RenderRequest>>,
        frames: Arc<EvictingQueue<Frame>>,
    ) -> Self {
        ImagePipeline {
            renderer,
            cache: LruMap::new(CACHE_SLOTS),
            requests,
            frames,
        }
    }

    /// Renders (or reuses) the bitmap for one request. An UPCOMING
    /// request only warms the cache; a CURRENT request removes its
    /// entry and emits a frame, so a later eviction can never replay
    /// a stale image.
    async fn handle(&mut self, request: RenderRequest) -> Result<(), CanvasError> {
        let key = (request.track.id.clone(), request.context.uri.clone());

        if self.cache.get(&key).is_none() {
            debug!(
                "rendering {:?} frame for {} ({})",
                request.role, request.track.title, request.track.id
            );
            let image = self.renderer.render(&request.track, &request.context).await?;
            self.cache.insert(key.clone(), image);
        } else {
            debug!("pre-rendered frame available for {}", request.track.id);
        }

        if request.role == RenderRole::Current {
            if let Some(image) = self.cache.remove(&key) {
                self.frames
                    .put(Frame {
                        track_id: request.track.id.clone(),
                        image,
                    })
                    .await;
            }
        }
        Ok(())
    }

    /// Worker loop. A failed render is logged and the loop carries on;
    /// only cancellation ends it.
    pub async fn run(mut self, token: CancellationToken) {
        info!("image pipeline started");
        loop {
            let request = tokio::select! {
                _ = token.cancelled() => break,
                req = self.requests.get(RECV_TIMEOUT) => req,
            };
            let Some(request) = request else { continue };
            let track_id = request.track.id.clone();
            if let Err(e) = self.handle(request).await {
                error!("render failed for track {track_id}: {e}");
            }
        }
        info!("image pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    struct CountingRenderer {
        calls: usize,
    }

    #[async_trait]
    impl FrameRenderer for CountingRenderer {
        async fn render(
            &mut self,
            _track: &Track,
            _context: &PlaybackContext,
        ) -> Result<RgbImage, CanvasError> {
            self.calls += 1;
            Ok(RgbImage::new(4, 4))
        }
    }

    fn track(id: &str) -> Track {
        Track {
            id: id.to_string(),
            album_image_url: String::new(),
            title: format!("title {id}"),
            artists: vec!["artist".to_string()],
            album: "album".to_string(),
            duration_ms: 180_000,
        }
    }

    fn context(uri: &str) -> PlaybackContext {
        PlaybackContext {
            uri: uri.to_string(),
            kind: SourceKind::Playlist,
            title: "Chill".to_string(),
        }
    }

    fn pipeline() -> ImagePipeline<CountingRenderer> {
        ImagePipeline::new(
            CountingRenderer { calls: 0 },
            Arc::new(EvictingQueue::new(2)),
            Arc::new(EvictingQueue::new(1)),
        )
    }

    #[tokio::test]
    async fn test_current_emits_frame() {
        let mut p = pipeline();
        let frames = p.frames.clone();
        p.handle(RenderRequest {
            role: RenderRole::Current,
            track: track("a"),
            context: context("ctx:1"),
        })
        .await
        .unwrap();
        let frame = frames.get(Duration::from_millis(10)).await.unwrap();
        assert_eq!(frame.track_id, "a");
    }

    #[tokio::test]
    async fn test_upcoming_only_warms_cache() {
        let mut p = pipeline();
        let frames = p.frames.clone();
        p.handle(RenderRequest {
            role: RenderRole::Upcoming,
            track: track("b"),
            context: context("ctx:1"),
        })
        .await
        .unwrap();
        assert!(frames.get(Duration::from_millis(10)).await.is_none());
        assert_eq!(p.renderer.calls, 1);

        // Promotion to CURRENT reuses the warmed bitmap.
        p.handle(RenderRequest {
            role: RenderRole::Current,
            track: track("b"),
            context: context("ctx:1"),
        })
        .await
        .unwrap();
        assert_eq!(p.renderer.calls, 1);
        assert!(frames.get(Duration::from_millis(10)).await.is_some());
    }

    #[tokio::test]
    async fn test_current_pops_cache_entry() {
        let mut p = pipeline();
        p.handle(RenderRequest {
            role: RenderRole::Current,
            track: track("a"),
            context: context("ctx:1"),
        })
        .await
        .unwrap();
        // The same CURRENT again re-renders; the emit removed the entry.
        p.handle(RenderRequest {
            role: RenderRole::Current,
            track: track("a"),
            context: context("ctx:1"),
        })
        .await
        .unwrap();
        assert_eq!(p.renderer.calls, 2);
    }

    #[tokio::test]
    async fn test_cache_holds_two_entries() {
        let mut p = pipeline();
        for id in ["a", "b", "c"] {
            p.handle(RenderRequest {
                role: RenderRole::Upcoming,
                track: track(id),
                context: context("ctx:1"),
            })
            .await
            .unwrap();
        }
        assert_eq!(p.renderer.calls, 3);
        // "a" was evicted, "b" and "c" survive.
        p.handle(RenderRequest {
            role: RenderRole::Upcoming,
            track: track("b"),
            context: context("ctx:1"),
        })
        .await
        .unwrap();
        assert_eq!(p.renderer.calls, 3);
        p.handle(RenderRequest {
            role: RenderRole::Upcoming,
            track: track("a"),
            context: context("ctx:1"),
        })
        .await
        .unwrap();
        assert_eq!(p.renderer.calls, 4);
    }
}
