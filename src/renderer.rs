/*
 *  renderer.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Display worker and the panel abstraction it drives. E-paper
 *  refreshes are slow (sub-hertz), so frames carrying a track id we
 *  already forwarded are dropped before they touch the hardware.
 */

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use log::{debug, error, info};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::evicting::EvictingQueue;
use crate::models::Frame;

const RECV_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("display driver: {0}")]
    Driver(String),
}

/// Panel abstraction. Loading the bitmap and refreshing the panel are
/// separate steps on real hardware.
#[async_trait]
pub trait EpaperDisplay: Send {
    async fn set_image(&mut self, image: &RgbImage, saturation: f32) -> Result<(), DisplayError>;
    async fn show(&mut self) -> Result<(), DisplayError>;
}

pub struct DisplayWorker<D: EpaperDisplay> {
    display: D,
    frames: Arc<EvictingQueue<Frame>>,
    saturation: f32,
    last_track_id: Option<String>,
}

impl<D: EpaperDisplay> DisplayWorker<D> {
    pub fn new(display: D, frames: Arc<EvictingQueue<Frame>>, saturation: f32) -> Self {
        DisplayWorker {
            display,
            frames,
            saturation,
            last_track_id: None,
        }
    }

    /// Forwards one frame unless its track id matches the last one we
    /// pushed to the panel. The remembered id only advances after a
    /// successful refresh, so a failed push gets retried by the next
    /// frame.
    async fn handle(&mut self, frame: Frame) -> Result<(), DisplayError> {
        if self.last_track_id.as_deref() == Some(frame.track_id.as_str()) {
            debug!("frame for {} already on panel, dropped", frame.track_id);
            return Ok(());
        }
        info!("refreshing panel with track {}", frame.track_id);
        self.display.set_image(&frame.image, self.saturation).await?;
        self.display.show().await?;
        self.last_track_id = Some(frame.track_id);
        Ok(())
    }

    pub async fn run(mut self, token: CancellationToken) {
        info!("display worker started");
        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => break,
                frame = self.frames.get(RECV_TIMEOUT) => frame,
            };
            let Some(frame) = frame else { continue };
            if let Err(e) = self.handle(frame).await {
                error!("panel refresh failed: {e}");
            }
        }
        info!("display worker stopped");
    }
}

/// Stand-in panel for running without hardware attached. Logs what a
/// real panel would have done.
pub struct LoggingDisplay;

#[async_trait]
impl EpaperDisplay for LoggingDisplay {
    async fn set_image(&mut self, image: &RgbImage, saturation: f32) -> Result<(), DisplayError> {
        debug!(
            "logging display: buffered {}x{} image at saturation {saturation}",
            image.width(),
            image.height()
        );
        Ok(())
    }

    async fn show(&mut self) -> Result<(), DisplayError> {
        info!("logging display: refresh");
        Ok(())
    }
}

/// Counters-only panel used by tests.
#[derive(Default)]
pub struct MockDisplayState {
    pub set_image_calls: usize,
    pub show_calls: usize,
    pub last_size: Option<(u32, u32)>,
    pub last_saturation: Option<f32>,
}

#[derive(Clone, Default)]
pub struct MockEpaper {
    state: Arc<Mutex<MockDisplayState>>,
}

impl MockEpaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show_calls(&self) -> usize {
        self.state.lock().unwrap().show_calls
    }

    pub fn set_image_calls(&self) -> usize {
        self.state.lock().unwrap().set_image_calls
    }

    pub fn last_size(&self) -> Option<(u32, u32)> {
        self.state.lock().unwrap().last_size
    }
}

#[async_trait]
impl EpaperDisplay for MockEpaper {
    async fn set_image(&mut self, image: &RgbImage, saturation: f32) -> Result<(), DisplayError> {
        let mut state = self.state.lock().unwrap();
        state.set_image_calls += 1;
        state.last_size = Some((image.width(), image.height()));
        state.last_saturation = Some(saturation);
        Ok(())
    }

    async fn show(&mut self) -> Result<(), DisplayError> {
        self.state.lock().unwrap().show_calls += 1;
        Ok(())
    }
}
