// Synthetic camera producing a moving test pattern

use super::{CameraProvider, CameraStream};
use crate::models::capture::{SourceError, SourceResult};
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Camera stand-in that generates frames in memory.
///
/// Tracks how many of its streams are still open so callers can verify that
/// camera access never outlives its owner.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    deny_access: bool,
    warmup: Duration,
    open_streams: Arc<AtomicUsize>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            deny_access: false,
            warmup: Duration::ZERO,
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Simulate the user refusing camera permission
    pub fn denying(mut self) -> Self {
        self.deny_access = true;
        self
    }

    /// Delay before the first frame reports its dimensions
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Number of streams handed out and not yet stopped
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraProvider for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn request_access(&self) -> SourceResult<Box<dyn CameraStream>> {
        if self.deny_access {
            return Err(SourceError::PermissionDenied(
                "camera access was not granted".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(SourceError::DeviceFailed(format!(
                "invalid capture size {}x{}",
                self.width, self.height
            )));
        }

        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticStream {
            width: self.width,
            height: self.height,
            warmup: self.warmup,
            frame_count: 0,
            live: true,
            open_streams: self.open_streams.clone(),
        }))
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    warmup: Duration,
    frame_count: u64,
    live: bool,
    open_streams: Arc<AtomicUsize>,
}

impl SyntheticStream {
    fn render(&self) -> RgbaImage {
        // Diagonal gradient that scrolls one pixel per frame
        let shift = self.frame_count as u32;
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let v = ((x + y + shift) % 256) as u8;
            Rgba([v, v.wrapping_mul(3), 255 - v, 255])
        })
    }
}

#[async_trait]
impl CameraStream for SyntheticStream {
    async fn first_frame(&mut self) -> SourceResult<(u32, u32)> {
        if !self.live {
            return Err(SourceError::NotReady("stream already stopped".to_string()));
        }
        if !self.warmup.is_zero() {
            tokio::time::sleep(self.warmup).await;
        }
        Ok((self.width, self.height))
    }

    fn grab(&mut self) -> Option<Arc<RgbaImage>> {
        if !self.live {
            return None;
        }
        self.frame_count += 1;
        Some(Arc::new(self.render()))
    }

    fn stop(&mut self) {
        if self.live {
            self.live = false;
            self.open_streams.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop();
    }
}
