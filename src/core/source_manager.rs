// Source manager: owns the active visual input and the render surface sized to it

use crate::core::renderer::RenderSurface;
use crate::models::capture::{Frame, SourceError, SourceInfo, SourceKind, SourceResult};
use crate::platform::camera::{CameraProvider, CameraStream};
use crate::platform::media::{decode_image, VideoClip};
use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ==============================================================================
// Active Source
// ==============================================================================

/// Camera stream that is stopped when dropped
struct LiveCamera {
    stream: Box<dyn CameraStream>,
}

impl LiveCamera {
    fn new(stream: Box<dyn CameraStream>) -> Self {
        Self { stream }
    }
}

impl Drop for LiveCamera {
    fn drop(&mut self) {
        self.stream.stop();
    }
}

struct Playback {
    clip: VideoClip,
    started: Instant,
}

impl Playback {
    fn position(&self, looping: bool) -> Duration {
        let elapsed = self.started.elapsed();
        let total = self.clip.duration().as_nanos();
        if looping && total > 0 {
            Duration::from_nanos((elapsed.as_nanos() % total) as u64)
        } else {
            elapsed
        }
    }
}

enum ActiveSource {
    Webcam(LiveCamera),
    StaticImage(Arc<RgbaImage>),
    VideoFile(Playback),
}

impl ActiveSource {
    fn kind(&self) -> SourceKind {
        match self {
            ActiveSource::Webcam(_) => SourceKind::Webcam,
            ActiveSource::StaticImage(_) => SourceKind::StaticImage,
            ActiveSource::VideoFile(_) => SourceKind::VideoFile,
        }
    }
}

// ==============================================================================
// Source Manager
// ==============================================================================

/// Owns at most one source. Acquiring a new source always releases the old one first.
pub struct SourceManager {
    camera: Arc<dyn CameraProvider>,
    first_frame_timeout: Duration,
    loop_video: bool,
    active: Option<ActiveSource>,
    surface: RenderSurface,
}

impl SourceManager {
    pub fn new(camera: Arc<dyn CameraProvider>, first_frame_timeout: Duration, loop_video: bool) -> Self {
        Self {
            camera,
            first_frame_timeout,
            loop_video,
            active: None,
            surface: RenderSurface::default(),
        }
    }

    /// Request camera access and bind the stream once its first frame is known.
    ///
    /// Any prior source is torn down whether or not access is granted.
    pub async fn acquire_webcam(&mut self) -> SourceResult<SourceInfo> {
        let requested = self.camera.request_access().await;
        self.release();

        let mut live = LiveCamera::new(requested?);
        let (width, height) = match tokio::time::timeout(
            self.first_frame_timeout,
            live.stream.first_frame(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(SourceError::NotReady(format!(
                    "no frame within {} ms",
                    self.first_frame_timeout.as_millis()
                )))
            }
        };
        if width == 0 || height == 0 {
            return Err(SourceError::DeviceFailed(
                "camera reported an empty frame".to_string(),
            ));
        }

        self.surface.resize(width, height);
        self.active = Some(ActiveSource::Webcam(live));
        info!(camera = self.camera.name(), width, height, "Webcam acquired");
        Ok(SourceInfo {
            kind: SourceKind::Webcam,
            width,
            height,
        })
    }

    /// Decode a still image for a single detection pass
    pub fn acquire_image(&mut self, bytes: &[u8]) -> SourceResult<SourceInfo> {
        self.release();

        let image = decode_image(bytes)?;
        let (width, height) = image.dimensions();
        self.surface.resize(width, height);
        self.active = Some(ActiveSource::StaticImage(Arc::new(image)));
        info!(width, height, "Static image acquired");
        Ok(SourceInfo {
            kind: SourceKind::StaticImage,
            width,
            height,
        })
    }

    /// Load a clip and start its playback clock
    pub fn acquire_video_file(&mut self, bytes: &[u8]) -> SourceResult<SourceInfo> {
        self.release();

        let clip = VideoClip::decode(bytes)?;
        let (width, height) = (clip.width(), clip.height());
        info!(
            width,
            height,
            frames = clip.frame_count(),
            duration_ms = clip.duration().as_millis() as u64,
            "Video clip acquired"
        );
        self.surface.resize(width, height);
        self.active = Some(ActiveSource::VideoFile(Playback {
            clip,
            started: Instant::now(),
        }));
        Ok(SourceInfo {
            kind: SourceKind::VideoFile,
            width,
            height,
        })
    }

    /// Stop and drop the active source and clear the surface. Safe to call repeatedly.
    pub fn release(&mut self) -> bool {
        let released = match self.active.take() {
            Some(source) => {
                let kind = source.kind();
                drop(source);
                info!(kind = kind.to_string(), "Source released");
                true
            }
            None => false,
        };
        self.surface.clear();
        released
    }

    /// Whether the source can still supply frames
    pub fn is_valid(&self) -> bool {
        match &self.active {
            None => false,
            Some(ActiveSource::Webcam(live)) => live.stream.is_live(),
            Some(ActiveSource::StaticImage(_)) => true,
            Some(ActiveSource::VideoFile(playback)) => {
                self.loop_video || playback.started.elapsed() < playback.clip.duration()
            }
        }
    }

    pub fn kind(&self) -> Option<SourceKind> {
        self.active.as_ref().map(ActiveSource::kind)
    }

    pub fn info(&self) -> Option<SourceInfo> {
        self.kind().map(|kind| SourceInfo {
            kind,
            width: self.surface.width(),
            height: self.surface.height(),
        })
    }

    /// Sample the current frame of the active source
    pub fn capture(&mut self) -> SourceResult<Frame> {
        let looping = self.loop_video;
        let image = match self.active.as_mut() {
            None => return Err(SourceError::NotReady("no active source".to_string())),
            Some(ActiveSource::Webcam(live)) => live
                .stream
                .grab()
                .ok_or_else(|| SourceError::DeviceFailed("camera stream stopped".to_string()))?,
            Some(ActiveSource::StaticImage(image)) => image.clone(),
            Some(ActiveSource::VideoFile(playback)) => {
                let position = playback.position(looping);
                match playback.clip.frame_at(position) {
                    Some(frame) => frame,
                    None => {
                        debug!(position_ms = position.as_millis() as u64, "Video playback ended");
                        return Err(SourceError::Ended);
                    }
                }
            }
        };
        Ok(Frame::new(image))
    }

    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut RenderSurface {
        &mut self.surface
    }
}

impl Drop for SourceManager {
    fn drop(&mut self) {
        if self.active.is_some() {
            warn!("Source manager dropped with an active source; releasing");
            self.release();
        }
    }
}
