// In-process media decoding for uploaded images and video clips

use crate::models::capture::{SourceError, SourceResult};
use image::codecs::gif::GifDecoder;
use image::codecs::jpeg::JpegEncoder;
use image::{AnimationDecoder, DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// Presentation time used when a clip frame declares no delay
const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

/// Decode a still image into RGBA pixels
pub fn decode_image(bytes: &[u8]) -> SourceResult<RgbaImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| SourceError::DecodeFailed(format!("Failed to decode image: {}", e)))?;
    let image = image.to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(SourceError::DecodeFailed("Image has no pixels".to_string()));
    }
    Ok(image)
}

/// Encode RGBA pixels as a JPEG, dropping the alpha channel
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> image::ImageResult<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(&rgb)?;
    Ok(bytes)
}

/// A fully decoded video clip with per-frame presentation delays
#[derive(Debug, Clone)]
pub struct VideoClip {
    frames: Vec<Arc<RgbaImage>>,
    delays: Vec<Duration>,
    duration: Duration,
}

impl VideoClip {
    /// Decode an animated clip. Only GIF containers are understood.
    pub fn decode(bytes: &[u8]) -> SourceResult<Self> {
        let format = image::guess_format(bytes)
            .map_err(|e| SourceError::DecodeFailed(format!("Unrecognized media: {}", e)))?;
        if format != ImageFormat::Gif {
            return Err(SourceError::Unsupported(format!(
                "Video container {:?} is not supported (expected GIF)",
                format
            )));
        }

        let decoder = GifDecoder::new(Cursor::new(bytes))
            .map_err(|e| SourceError::DecodeFailed(format!("Failed to read clip metadata: {}", e)))?;
        let decoded = decoder
            .into_frames()
            .collect_frames()
            .map_err(|e| SourceError::DecodeFailed(format!("Failed to decode clip: {}", e)))?;

        let mut frames = Vec::with_capacity(decoded.len());
        let mut delays = Vec::with_capacity(decoded.len());
        for frame in decoded {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let millis = if denom == 0 { 0 } else { numer / denom };
            delays.push(if millis == 0 {
                DEFAULT_FRAME_DELAY
            } else {
                Duration::from_millis(u64::from(millis))
            });
            frames.push(Arc::new(frame.into_buffer()));
        }

        Self::from_frames(frames, delays)
    }

    pub fn from_frames(frames: Vec<Arc<RgbaImage>>, delays: Vec<Duration>) -> SourceResult<Self> {
        if frames.is_empty() || frames.len() != delays.len() {
            return Err(SourceError::DecodeFailed("Clip contains no frames".to_string()));
        }
        if frames[0].width() == 0 || frames[0].height() == 0 {
            return Err(SourceError::DecodeFailed("Clip has no pixels".to_string()));
        }
        let duration = delays.iter().sum();
        Ok(Self {
            frames,
            delays,
            duration,
        })
    }

    pub fn width(&self) -> u32 {
        self.frames[0].width()
    }

    pub fn height(&self) -> u32 {
        self.frames[0].height()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Frame presented at `position`, or None once playback has passed the end
    pub fn frame_at(&self, position: Duration) -> Option<Arc<RgbaImage>> {
        let mut end = Duration::ZERO;
        for (frame, delay) in self.frames.iter().zip(&self.delays) {
            end += *delay;
            if position < end {
                return Some(frame.clone());
            }
        }
        None
    }
}

#[cfg(test)]
pub(crate) fn encode_test_gif(colors: &[[u8; 4]], width: u32, height: u32, delay_ms: u32) -> Vec<u8> {
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba};

    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        for color in colors {
            let buffer = RgbaImage::from_pixel(width, height, Rgba(*color));
            let frame = Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1));
            encoder.encode_frame(frame).unwrap();
        }
    }
    bytes
}

#[cfg(test)]
pub(crate) fn encode_test_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_png() {
        let bytes = encode_test_png(32, 24);
        let image = decode_image(&bytes).unwrap();
        assert_eq!(image.dimensions(), (32, 24));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_image(b"definitely not an image");
        assert!(matches!(result, Err(SourceError::DecodeFailed(_))));
    }

    #[test]
    fn test_encode_jpeg_roundtrips_dimensions() {
        let image = RgbaImage::from_pixel(20, 10, image::Rgba([10, 200, 30, 128]));
        let bytes = encode_jpeg(&image, 90).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        assert_eq!(decode_image(&bytes).unwrap().dimensions(), (20, 10));
    }

    #[test]
    fn test_decode_gif_clip() {
        let bytes = encode_test_gif(&[[255, 0, 0, 255], [0, 0, 255, 255]], 16, 8, 100);
        let clip = VideoClip::decode(&bytes).unwrap();

        assert_eq!(clip.frame_count(), 2);
        assert_eq!((clip.width(), clip.height()), (16, 8));
        assert_eq!(clip.duration(), Duration::from_millis(200));
    }

    #[test]
    fn test_png_is_not_a_clip() {
        let bytes = encode_test_png(8, 8);
        assert!(matches!(
            VideoClip::decode(&bytes),
            Err(SourceError::Unsupported(_))
        ));
    }

    #[test]
    fn test_frame_at_follows_presentation_time() {
        let first = Arc::new(RgbaImage::from_pixel(4, 4, image::Rgba([1, 0, 0, 255])));
        let second = Arc::new(RgbaImage::from_pixel(4, 4, image::Rgba([2, 0, 0, 255])));
        let clip = VideoClip::from_frames(
            vec![first.clone(), second.clone()],
            vec![Duration::from_millis(50), Duration::from_millis(70)],
        )
        .unwrap();

        assert!(Arc::ptr_eq(&clip.frame_at(Duration::ZERO).unwrap(), &first));
        assert!(Arc::ptr_eq(&clip.frame_at(Duration::from_millis(49)).unwrap(), &first));
        assert!(Arc::ptr_eq(&clip.frame_at(Duration::from_millis(50)).unwrap(), &second));
        assert!(clip.frame_at(Duration::from_millis(120)).is_none());
    }
}
