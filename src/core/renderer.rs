// Render surface: the current source frame with pose overlays drawn on top

use crate::models::pose::Pose;
use crate::platform::media::encode_jpeg;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, Blend};
use imageproc::rect::Rect;

pub const KEYPOINT_RADIUS: i32 = 6;
pub const JPEG_QUALITY: u8 = 90;

const KEYPOINT_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);

// Label box in the top-left corner, black at 55% opacity
const LABEL_ORIGIN: i32 = 8;
const LABEL_HEIGHT: u32 = 22;
const LABEL_PADDING: u32 = 6;
const LABEL_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 140]);
const LABEL_TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);

// 5x7 glyphs drawn at 2x, one blank column between characters
const GLYPH_SCALE: u32 = 2;
const GLYPH_ADVANCE: u32 = 6 * GLYPH_SCALE;
const GLYPH_TOP: i32 = LABEL_ORIGIN + 4;

/// Rows of a 5x7 glyph, bit 4 is the leftmost column. Unknown characters render blank.
fn glyph(c: char) -> [u8; 7] {
    match c {
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1f],
        'M' => [0x11, 0x1b, 0x15, 0x15, 0x11, 0x11, 0x11],
        'P' => [0x1e, 0x11, 0x11, 0x1e, 0x10, 0x10, 0x10],
        'S' => [0x0f, 0x10, 0x10, 0x0e, 0x01, 0x01, 0x1e],
        'T' => [0x1f, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0a, 0x04],
        'a' => [0x00, 0x00, 0x0e, 0x01, 0x0f, 0x11, 0x0f],
        'd' => [0x01, 0x01, 0x0d, 0x13, 0x11, 0x11, 0x0f],
        'e' => [0x00, 0x00, 0x0e, 0x11, 0x1f, 0x10, 0x0e],
        'g' => [0x00, 0x0f, 0x11, 0x11, 0x0f, 0x01, 0x0e],
        'h' => [0x10, 0x10, 0x16, 0x19, 0x11, 0x11, 0x11],
        'i' => [0x04, 0x00, 0x0c, 0x04, 0x04, 0x04, 0x0e],
        'l' => [0x0c, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0e],
        'n' => [0x00, 0x00, 0x16, 0x19, 0x11, 0x11, 0x11],
        'o' => [0x00, 0x00, 0x0e, 0x11, 0x11, 0x11, 0x0e],
        'r' => [0x00, 0x00, 0x16, 0x19, 0x10, 0x10, 0x10],
        's' => [0x00, 0x00, 0x0e, 0x10, 0x0e, 0x01, 0x1e],
        't' => [0x08, 0x08, 0x1c, 0x08, 0x08, 0x09, 0x06],
        'u' => [0x00, 0x00, 0x11, 0x11, 0x11, 0x13, 0x0d],
        ':' => [0x00, 0x04, 0x00, 0x00, 0x00, 0x04, 0x00],
        _ => [0; 7],
    }
}

/// Width of the label box drawn for `text`
pub fn label_width(text: &str) -> u32 {
    text.chars().count() as u32 * GLYPH_ADVANCE + 2 * LABEL_PADDING
}

/// Off-screen canvas sized to the active source's native resolution
#[derive(Debug, Clone)]
pub struct RenderSurface {
    canvas: RgbaImage,
    drawn: bool,
}

impl Default for RenderSurface {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl RenderSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
            drawn: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.canvas.width()
    }

    pub fn height(&self) -> u32 {
        self.canvas.height()
    }

    /// True until a frame has been drawn since the last resize or clear
    pub fn is_blank(&self) -> bool {
        !self.drawn || self.canvas.width() == 0 || self.canvas.height() == 0
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.canvas = RgbaImage::new(width, height);
        self.drawn = false;
    }

    pub fn clear(&mut self) {
        self.resize(0, 0);
    }

    /// Draw a source frame, scaling it to the surface size
    pub fn draw_frame(&mut self, frame: &RgbaImage) {
        if self.canvas.width() == 0 || self.canvas.height() == 0 {
            return;
        }
        if frame.dimensions() == self.canvas.dimensions() {
            self.canvas.copy_from_slice(frame.as_raw());
        } else {
            self.canvas = imageops::resize(
                frame,
                self.canvas.width(),
                self.canvas.height(),
                FilterType::Triangle,
            );
        }
        self.drawn = true;
    }

    /// Draw every keypoint scoring above `threshold` as a filled circle
    pub fn draw_poses(&mut self, poses: &[Pose], threshold: f32) {
        for pose in poses {
            for keypoint in pose.visible_keypoints(threshold) {
                draw_filled_circle_mut(
                    &mut self.canvas,
                    (keypoint.x.round() as i32, keypoint.y.round() as i32),
                    KEYPOINT_RADIUS,
                    KEYPOINT_COLOR,
                );
            }
        }
    }

    /// Draw `text` in a translucent box in the top-left corner
    pub fn draw_label(&mut self, text: &str) {
        if self.canvas.width() == 0 || self.canvas.height() == 0 || text.is_empty() {
            return;
        }

        let mut blended = Blend(std::mem::take(&mut self.canvas));
        draw_filled_rect_mut(
            &mut blended,
            Rect::at(LABEL_ORIGIN, LABEL_ORIGIN).of_size(label_width(text), LABEL_HEIGHT),
            LABEL_BACKGROUND,
        );
        self.canvas = blended.0;

        let mut left = LABEL_ORIGIN + LABEL_PADDING as i32;
        for c in text.chars() {
            for (row, bits) in glyph(c).iter().enumerate() {
                for column in 0..5 {
                    if bits & (0x10 >> column) == 0 {
                        continue;
                    }
                    let x = left + (column * GLYPH_SCALE) as i32;
                    let y = GLYPH_TOP + (row as u32 * GLYPH_SCALE) as i32;
                    draw_filled_rect_mut(
                        &mut self.canvas,
                        Rect::at(x, y).of_size(GLYPH_SCALE, GLYPH_SCALE),
                        LABEL_TEXT,
                    );
                }
            }
            left += GLYPH_ADVANCE as i32;
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Encode the surface as a JPEG; None while nothing has been drawn
    pub fn encode_jpeg(&self) -> Option<image::ImageResult<Vec<u8>>> {
        if self.is_blank() {
            return None;
        }
        Some(encode_jpeg(&self.canvas, JPEG_QUALITY))
    }
}
