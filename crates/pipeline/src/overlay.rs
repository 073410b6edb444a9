//! Overlay plans and their rendering onto frames

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing::{info, warn};

/// Text height in pixels for a text scale of 1.0
const TEXT_PX_PER_SCALE: f32 = 30.0;

/// One drawing primitive
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    /// Hollow rectangle between two inclusive corners, stroke centred on the edge
    Rect {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        color: Rgb<u8>,
        thickness: u32,
    },
    /// Text whose baseline starts at `(x, y)`
    Text {
        x: i32,
        y: i32,
        text: String,
        color: Rgb<u8>,
        scale: f32,
    },
}

impl DrawOp {
    /// Text content for text ops
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            DrawOp::Text { text, .. } => Some(text),
            DrawOp::Rect { .. } => None,
        }
    }
}

/// Draws overlay plans with `imageproc`
///
/// The font is loaded on first use. Without a usable font, text ops are
/// skipped and rectangles are still drawn.
pub struct OverlayRenderer {
    font_path: Option<PathBuf>,
    font: OnceCell<Option<FontVec>>,
}

impl OverlayRenderer {
    /// Renderer loading its font from a TTF/OTF file
    #[must_use]
    pub fn new(font_path: impl Into<PathBuf>) -> Self {
        Self {
            font_path: Some(font_path.into()),
            font: OnceCell::new(),
        }
    }

    /// Renderer with an already loaded font
    #[must_use]
    pub fn with_font(font: FontVec) -> Self {
        Self {
            font_path: None,
            font: OnceCell::with_value(Some(font)),
        }
    }

    /// Renderer that only draws shapes
    #[must_use]
    pub fn shapes_only() -> Self {
        Self {
            font_path: None,
            font: OnceCell::with_value(None),
        }
    }

    /// Whether text ops will be drawn
    pub fn has_font(&self) -> bool {
        self.font().is_some()
    }

    fn font(&self) -> Option<&FontVec> {
        self.font
            .get_or_init(|| {
                let path = self.font_path.as_ref()?;
                let loaded = std::fs::read(path)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
                match loaded {
                    Ok(font) => {
                        info!("Loaded overlay font from {}", path.display());
                        Some(font)
                    }
                    Err(e) => {
                        warn!(
                            "Overlay font {} unavailable ({e}), labels will not be drawn",
                            path.display()
                        );
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Apply a plan to a frame in order
    pub fn render(&self, frame: &mut RgbImage, ops: &[DrawOp]) {
        for op in ops {
            match op {
                DrawOp::Rect {
                    x1,
                    y1,
                    x2,
                    y2,
                    color,
                    thickness,
                } => draw_thick_rect(frame, (*x1, *y1), (*x2, *y2), *color, *thickness),
                DrawOp::Text {
                    x,
                    y,
                    text,
                    color,
                    scale,
                } => {
                    if let Some(font) = self.font() {
                        let px = TEXT_PX_PER_SCALE * scale;
                        // imageproc anchors text at its top-left, ops carry the baseline
                        let top = y - (px * 0.75) as i32;
                        draw_text_mut(frame, *color, *x, top, PxScale::from(px), font, text);
                    }
                }
            }
        }
    }
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::shapes_only()
    }
}

/// Concentric one-pixel rectangles centred on the requested edge
fn draw_thick_rect(
    frame: &mut RgbImage,
    (x1, y1): (i32, i32),
    (x2, y2): (i32, i32),
    color: Rgb<u8>,
    thickness: u32,
) {
    let t = thickness.max(1) as i32;
    // Anything past the stroke margin is off-frame; clamping keeps the
    // arithmetic below in range for saturated boxes
    let max_x = i32::try_from(frame.width()).unwrap_or(i32::MAX / 2) + t;
    let max_y = i32::try_from(frame.height()).unwrap_or(i32::MAX / 2) + t;
    let (left, right) = (x1.min(x2).clamp(-t, max_x), x1.max(x2).clamp(-t, max_x));
    let (top, bottom) = (y1.min(y2).clamp(-t, max_y), y1.max(y2).clamp(-t, max_y));

    for grow in -(t / 2)..(t - t / 2) {
        let width = right - left + 1 + 2 * grow;
        let height = bottom - top + 1 + 2 * grow;
        if width <= 0 || height <= 0 {
            continue;
        }
        draw_hollow_rect_mut(
            frame,
            Rect::at(left - grow, top - grow).of_size(width as u32, height as u32),
            color,
        );
    }
}
