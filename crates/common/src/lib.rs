/// Common types and utilities for the fire detection pipeline
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Processing errors
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("No video stream found")]
    NoVideoStream,

    #[error("FFmpeg error: {0}")]
    FFmpegError(String),

    #[error("Frame encode failed: {0}")]
    Encode(String),

    #[error("Video sink error: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<image::ImageError> for ProcessingError {
    fn from(err: image::ImageError) -> Self {
        ProcessingError::ImageError(err.to_string())
    }
}

/// Result type for processing operations
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Confidence thresholds applied to every detection
///
/// `draw` gates whether a detection is marked at all, `alert` whether it
/// counts as a high-confidence event. Both are fixed after start-up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub draw: f32,
    pub alert: f32,
}

impl Thresholds {
    #[must_use]
    pub fn new(draw: f32, alert: f32) -> Self {
        Self { draw, alert }
    }

    /// Whether the alert threshold sits at or above the draw threshold
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.alert >= self.draw
    }

    /// Alert threshold as a whole percentage (truncated)
    #[must_use]
    pub fn alert_percent(&self) -> u32 {
        (self.alert * 100.0) as u32
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            draw: 0.5,
            alert: 0.7,
        }
    }
}

/// Basic properties of a video source or file
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
    pub frame_count: Option<u64>,
}

impl VideoInfo {
    /// Duration in seconds derived from frame count and frame rate (0 when unknown)
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        match (self.frame_count, self.fps) {
            (Some(frames), Some(fps)) if fps > 0.0 => frames as f64 / fps,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_default_ordered() {
        let thresholds = Thresholds::default();
        assert!(thresholds.is_ordered());
        assert_eq!(thresholds.alert_percent(), 70);
    }

    #[test]
    fn test_thresholds_inverted() {
        let thresholds = Thresholds::new(0.8, 0.6);
        assert!(!thresholds.is_ordered());
    }

    #[test]
    fn test_video_info_duration() {
        let info = VideoInfo {
            width: 640,
            height: 480,
            fps: Some(25.0),
            frame_count: Some(10),
        };
        assert!((info.duration_secs() - 0.4).abs() < 1e-9);

        let unknown = VideoInfo {
            fps: Some(0.0),
            ..info
        };
        assert_eq!(unknown.duration_secs(), 0.0);
    }

    #[test]
    fn test_error_display() {
        let err = ProcessingError::SourceUnavailable("rtsp://cam".to_string());
        assert_eq!(err.to_string(), "Source unavailable: rtsp://cam");
    }
}
