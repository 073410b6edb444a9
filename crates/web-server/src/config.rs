//! Server configuration from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

use fire_watch_common::Thresholds;
use fire_watch_pipeline::{StreamSettings, WriterSettings};
use fire_watch_video::SourceId;

/// Application configuration, read once at start-up
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Verbose default logging
    pub debug: bool,
    /// ONNX detector model
    pub model_path: PathBuf,
    /// Optional YAML with a `names:` list
    pub class_names_path: Option<PathBuf>,
    /// Source for `/live_feed`
    pub live_source: SourceId,
    pub thresholds: Thresholds,
    pub detector_input_size: u32,
    pub detector_iou_threshold: f32,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    /// TTF used for overlay labels
    pub font_path: PathBuf,
    pub jpeg_quality: u8,
    pub preview_frame_stride: u32,
    pub writer_frame_stride: u32,
    /// Preview resize, only when both dimensions are set
    pub preview_size: Option<(u32, u32)>,
    pub max_upload_mb: usize,
    /// Encoder passed to the `ffmpeg` sink
    pub output_codec: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            debug: false,
            model_path: PathBuf::from("./model/fire.onnx"),
            class_names_path: None,
            live_source: SourceId::Device(0),
            thresholds: Thresholds::default(),
            detector_input_size: 640,
            detector_iou_threshold: 0.45,
            upload_dir: PathBuf::from("./uploads"),
            output_dir: PathBuf::from("./static/outputs"),
            font_path: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
            jpeg_quality: 95,
            preview_frame_stride: 1,
            writer_frame_stride: 1,
            preview_size: None,
            max_upload_mb: 512,
            output_codec: "libx264".to_string(),
        }
    }
}

impl AppConfig {
    /// Read the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// `DEBUG` alone, for choosing the log filter before logging starts
    #[must_use]
    pub fn debug_from_env() -> bool {
        std::env::var("DEBUG").is_ok_and(|v| is_truthy(&v))
    }

    /// Build from any variable lookup; malformed values keep their default
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let draw = threshold(&var, "CONF_THRESHOLD", defaults.thresholds.draw);
        let alert = threshold(&var, "ALERT_THRESHOLD", defaults.thresholds.alert);
        let thresholds = Thresholds::new(draw, alert);
        if !thresholds.is_ordered() {
            warn!(
                "ALERT_THRESHOLD ({alert}) is below CONF_THRESHOLD ({draw}); every drawn detection will alert"
            );
        }

        let preview_size = match (
            parsed::<u32, _>(&var, "PREVIEW_WIDTH", 0),
            parsed::<u32, _>(&var, "PREVIEW_HEIGHT", 0),
        ) {
            (0, _) | (_, 0) => None,
            (width, height) => Some((width, height)),
        };

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parsed(&var, "PORT", defaults.port),
            debug: var("DEBUG").is_some_and(|v| is_truthy(&v)),
            model_path: var("MODEL_PATH").map_or(defaults.model_path, PathBuf::from),
            class_names_path: var("CLASS_NAMES_PATH").map(PathBuf::from),
            live_source: var("LIVE_SOURCE").map_or(defaults.live_source, |v| SourceId::parse(&v)),
            thresholds,
            detector_input_size: parsed(&var, "DETECTOR_INPUT_SIZE", defaults.detector_input_size)
                .max(32),
            detector_iou_threshold: threshold(
                &var,
                "DETECTOR_IOU_THRESHOLD",
                defaults.detector_iou_threshold,
            ),
            upload_dir: var("UPLOAD_DIR").map_or(defaults.upload_dir, PathBuf::from),
            output_dir: var("OUTPUT_DIR").map_or(defaults.output_dir, PathBuf::from),
            font_path: var("FONT_PATH").map_or(defaults.font_path, PathBuf::from),
            jpeg_quality: parsed::<u8, _>(&var, "JPEG_QUALITY", defaults.jpeg_quality).clamp(1, 100),
            preview_frame_stride: parsed(&var, "PREVIEW_FRAME_STRIDE", 1u32).max(1),
            writer_frame_stride: parsed(&var, "WRITER_FRAME_STRIDE", 1u32).max(1),
            preview_size,
            max_upload_mb: parsed(&var, "MAX_UPLOAD_MB", defaults.max_upload_mb),
            output_codec: var("OUTPUT_CODEC").unwrap_or(defaults.output_codec),
        }
    }

    /// `host:port` to bind
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Request body limit for uploads
    #[must_use]
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    #[must_use]
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            frame_stride: self.preview_frame_stride,
            resize: self.preview_size,
            jpeg_quality: self.jpeg_quality,
            alert_banner: true,
        }
    }

    #[must_use]
    pub fn writer_settings(&self) -> WriterSettings {
        WriterSettings {
            frame_stride: self.writer_frame_stride,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parsed<T, F>(var: &F, name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {name}={raw:?}, using default {default}");
            default
        }),
    }
}

/// A probability in `[0, 1]`
fn threshold<F>(var: &F, name: &str, default: f32) -> f32
where
    F: Fn(&str) -> Option<String>,
{
    let value = parsed(var, name, default);
    if (0.0..=1.0).contains(&value) {
        value
    } else {
        warn!("{name}={value} is outside [0, 1], using default {default}");
        default
    }
}
