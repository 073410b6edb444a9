//! Video source and sink adapters
//!
//! Producers in the pipeline only talk to the traits defined here:
//! - [`VideoSource`]: sequential RGB frame reads from a file, device or stream
//! - [`VideoSink`]: sequential RGB frame writes into an output container
//! - [`VideoBackend`]: opens sources and sinks and probes files
//!
//! The `ffmpeg` feature (default) provides [`FfmpegBackend`], decoding with
//! libav* through `ffmpeg-next` and encoding through an `ffmpeg` child process.
//! [`MemoryBackend`] serves in-memory clips and is always available.

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod memory;

use image::RgbImage;
use std::fmt;
use std::path::{Path, PathBuf};

use fire_watch_common::{Result, VideoInfo};

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegBackend;
pub use memory::{MemoryBackend, MemoryClip, RecordedOutput};

/// Frame rate used when a source does not report one
pub const DEFAULT_FPS: f64 = 25.0;
/// Resolution used when a source does not report one
pub const DEFAULT_SIZE: (u32, u32) = (640, 480);

/// Identifier of a video source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// Capture device index (e.g. `0` for the first webcam)
    Device(u32),
    /// Local file
    Path(PathBuf),
    /// Network stream (`rtsp://`, `http://`, ...)
    Uri(String),
}

impl SourceId {
    /// Parse a configured source string
    ///
    /// All digits is a device index, anything with a scheme is a URI,
    /// everything else is a path.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = value.parse() {
                return SourceId::Device(index);
            }
        }
        if value.contains("://") {
            SourceId::Uri(value.to_string())
        } else {
            SourceId::Path(PathBuf::from(value))
        }
    }
}

impl From<&Path> for SourceId {
    fn from(path: &Path) -> Self {
        SourceId::Path(path.to_path_buf())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Device(index) => write!(f, "device {index}"),
            SourceId::Path(path) => write!(f, "{}", path.display()),
            SourceId::Uri(uri) => f.write_str(uri),
        }
    }
}

/// Output container parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSpec {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl SinkSpec {
    /// Sink matching a source, falling back to 25 fps and 640x480
    #[must_use]
    pub fn for_source(info: &VideoInfo) -> Self {
        let (width, height) = if info.width > 0 && info.height > 0 {
            (info.width, info.height)
        } else {
            DEFAULT_SIZE
        };
        let fps = info.fps.filter(|fps| *fps > 0.0).unwrap_or(DEFAULT_FPS);
        Self { width, height, fps }
    }
}

/// Sequential frame reader
///
/// The underlying handle is released when the source is dropped.
pub trait VideoSource: Send {
    /// Properties known at open time
    fn info(&self) -> VideoInfo;

    /// Next frame, `Ok(None)` at end of stream
    fn read_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Sequential frame writer
pub trait VideoSink: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close the container
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens sources and sinks
pub trait VideoBackend: Send + Sync {
    fn open(&self, source: &SourceId) -> Result<Box<dyn VideoSource>>;

    fn create_sink(&self, path: &Path, spec: &SinkSpec) -> Result<Box<dyn VideoSink>>;

    /// Frame count and frame rate of a file
    fn probe(&self, path: &Path) -> Result<VideoInfo>;
}
