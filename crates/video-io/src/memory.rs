//! In-memory video backend
//!
//! Serves pre-built frame sequences and records whatever is written to its
//! sinks. Used where real decoding is not wanted, such as tests and demos
//! on machines without FFmpeg.

use image::RgbImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

use fire_watch_common::{ProcessingError, Result, VideoInfo};

use crate::{SinkSpec, SourceId, VideoBackend, VideoSink, VideoSource};

/// A fixed sequence of frames with its reported properties
#[derive(Debug, Clone)]
pub struct MemoryClip {
    pub info: VideoInfo,
    pub frames: Arc<Vec<RgbImage>>,
}

impl MemoryClip {
    /// Clip whose info is derived from the frames
    #[must_use]
    pub fn new(frames: Vec<RgbImage>, fps: f64) -> Self {
        let (width, height) = frames.first().map_or((0, 0), RgbImage::dimensions);
        Self {
            info: VideoInfo {
                width,
                height,
                fps: Some(fps),
                frame_count: Some(frames.len() as u64),
            },
            frames: Arc::new(frames),
        }
    }
}

/// Frames written to one sink
#[derive(Debug, Clone, Default)]
pub struct RecordedOutput {
    pub spec: Option<SinkSpec>,
    pub frames: Vec<RgbImage>,
    pub finished: bool,
}

type Recording = Arc<Mutex<RecordedOutput>>;

/// Backend over in-memory clips
#[derive(Debug, Default)]
pub struct MemoryBackend {
    clips: RwLock<HashMap<SourceId, MemoryClip>>,
    /// Served for any existing file without its own clip
    file_clip: Option<MemoryClip>,
    frame_delay: Option<Duration>,
    outputs: RwLock<HashMap<PathBuf, Recording>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `clip` for every path that exists on disk
    #[must_use]
    pub fn with_file_clip(mut self, clip: MemoryClip) -> Self {
        self.file_clip = Some(clip);
        self
    }

    /// Sleep before returning each frame
    #[must_use]
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = Some(delay);
        self
    }

    pub fn insert(&self, source: SourceId, clip: MemoryClip) {
        self.clips
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source, clip);
    }

    /// What has been written to `path` so far
    pub fn output(&self, path: &Path) -> Option<RecordedOutput> {
        let outputs = self.outputs.read().unwrap_or_else(PoisonError::into_inner);
        let recording = outputs.get(path)?;
        let output = recording.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Some(output)
    }

    fn clip(&self, source: &SourceId) -> Option<MemoryClip> {
        let clips = self.clips.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(clip) = clips.get(source) {
            return Some(clip.clone());
        }
        match source {
            SourceId::Path(path) if path.is_file() => self.file_clip.clone(),
            _ => None,
        }
    }
}

impl VideoBackend for MemoryBackend {
    fn open(&self, source: &SourceId) -> Result<Box<dyn VideoSource>> {
        let clip = self
            .clip(source)
            .ok_or_else(|| ProcessingError::SourceUnavailable(source.to_string()))?;
        debug!("Opened in-memory clip {source} ({} frames)", clip.frames.len());
        Ok(Box::new(MemorySource {
            clip,
            position: 0,
            frame_delay: self.frame_delay,
        }))
    }

    fn create_sink(&self, path: &Path, spec: &SinkSpec) -> Result<Box<dyn VideoSink>> {
        let recording = Arc::new(Mutex::new(RecordedOutput {
            spec: Some(spec.clone()),
            ..RecordedOutput::default()
        }));
        self.outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), recording.clone());
        Ok(Box::new(MemorySink {
            recording,
            size: (spec.width, spec.height),
        }))
    }

    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        self.clip(&SourceId::from(path))
            .map(|clip| clip.info)
            .ok_or_else(|| ProcessingError::SourceUnavailable(path.display().to_string()))
    }
}

struct MemorySource {
    clip: MemoryClip,
    position: usize,
    frame_delay: Option<Duration>,
}

impl VideoSource for MemorySource {
    fn info(&self) -> VideoInfo {
        self.clip.info
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(frame) = self.clip.frames.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        if let Some(delay) = self.frame_delay {
            std::thread::sleep(delay);
        }
        Ok(Some(frame.clone()))
    }
}

struct MemorySink {
    recording: Recording,
    size: (u32, u32),
}

impl VideoSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != self.size {
            return Err(ProcessingError::Sink(format!(
                "frame is {}x{}, sink expects {}x{}",
                frame.width(),
                frame.height(),
                self.size.0,
                self.size.1
            )));
        }
        self.recording
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frames
            .push(frame.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.recording
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finished = true;
        Ok(())
    }
}
