//! Frame producers: the multipart JPEG preview and the disk writer

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use fire_watch_common::{ProcessingError, Result};
use fire_watch_video::{SinkSpec, SourceId, VideoBackend, VideoSink, VideoSource};

use crate::annotator::{alert_banner, FrameAnnotator};

/// Multipart boundary token used by every preview stream
pub const MULTIPART_BOUNDARY: &str = "frame";

/// `Content-Type` of a preview response
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Preview stream settings
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Emit every Nth frame (0 behaves as 1)
    pub frame_stride: u32,
    /// Resize to `(width, height)` before annotation
    pub resize: Option<(u32, u32)>,
    pub jpeg_quality: u8,
    /// Draw the full-frame border and caption on high-confidence frames
    pub alert_banner: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            frame_stride: 1,
            resize: None,
            jpeg_quality: 95,
            alert_banner: true,
        }
    }
}

fn on_stride(index: u64, stride: u32) -> bool {
    index % u64::from(stride.max(1)) == 0
}

fn resized(frame: RgbImage, (width, height): (u32, u32)) -> RgbImage {
    if frame.dimensions() == (width, height) || width == 0 || height == 0 {
        frame
    } else {
        imageops::resize(&frame, width, height, FilterType::Triangle)
    }
}

/// Encode a frame as JPEG
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(frame)
        .map_err(|e| ProcessingError::Encode(e.to_string()))?;
    Ok(buffer)
}

/// Wrap one JPEG as a `multipart/x-mixed-replace` part
#[must_use]
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(jpeg.len() + 64);
    chunk.extend_from_slice(b"--");
    chunk.extend_from_slice(MULTIPART_BOUNDARY.as_bytes());
    chunk.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

/// Lazily produced preview of a source, one multipart chunk per item
///
/// Runs synchronously; callers drive it from a blocking thread. Dropping
/// the stream releases the source.
pub struct PreviewStream {
    source: Box<dyn VideoSource>,
    annotator: Arc<FrameAnnotator>,
    settings: StreamSettings,
    next_index: u64,
    emitted: u64,
    done: bool,
}

impl PreviewStream {
    #[must_use]
    pub fn new(
        source: Box<dyn VideoSource>,
        annotator: Arc<FrameAnnotator>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            source,
            annotator,
            settings,
            next_index: 0,
            emitted: 0,
            done: false,
        }
    }

    /// Open `source_id` and wrap it; `None` when the source cannot be opened
    pub fn open(
        backend: &dyn VideoBackend,
        source_id: &SourceId,
        annotator: Arc<FrameAnnotator>,
        settings: StreamSettings,
    ) -> Option<Self> {
        match backend.open(source_id) {
            Ok(source) => {
                info!("Preview opened {source_id}");
                Some(Self::new(source, annotator, settings))
            }
            Err(e) => {
                warn!("Preview source {source_id} unavailable: {e}");
                None
            }
        }
    }

    /// Chunks emitted so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn render(&self, frame: RgbImage) -> Result<Vec<u8>> {
        let frame = match self.settings.resize {
            Some(size) => resized(frame, size),
            None => frame,
        };

        let mut annotation = self.annotator.annotate(frame);
        if annotation.high_confidence && self.settings.alert_banner {
            let (width, height) = annotation.frame.dimensions();
            self.annotator
                .renderer()
                .render(&mut annotation.frame, &alert_banner(width, height));
        }

        let jpeg = encode_jpeg(&annotation.frame, self.settings.jpeg_quality)?;
        Ok(multipart_chunk(&jpeg))
    }
}

impl Iterator for PreviewStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        while !self.done {
            let frame = match self.source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("Preview reached end of stream after {} chunks", self.emitted);
                    self.done = true;
                    break;
                }
                Err(e) => {
                    warn!("Preview read failed, ending stream: {e}");
                    self.done = true;
                    break;
                }
            };

            let index = self.next_index;
            self.next_index += 1;
            if !on_stride(index, self.settings.frame_stride) {
                continue;
            }

            match self.render(frame) {
                Ok(chunk) => {
                    self.emitted += 1;
                    return Some(chunk);
                }
                Err(e) => warn!("Skipping preview frame {index}: {e}"),
            }
        }
        None
    }
}

/// Disk writer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterSettings {
    /// Annotate every Nth frame; the rest are written as decoded
    pub frame_stride: u32,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self { frame_stride: 1 }
    }
}

/// Outcome of a disk write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub frames_written: u64,
    pub frames_annotated: u64,
    pub high_confidence_frames: u64,
    pub cancelled: bool,
}

/// Copy `source` into `sink`, annotating frames on the stride
///
/// `cancel` is checked between frames. The sink is finished on end of
/// stream, on a read error and on cancellation, so partial output is a
/// valid container.
pub fn write_annotated(
    mut source: Box<dyn VideoSource>,
    mut sink: Box<dyn VideoSink>,
    sink_size: (u32, u32),
    annotator: &FrameAnnotator,
    settings: &WriterSettings,
    cancel: &AtomicBool,
) -> Result<WriteSummary> {
    let mut summary = WriteSummary::default();
    let mut index: u64 = 0;

    loop {
        if cancel.load(Ordering::Relaxed) {
            info!("Writer cancelled after {} frames", summary.frames_written);
            summary.cancelled = true;
            break;
        }

        let frame = match source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!("Writer read failed after {} frames: {e}", summary.frames_written);
                break;
            }
        };

        let frame = if on_stride(index, settings.frame_stride) {
            let annotation = annotator.annotate(frame);
            summary.frames_annotated += 1;
            if annotation.high_confidence {
                summary.high_confidence_frames += 1;
            }
            annotation.frame
        } else {
            frame
        };
        index += 1;

        sink.write_frame(&resized(frame, sink_size))?;
        summary.frames_written += 1;
    }

    // Release the decoder before the encoder flushes
    drop(source);
    sink.finish()?;

    info!(
        "Writer finished: {} frames written, {} annotated, {} high-confidence",
        summary.frames_written, summary.frames_annotated, summary.high_confidence_frames
    );
    Ok(summary)
}

/// Open `input`, create a matching sink at `output` and write the annotated copy
pub fn write_video(
    backend: &dyn VideoBackend,
    input: &Path,
    output: &Path,
    annotator: &FrameAnnotator,
    settings: &WriterSettings,
    cancel: &AtomicBool,
) -> Result<WriteSummary> {
    let source = backend.open(&SourceId::from(input))?;
    let spec = SinkSpec::for_source(&source.info());
    info!(
        "Writing {} -> {} ({}x{} @ {} fps)",
        input.display(),
        output.display(),
        spec.width,
        spec.height,
        spec.fps
    );
    let sink = backend.create_sink(output, &spec)?;
    write_annotated(
        source,
        sink,
        (spec.width, spec.height),
        annotator,
        settings,
        cancel,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertState;
    use fire_watch_common::{Thresholds, VideoInfo};
    use fire_watch_detection::{BoundingBox, Detection, DetectionError};
    use image::Rgb;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FrameList {
        frames: VecDeque<Result<RgbImage>>,
    }

    impl FrameList {
        fn new(count: usize, width: u32, height: u32) -> Self {
            Self {
                frames: (0..count)
                    .map(|i| Ok(RgbImage::from_pixel(width, height, Rgb([i as u8, 0, 0]))))
                    .collect(),
            }
        }
    }

    impl VideoSource for FrameList {
        fn info(&self) -> VideoInfo {
            VideoInfo::default()
        }

        fn read_frame(&mut self) -> Result<Option<RgbImage>> {
            self.frames.pop_front().transpose()
        }
    }

    #[derive(Clone, Default)]
    struct Recorded(Arc<Mutex<(Vec<RgbImage>, bool)>>);

    struct RecordingSink(Recorded);

    impl VideoSink for RecordingSink {
        fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
            (self.0).0.lock().unwrap().0.push(frame.clone());
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<()> {
            (self.0).0.lock().unwrap().1 = true;
            Ok(())
        }
    }

    fn alerting_annotator() -> FrameAnnotator {
        let detector = |_: &RgbImage| -> std::result::Result<Vec<Detection>, DetectionError> {
            Ok(vec![Detection::new(
                0.9,
                0,
                BoundingBox::new(2.0, 2.0, 12.0, 12.0),
            )])
        };
        FrameAnnotator::new(
            Some(Arc::new(detector)),
            Thresholds::default(),
            Arc::new(AlertState::new()),
        )
    }

    #[test]
    fn test_multipart_chunk_layout() {
        let chunk = multipart_chunk(b"JPEG");
        assert_eq!(
            chunk,
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n".to_vec()
        );
    }

    #[test]
    fn test_encode_jpeg_magic() {
        let jpeg = encode_jpeg(&RgbImage::new(8, 8), 95).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_preview_stride_drops_frames() {
        let annotator = Arc::new(alerting_annotator());
        let settings = StreamSettings {
            frame_stride: 3,
            ..StreamSettings::default()
        };
        let stream = PreviewStream::new(Box::new(FrameList::new(10, 32, 24)), annotator, settings);

        // Indices 0, 3, 6, 9
        assert_eq!(stream.count(), 4);
    }

    #[test]
    fn test_preview_resize() {
        let annotator = Arc::new(FrameAnnotator::new(
            None,
            Thresholds::default(),
            Arc::new(AlertState::new()),
        ));
        let settings = StreamSettings {
            resize: Some((16, 8)),
            ..StreamSettings::default()
        };
        let mut stream =
            PreviewStream::new(Box::new(FrameList::new(1, 64, 48)), annotator, settings);

        let chunk = stream.next().unwrap();
        let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".len();
        let jpeg = &chunk[header..chunk.len() - 2];
        let decoded = image::load_from_memory(jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_preview_read_error_ends_stream() {
        let mut source = FrameList::new(2, 8, 8);
        source
            .frames
            .insert(1, Err(ProcessingError::FFmpegError("corrupt packet".into())));
        let annotator = Arc::new(FrameAnnotator::new(
            None,
            Thresholds::default(),
            Arc::new(AlertState::new()),
        ));
        let stream = PreviewStream::new(Box::new(source), annotator, StreamSettings::default());
        assert_eq!(stream.count(), 1);
    }

    #[test]
    fn test_writer_stride_preserves_frame_count() {
        let recorded = Recorded::default();
        let summary = write_annotated(
            Box::new(FrameList::new(7, 32, 24)),
            Box::new(RecordingSink(recorded.clone())),
            (32, 24),
            &alerting_annotator(),
            &WriterSettings { frame_stride: 2 },
            &AtomicBool::new(false),
        )
        .unwrap();

        assert_eq!(
            summary,
            WriteSummary {
                frames_written: 7,
                frames_annotated: 4,
                high_confidence_frames: 4,
                cancelled: false,
            }
        );
        let guard = recorded.0.lock().unwrap();
        let (frames, finished) = &*guard;
        assert!(*finished);
        assert_eq!(frames.len(), 7);
        // Annotated frames carry the red box, skipped ones do not
        assert_eq!(*frames[0].get_pixel(2, 6), Rgb([255, 0, 0]));
        assert_ne!(*frames[1].get_pixel(2, 6), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_writer_resizes_to_sink() {
        let recorded = Recorded::default();
        write_annotated(
            Box::new(FrameList::new(2, 64, 48)),
            Box::new(RecordingSink(recorded.clone())),
            (32, 24),
            &alerting_annotator(),
            &WriterSettings::default(),
            &AtomicBool::new(false),
        )
        .unwrap();

        let guard = recorded.0.lock().unwrap();
        let frames = &guard.0;
        assert!(frames.iter().all(|f| f.dimensions() == (32, 24)));
    }

    #[test]
    fn test_writer_cancelled_before_start() {
        let recorded = Recorded::default();
        let summary = write_annotated(
            Box::new(FrameList::new(5, 8, 8)),
            Box::new(RecordingSink(recorded.clone())),
            (8, 8),
            &alerting_annotator(),
            &WriterSettings::default(),
            &AtomicBool::new(true),
        )
        .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.frames_written, 0);
        assert!(recorded.0.lock().unwrap().1);
    }
}
