//! Fire detection frame pipeline
//!
//! Everything between a decoded frame and an encoded output:
//! - [`FrameAnnotator`]: detector call, overlay plan, alert recording
//! - [`OverlayRenderer`]: draws overlay plans with `imageproc`
//! - [`AlertState`]: last high-confidence event, polled by the UI
//! - [`PreviewStream`]: multipart JPEG preview of a source
//! - [`write_annotated`] / [`spawn_background_writer`]: annotated copy on disk
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fire_watch_common::Thresholds;
//! use fire_watch_pipeline::{AlertState, FrameAnnotator};
//!
//! let alerts = Arc::new(AlertState::new());
//! let annotator = FrameAnnotator::new(None, Thresholds::default(), alerts.clone());
//! let annotation = annotator.annotate(image::RgbImage::new(640, 480));
//! assert!(!annotation.high_confidence);
//! ```

pub mod alert;
pub mod annotator;
pub mod overlay;
pub mod producer;
pub mod task;

pub use alert::{AlertRecord, AlertState, AlertStatus, RECENT_WINDOW};
pub use annotator::{
    alert_banner, confidence_label, confidence_percent, plan_overlays, Annotation,
    FrameAnnotator, OverlayPlan,
};
pub use overlay::{DrawOp, OverlayRenderer};
pub use producer::{
    encode_jpeg, multipart_chunk, write_annotated, write_video, PreviewStream, StreamSettings,
    WriteSummary, WriterSettings, MULTIPART_BOUNDARY, MULTIPART_CONTENT_TYPE,
};
pub use task::{spawn_background_writer, WriterHandle, WriterState};
