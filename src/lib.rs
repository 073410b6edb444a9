//! Fire Watch: fire detection on uploaded and live video
//!
//! Facade over the workspace crates:
//! - [`common`]: shared errors, thresholds and video info
//! - [`detection`]: the `Detector` trait and the YOLO/ONNX adapter
//! - [`video`]: video sources, sinks and backends
//! - [`pipeline`]: annotation, alert state, preview and disk writer
//!
//! The HTTP server lives in the `fire-watch-server` crate.

pub use fire_watch_common as common;
pub use fire_watch_detection as detection;
pub use fire_watch_pipeline as pipeline;
pub use fire_watch_video as video;

pub use fire_watch_common::{ProcessingError, Result, Thresholds};
pub use fire_watch_pipeline::{AlertState, FrameAnnotator};
