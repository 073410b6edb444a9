//! Fire detection adapter using `YOLOv8` via ONNX Runtime
//!
//! The rest of the workspace only sees the [`Detector`] trait: given a frame,
//! return zero or more [`Detection`]s in that frame's pixel coordinates.
//! [`YoloDetector`] implements it for single- or multi-class `YOLOv8` models
//! exported to ONNX (e.g. a fire model trained with ultralytics).
//!
//! # Example
//! ```no_run
//! use fire_watch_detection::{Detector, YoloConfig, YoloDetector};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let detector = YoloDetector::new("model/fire.onnx", YoloConfig::default())?;
//!
//! let img = image::open("frame.jpg")?.to_rgb8();
//! for detection in detector.detect(&img)? {
//!     println!("class {}: {:.2}", detection.class_index, detection.confidence);
//! }
//! # Ok(())
//! # }
//! ```

pub mod classes;

use image::RgbImage;
use ndarray::Array;
use ort::{session::Session, value::TensorRef};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use fire_watch_common::ProcessingError;

pub use classes::{load_class_names, ClassNames};

/// Bounding box in pixel coordinates of the frame it was detected in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates
    #[must_use]
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Create a bounding box from center format (as emitted by YOLO heads)
    #[must_use]
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            x1: cx - width / 2.0,
            y1: cy - height / 2.0,
            x2: cx + width / 2.0,
            y2: cy + height / 2.0,
        }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    #[must_use]
    #[inline]
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Corner coordinates truncated toward zero
    #[must_use]
    pub fn to_pixels(&self) -> (i32, i32, i32, i32) {
        (
            self.x1 as i32,
            self.y1 as i32,
            self.x2 as i32,
            self.y2 as i32,
        )
    }

    /// Scale both axes (used to map model input space back to frame space)
    #[must_use]
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }

    /// Calculate Intersection over Union (`IoU`) with another box
    #[must_use]
    #[inline]
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.area() + other.area() - intersection_area;

        if union_area > 0.0 {
            intersection_area / union_area
        } else {
            0.0
        }
    }
}

/// One detected object instance in a single frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Confidence score (0-1)
    pub confidence: f32,
    /// Index into the model's class list
    pub class_index: usize,
    /// Bounding box in frame pixel coordinates
    pub bbox: BoundingBox,
}

impl Detection {
    #[must_use]
    pub fn new(confidence: f32, class_index: usize, bbox: BoundingBox) -> Self {
        Self {
            confidence,
            class_index,
            bbox,
        }
    }
}

/// Anything that can turn a frame into detections
///
/// Implementations must tolerate many calls per second on frames of varying
/// size and are treated as stateless per call.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectionError>;
}

impl<F> Detector for F
where
    F: Fn(&RgbImage) -> Result<Vec<Detection>, DetectionError> + Send + Sync,
{
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        self(frame)
    }
}

/// Configuration for the YOLO adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoloConfig {
    /// Minimum confidence kept by the adapter itself (0.0-1.0)
    pub confidence_threshold: f32,
    /// `IoU` threshold for non-maximum suppression (0.0-1.0)
    pub iou_threshold: f32,
    /// Restrict detections to these class indices (None = all classes)
    pub classes: Option<Vec<usize>>,
    /// Maximum number of detections to return per frame
    pub max_detections: usize,
    /// Model input size (`YOLOv8` default is 640x640)
    pub input_size: u32,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            classes: None,
            max_detections: 300,
            input_size: 640,
        }
    }
}

/// `YOLOv8` detector backed by an ONNX Runtime session
pub struct YoloDetector {
    /// `Session::run` needs `&mut self`, frames arrive from several producers
    session: Mutex<Session>,
    config: YoloConfig,
}

impl YoloDetector {
    /// Load an ONNX model from disk
    pub fn new<P: AsRef<Path>>(model_path: P, config: YoloConfig) -> Result<Self, DetectionError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(DetectionError::ModelLoad(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        info!("Loading YOLOv8 model from {}", model_path.display());

        let session = Session::builder()
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?;

        info!("YOLOv8 model loaded successfully");

        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &YoloConfig {
        &self.config
    }

    /// Preprocess frame to `YOLOv8` input format (1, 3, H, W) normalized to [0, 1]
    fn preprocess(&self, image: &RgbImage) -> Array<f32, ndarray::Dim<[usize; 4]>> {
        let input_size = self.config.input_size;

        let resized = image::imageops::resize(
            image,
            input_size,
            input_size,
            image::imageops::FilterType::Triangle,
        );

        let mut input_array = Array::zeros((1, 3, input_size as usize, input_size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            input_array[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
            input_array[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
            input_array[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
        }

        input_array
    }
}

impl Detector for YoloDetector {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        debug!(
            "Running fire detection on {}x{} frame",
            frame.width(),
            frame.height()
        );

        let input = self.preprocess(frame);
        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectionError::Inference("session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
            DetectionError::Inference(format!("Failed to extract tensor: {e}"))
        })?;

        decode_predictions(
            shape.as_ref(),
            data,
            (frame.width(), frame.height()),
            &self.config,
        )
    }
}

/// Decode a raw `YOLOv8` output tensor into frame-space detections
///
/// Layout is `[batch, 4 + num_classes, anchors]`; the first four features of
/// each anchor are `[x_center, y_center, width, height]` in model input
/// pixels, the rest are per-class scores.
pub fn decode_predictions(
    dims: &[i64],
    data: &[f32],
    frame_size: (u32, u32),
    config: &YoloConfig,
) -> Result<Vec<Detection>, DetectionError> {
    if dims.len() != 3 {
        return Err(DetectionError::Inference(format!(
            "Expected 3D output tensor, got {}D",
            dims.len()
        )));
    }

    let num_features = dims[1] as usize;
    let num_anchors = dims[2] as usize;
    if num_features <= 4 {
        return Err(DetectionError::Inference(format!(
            "Output has {num_features} features, expected box + class scores"
        )));
    }
    if data.len() < num_features * num_anchors {
        return Err(DetectionError::Inference(format!(
            "Output tensor holds {} values, shape needs {}",
            data.len(),
            num_features * num_anchors
        )));
    }
    let num_classes = num_features - 4;

    let sx = frame_size.0 as f32 / config.input_size as f32;
    let sy = frame_size.1 as f32 / config.input_size as f32;

    let mut raw_detections = Vec::with_capacity(num_anchors / 10);

    for anchor_idx in 0..num_anchors {
        let get_feature = |feature_idx: usize| data[feature_idx * num_anchors + anchor_idx];

        let mut max_prob = 0.0f32;
        let mut max_class = 0usize;
        for class_idx in 0..num_classes {
            let prob = get_feature(4 + class_idx);
            if prob > max_prob {
                max_prob = prob;
                max_class = class_idx;
            }
        }

        if max_prob < config.confidence_threshold {
            continue;
        }
        if let Some(ref classes) = config.classes {
            if !classes.contains(&max_class) {
                continue;
            }
        }

        let bbox = BoundingBox::from_center(
            get_feature(0),
            get_feature(1),
            get_feature(2),
            get_feature(3),
        )
        .scaled(sx, sy);

        raw_detections.push(Detection::new(max_prob, max_class, bbox));
    }

    debug!("Raw detections before NMS: {}", raw_detections.len());

    let mut detections = apply_nms(raw_detections, config.iou_threshold);
    detections.truncate(config.max_detections);

    Ok(detections)
}

/// Per-class non-maximum suppression, highest confidence first
#[must_use]
pub fn apply_nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = keep.iter().any(|kept| {
            kept.class_index == candidate.class_index
                && kept.bbox.iou(&candidate.bbox) >= iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }

    debug!("Detections after NMS: {}", keep.len());
    keep
}

/// Error types for fire detection
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Class names error: {0}")]
    ClassNames(String),

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::Error),
}

impl From<DetectionError> for ProcessingError {
    fn from(err: DetectionError) -> Self {
        ProcessingError::Other(err.to_string())
    }
}
