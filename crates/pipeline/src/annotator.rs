//! Per-frame detection and overlay planning

use image::{Rgb, RgbImage};
use std::sync::Arc;
use tracing::{debug, warn};

use fire_watch_common::Thresholds;
use fire_watch_detection::{ClassNames, Detection, Detector};

use crate::alert::AlertState;
use crate::overlay::{DrawOp, OverlayRenderer};

pub const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const DRAW_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const BOX_THICKNESS: u32 = 3;
const LABEL_SCALE: f32 = 0.7;
const ALERT_SCALE: f32 = 0.9;
const CAPTION_SCALE: f32 = 0.8;

const BANNER_TEXT: &str = "HIGH CONFIDENCE FIRE DETECTED!";
const BANNER_SCALE: f32 = 1.0;
const BANNER_INSET: i32 = 5;
const BANNER_THICKNESS: u32 = 5;

/// Annotated frame plus what was drawn on it
#[derive(Debug, Clone)]
pub struct Annotation {
    pub frame: RgbImage,
    /// At least one detection reached the alert threshold
    pub high_confidence: bool,
    pub overlays: Vec<DrawOp>,
}

/// Overlay plan for one frame, before rendering
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayPlan {
    pub ops: Vec<DrawOp>,
    /// Confidences that reached the alert threshold, in detector order
    pub alert_scores: Vec<f32>,
}

/// Label percentage, rounded up
///
/// Computed in `f64` so the product of an `f32` score is not rounded onto
/// a whole number before the ceiling.
#[must_use]
pub fn confidence_percent(confidence: f32) -> u32 {
    (f64::from(confidence) * 100.0).ceil() as u32
}

/// `"<class> <percent>%"`
#[must_use]
pub fn confidence_label(class_name: &str, confidence: f32) -> String {
    format!("{class_name} {}%", confidence_percent(confidence))
}

/// Build the overlay plan for a set of detections
///
/// Detections under the draw threshold are skipped. The threshold caption
/// is always the last op.
#[must_use]
pub fn plan_overlays(
    detections: &[Detection],
    thresholds: Thresholds,
    class_names: &ClassNames,
    frame_height: u32,
) -> OverlayPlan {
    let mut plan = OverlayPlan::default();

    for detection in detections {
        let confidence = detection.confidence;
        if confidence < thresholds.draw {
            continue;
        }

        let (x1, y1, x2, y2) = detection.bbox.to_pixels();
        let is_alert = confidence >= thresholds.alert;

        plan.ops.push(DrawOp::Rect {
            x1,
            y1,
            x2,
            y2,
            color: if is_alert { ALERT_COLOR } else { DRAW_COLOR },
            thickness: BOX_THICKNESS,
        });
        plan.ops.push(DrawOp::Text {
            x: x1.saturating_add(5),
            y: y1.saturating_add(25),
            text: confidence_label(class_names.name(detection.class_index), confidence),
            color: LABEL_COLOR,
            scale: LABEL_SCALE,
        });

        if is_alert {
            plan.ops.push(DrawOp::Text {
                x: x1,
                y: y1.saturating_sub(10),
                text: "ALERT!".to_string(),
                color: ALERT_COLOR,
                scale: ALERT_SCALE,
            });
            plan.alert_scores.push(confidence);
        }
    }

    plan.ops.push(DrawOp::Text {
        x: 10,
        y: frame_height as i32 - 10,
        text: format!("Alert Threshold: {}%", thresholds.alert_percent()),
        color: ALERT_COLOR,
        scale: CAPTION_SCALE,
    });

    plan
}

/// Full-frame alert border and banner caption
#[must_use]
pub fn alert_banner(width: u32, height: u32) -> Vec<DrawOp> {
    vec![
        DrawOp::Rect {
            x1: BANNER_INSET,
            y1: BANNER_INSET,
            x2: width as i32 - BANNER_INSET,
            y2: height as i32 - BANNER_INSET,
            color: ALERT_COLOR,
            thickness: BANNER_THICKNESS,
        },
        DrawOp::Text {
            x: 10,
            y: 30,
            text: BANNER_TEXT.to_string(),
            color: ALERT_COLOR,
            scale: BANNER_SCALE,
        },
    ]
}

/// Runs the detector on a frame and draws the result
///
/// Built once at start-up and shared by every producer.
pub struct FrameAnnotator {
    detector: Option<Arc<dyn Detector>>,
    thresholds: Thresholds,
    class_names: ClassNames,
    alert_state: Arc<AlertState>,
    renderer: Arc<OverlayRenderer>,
}

impl FrameAnnotator {
    /// `detector: None` runs in degraded mode, frames pass through untouched
    #[must_use]
    pub fn new(
        detector: Option<Arc<dyn Detector>>,
        thresholds: Thresholds,
        alert_state: Arc<AlertState>,
    ) -> Self {
        Self {
            detector,
            thresholds,
            class_names: ClassNames::default(),
            alert_state,
            renderer: Arc::new(OverlayRenderer::shapes_only()),
        }
    }

    #[must_use]
    pub fn with_class_names(mut self, class_names: ClassNames) -> Self {
        self.class_names = class_names;
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<OverlayRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn is_detector_loaded(&self) -> bool {
        self.detector.is_some()
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn alert_state(&self) -> &Arc<AlertState> {
        &self.alert_state
    }

    pub fn renderer(&self) -> &OverlayRenderer {
        &self.renderer
    }

    /// Detect, record alerts and draw the overlay plan onto `frame`
    pub fn annotate(&self, mut frame: RgbImage) -> Annotation {
        let Some(detector) = &self.detector else {
            return Annotation {
                frame,
                high_confidence: false,
                overlays: Vec::new(),
            };
        };

        let detections = match detector.detect(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Detection failed, treating frame as empty: {e}");
                Vec::new()
            }
        };

        let plan = plan_overlays(
            &detections,
            self.thresholds,
            &self.class_names,
            frame.height(),
        );
        for score in &plan.alert_scores {
            self.alert_state.record_high_confidence(*score);
        }
        if !plan.alert_scores.is_empty() {
            debug!(
                "High-confidence detections in frame: {:?}",
                plan.alert_scores
            );
        }

        self.renderer.render(&mut frame, &plan.ops);

        Annotation {
            frame,
            high_confidence: !plan.alert_scores.is_empty(),
            overlays: plan.ops,
        }
    }
}
