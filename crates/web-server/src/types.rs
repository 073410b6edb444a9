//! JSON response and query types

use serde::{Deserialize, Serialize};

use fire_watch_pipeline::{AlertStatus, WriterState};

/// `/healthz` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub conf_threshold: f32,
    pub alert_threshold: f32,
}

/// `/check_high_confidence` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighConfidenceResponse {
    pub high_confidence: bool,
    /// Rounded to 4 decimals, only while the event is recent
    pub score: Option<f64>,
    pub threshold: f32,
}

impl HighConfidenceResponse {
    #[must_use]
    pub fn new(status: AlertStatus, threshold: f32) -> Self {
        Self {
            high_confidence: status.is_recent,
            score: status.score.map(|score| round4(f64::from(score))),
            threshold,
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// `/process_status` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterStatusResponse {
    /// `running`, `completed`, `failed` or `cancelled`
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames_written: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub output_filename: String,
}

impl WriterStatusResponse {
    #[must_use]
    pub fn new(state: &WriterState, output_filename: String) -> Self {
        let (frames_written, error) = match state {
            WriterState::Completed(summary) => (Some(summary.frames_written), None),
            WriterState::Failed(message) => (None, Some(message.clone())),
            WriterState::Running | WriterState::Cancelled => (None, None),
        };
        Self {
            state: state.name().to_string(),
            frames_written,
            error,
            output_filename,
        }
    }
}

/// `/demo` query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DemoQuery {
    pub error: Option<String>,
}
