//! Web server for video fire detection
//!
//! Serves the upload/preview flow, the live camera feed and the alert
//! polling endpoint on top of the frame pipeline.

pub mod config;
mod handlers;
pub mod pages;
pub mod session;
mod types;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use fire_watch_detection::{load_class_names, ClassNames, Detector, YoloConfig, YoloDetector};
use fire_watch_pipeline::{AlertState, FrameAnnotator, OverlayRenderer, WriterHandle};
use fire_watch_video::VideoBackend;

pub use config::AppConfig;
pub use handlers::*;
pub use session::{ProcessingSession, SessionStore};
pub use types::*;

/// Server state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Opens uploads, live sources and output sinks
    pub backend: Arc<dyn VideoBackend>,
    pub annotator: Arc<FrameAnnotator>,
    /// Same store the annotator writes to
    pub alerts: Arc<AlertState>,
    pub sessions: SessionStore,
    /// Background writers by session id
    pub writers: Arc<RwLock<HashMap<String, WriterHandle>>>,
}

impl AppState {
    /// Wire the pipeline; `detector: None` runs without inference
    #[must_use]
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn VideoBackend>,
        detector: Option<Arc<dyn Detector>>,
        class_names: ClassNames,
    ) -> Self {
        let alerts = Arc::new(AlertState::new());
        let renderer = Arc::new(OverlayRenderer::new(config.font_path.clone()));
        let annotator = FrameAnnotator::new(detector, config.thresholds, alerts.clone())
            .with_class_names(class_names)
            .with_renderer(renderer);

        Self {
            config: Arc::new(config),
            backend,
            annotator: Arc::new(annotator),
            alerts,
            sessions: SessionStore::new(),
            writers: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

/// Load the ONNX detector, `None` (degraded mode) when it cannot be loaded
pub fn load_detector(config: &AppConfig) -> Option<Arc<dyn Detector>> {
    let yolo_config = YoloConfig {
        iou_threshold: config.detector_iou_threshold,
        input_size: config.detector_input_size,
        ..YoloConfig::default()
    };
    match YoloDetector::new(&config.model_path, yolo_config) {
        Ok(detector) => Some(Arc::new(detector)),
        Err(e) => {
            error!("Failed to load detector from {}: {e}", config.model_path.display());
            warn!("Running without detection; frames pass through unannotated");
            None
        }
    }
}

/// Class names from `CLASS_NAMES_PATH`, `["fire"]` otherwise
pub fn load_configured_class_names(config: &AppConfig) -> ClassNames {
    let Some(path) = &config.class_names_path else {
        return ClassNames::default();
    };
    load_class_names(path).unwrap_or_else(|e| {
        warn!("{e}; using default class names");
        ClassNames::default()
    })
}

/// Build the router with all endpoints
pub fn build_router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes());
    let outputs = ServeDir::new(&state.config.output_dir);

    Router::new()
        // Pages
        .route("/", get(index))
        .route("/demo", get(demo))
        .route("/process", get(process_page))
        .route("/live", get(live_page))
        // Upload flow
        .route("/upload", post(upload).layer(upload_limit))
        .route("/process_stream", get(process_stream))
        .route("/process_status", get(process_status))
        .route("/finish_processing", get(finish_processing))
        .nest_service("/outputs", outputs)
        // Live flow
        .route("/live_feed", get(live_feed))
        .route("/check_high_confidence", get(check_high_confidence))
        // Health check
        .route("/healthz", get(health_check))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    prepare_dirs(&state.config.upload_dir, &state.config.output_dir).await?;
    info!(
        "Fire detection server listening on {} (model loaded: {})",
        listener.local_addr()?,
        state.annotator.is_detector_loaded()
    );
    axum::serve(listener, build_router(state)).await
}

/// Bind `addr` and serve
pub async fn start_server(addr: &str, state: AppState) -> Result<(), std::io::Error> {
    info!("Starting server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await
}
