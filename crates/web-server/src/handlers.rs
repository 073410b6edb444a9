//! HTTP request handlers

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fire_watch_pipeline::{spawn_background_writer, PreviewStream, MULTIPART_CONTENT_TYPE};
use fire_watch_video::SourceId;

use crate::{
    pages,
    session::{session_cookie, session_id, ProcessingSession},
    types::{DemoQuery, HealthResponse, HighConfidenceResponse, WriterStatusResponse},
    AppState,
};

/// Upload extensions accepted by `/upload`
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["mp4", "mov", "avi", "mkv"];

/// Preview chunks buffered between the producer thread and the response
const PREVIEW_BUFFER: usize = 2;

fn demo_error(code: &str) -> Response {
    Redirect::to(&format!("/demo?error={code}")).into_response()
}

/// Lower-cased extension when it is an accepted video type
#[must_use]
pub fn video_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

pub async fn index(State(state): State<AppState>) -> Html<String> {
    Html(pages::index_page(state.config.thresholds))
}

pub async fn demo(Query(query): Query<DemoQuery>) -> Html<String> {
    Html(pages::demo_page(query.error.as_deref()))
}

/// Liveness plus model status; 503 while running without a detector
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let model_loaded = state.annotator.is_detector_loaded();
    let code = if model_loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(HealthResponse {
            status: "ok".to_string(),
            model_loaded,
            conf_threshold: state.config.thresholds.draw,
            alert_threshold: state.config.thresholds.alert,
        }),
    )
}

/// Save an uploaded video and start a processing session
///
/// User errors redirect back to the form; nothing is left on disk for them.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return demo_error("no_file"),
            Err(e) => {
                warn!("Malformed upload: {e}");
                return demo_error("upload_failed");
            }
        };
        if field.name() != Some("video") {
            continue;
        }

        let original_filename = field.file_name().unwrap_or_default().to_string();
        if original_filename.is_empty() {
            return demo_error("empty_filename");
        }
        let Some(ext) = video_extension(&original_filename) else {
            info!("Rejected upload with unsupported format: {original_filename}");
            return demo_error("unsupported_format");
        };

        let uid = Uuid::new_v4().simple().to_string();
        let input_path = state.config.upload_dir.join(format!("{uid}.{ext}"));
        let output_filename = format!("processed_{uid}.mp4");
        let output_path = state.config.output_dir.join(&output_filename);

        let written = async {
            let mut file = tokio::fs::File::create(&input_path).await?;
            let mut total = 0usize;
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(std::io::Error::other)?
            {
                total += chunk.len();
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<_, std::io::Error>(total)
        }
        .await;

        let bytes = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to save upload to {}: {e}", input_path.display());
                let _ = tokio::fs::remove_file(&input_path).await;
                return demo_error("upload_failed");
            }
        };
        info!(
            "Saved upload {original_filename} ({bytes} bytes) as {}",
            input_path.display()
        );

        let session = ProcessingSession {
            input_path,
            output_path,
            output_filename,
            original_filename,
        };
        let id = state.sessions.insert(session_id(&headers), session).await;

        return (
            [(header::SET_COOKIE, session_cookie(&id))],
            Redirect::to("/process"),
        )
            .into_response();
    }
}

pub async fn process_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match session_id(&headers) {
        Some(id) => state.sessions.get(&id).await,
        None => None,
    };
    match session {
        Some(session) => Html(pages::processing_page(
            &session.original_filename,
            &session.output_filename,
        ))
        .into_response(),
        None => demo_error("no_video"),
    }
}

/// Annotated preview of the session's upload
///
/// Also starts the background writer for the session unless one is
/// already running for the same output.
pub async fn process_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return empty_multipart();
    };
    let Some(session) = state.sessions.get(&id).await else {
        return empty_multipart();
    };

    ensure_writer(&state, &id, &session).await;
    preview_response(&state, SourceId::Path(session.input_path))
}

async fn ensure_writer(state: &AppState, id: &str, session: &ProcessingSession) {
    let mut writers = state.writers.write().await;
    if let Some(existing) = writers.get(id) {
        if existing.output() == session.output_path && !existing.is_finished() {
            debug!("Writer for session {id} already running");
            return;
        }
    }

    match spawn_background_writer(
        state.backend.clone(),
        session.input_path.clone(),
        session.output_path.clone(),
        state.annotator.clone(),
        state.config.writer_settings(),
    ) {
        Ok(handle) => {
            info!("Started writer for session {id}: {}", handle.output().display());
            // A replaced handle keeps running detached
            writers.insert(id.to_string(), handle);
        }
        Err(e) => error!("Failed to start writer for session {id}: {e}"),
    }
}

/// State of the session's background writer
pub async fn process_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let id = session_id(&headers)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "No processing session".to_string()))?;
    let writers = state.writers.read().await;
    let handle = writers
        .get(&id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "No writer for this session".to_string()))?;

    let output_filename = handle
        .output()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Json(WriterStatusResponse::new(&handle.state(), output_filename)))
}

/// Summarise the processed upload and clear the session
pub async fn finish_processing(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let session = match session_id(&headers) {
        Some(id) => {
            // The writer keeps running detached if it has not finished yet
            state.writers.write().await.remove(&id);
            state.sessions.take(&id).await
        }
        None => None,
    };
    let Some(session) = session else {
        return Ok(demo_error("processing_error"));
    };

    let backend = state.backend.clone();
    let input = session.input_path.clone();
    let info = tokio::task::spawn_blocking(move || backend.probe(&input))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let (frame_count, duration) = match info {
        Ok(info) => (info.frame_count.unwrap_or(0), info.duration_secs()),
        Err(e) => {
            warn!("Could not probe {}: {e}", session.input_path.display());
            (0, 0.0)
        }
    };

    let message = format!("Processed {frame_count} frames ({duration:.1} seconds)");
    info!("{message} for {}", session.original_filename);
    let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    Ok(Html(pages::result_page(
        &session.output_filename,
        &message,
        &timestamp,
    ))
    .into_response())
}

pub async fn live_page() -> Html<String> {
    Html(pages::live_page())
}

/// Annotated stream of the configured live source
pub async fn live_feed(State(state): State<AppState>) -> Response {
    let source = state.config.live_source.clone();
    preview_response(&state, source)
}

/// Whether a high-confidence detection happened in the last two seconds
pub async fn check_high_confidence(State(state): State<AppState>) -> impl IntoResponse {
    Json(HighConfidenceResponse::new(
        state.alerts.query(),
        state.config.thresholds.alert,
    ))
}

fn empty_multipart() -> Response {
    ([(header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE)], Body::empty()).into_response()
}

/// Stream a preview producer as `multipart/x-mixed-replace`
///
/// The producer runs on a blocking thread and stops when the client goes
/// away. An unavailable source yields an empty body.
fn preview_response(state: &AppState, source: SourceId) -> Response {
    let (tx, rx) = mpsc::channel::<Vec<u8>>(PREVIEW_BUFFER);
    let backend = state.backend.clone();
    let annotator = state.annotator.clone();
    let settings = state.config.stream_settings();

    tokio::task::spawn_blocking(move || {
        let Some(stream) = PreviewStream::open(backend.as_ref(), &source, annotator, settings)
        else {
            return;
        };
        for chunk in stream {
            if tx.blocking_send(chunk).is_err() {
                debug!("Preview client for {source} disconnected");
                return;
            }
        }
        debug!("Preview of {source} finished");
    });

    let body = futures::stream::unfold(rx, |mut rx| async move {
        let chunk = rx.recv().await?;
        Some((Ok::<_, std::io::Error>(Bytes::from(chunk)), rx))
    });

    (
        [(header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE)],
        Body::from_stream(body),
    )
        .into_response()
}

/// Create the upload and output directories
pub async fn prepare_dirs(upload_dir: &Path, output_dir: &Path) -> std::io::Result<()> {
    for dir in [upload_dir, output_dir] {
        tokio::fs::create_dir_all(dir).await?;
    }
    Ok(())
}
