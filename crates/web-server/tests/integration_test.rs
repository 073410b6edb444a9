//! Integration tests for the web server
//!
//! Each test starts the real router on an ephemeral port with an in-memory
//! video backend and a stub detector, then drives it over HTTP.

use fire_watch_detection::{BoundingBox, ClassNames, Detection, DetectionError, Detector};
use fire_watch_server::{serve, AppConfig, AppState};
use fire_watch_video::{MemoryBackend, MemoryClip, SourceId};
use image::{Rgb, RgbImage};
use reqwest::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

const MARKER: Rgb<u8> = Rgb([250, 250, 0]);
const LIVE_DEVICE: u32 = 7;

/// Ten grey 160x120 frames at 25 fps; frame 4 carries the marker pixel
fn marked_clip() -> MemoryClip {
    let frames = (0..10)
        .map(|i| {
            let mut frame = RgbImage::from_pixel(160, 120, Rgb([80, 80, 80]));
            if i == 4 {
                frame.put_pixel(0, 0, MARKER);
            }
            frame
        })
        .collect();
    MemoryClip::new(frames, 25.0)
}

/// Reports fire at 85% wherever the marker pixel is present
fn marker_detector() -> Arc<dyn Detector> {
    Arc::new(
        |frame: &RgbImage| -> Result<Vec<Detection>, DetectionError> {
            if *frame.get_pixel(0, 0) == MARKER {
                Ok(vec![Detection::new(
                    0.85,
                    0,
                    BoundingBox::new(20.0, 20.0, 100.0, 90.0),
                )])
            } else {
                Ok(Vec::new())
            }
        },
    )
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    backend: Arc<MemoryBackend>,
    state: AppState,
    _dir: TempDir,
}

impl TestServer {
    async fn start(detector: Option<Arc<dyn Detector>>, backend: MemoryBackend) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            upload_dir: dir.path().join("uploads"),
            output_dir: dir.path().join("outputs"),
            font_path: dir.path().join("no-font.ttf"),
            live_source: SourceId::Device(LIVE_DEVICE),
            ..AppConfig::default()
        };
        let backend = Arc::new(backend);
        let state = AppState::new(config, backend.clone(), detector, ClassNames::default());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state.clone()));

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        Self {
            base: format!("http://{addr}"),
            client,
            backend,
            state,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn get(&self, path: &str, cookie: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        request.send().await.unwrap()
    }

    async fn upload(&self, form: Form) -> reqwest::Response {
        self.client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    fn uploaded_files(&self) -> usize {
        std::fs::read_dir(&self.state.config.upload_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

fn video_form(filename: &str) -> Form {
    Form::new().part(
        "video",
        Part::bytes(b"not a real video".to_vec()).file_name(filename.to_string()),
    )
}

fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// `name=value` part of the session `Set-Cookie`
fn session_cookie(response: &reqwest::Response) -> String {
    let value = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .expect("session cookie");
    value.split(';').next().unwrap().to_string()
}

fn count_parts(body: &[u8]) -> usize {
    let marker = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    body.windows(marker.len()).filter(|w| *w == marker).count()
}

#[tokio::test]
async fn test_upload_process_finish_flow() {
    let server = TestServer::start(
        Some(marker_detector()),
        MemoryBackend::new().with_file_clip(marked_clip()),
    )
    .await;

    let response = server.upload(video_form("clip.MP4")).await;
    assert_eq!(response.status(), 303);
    assert_eq!(location(&response), "/process");
    let cookie = session_cookie(&response);
    assert!(cookie.starts_with("fire_session="));
    assert_eq!(server.uploaded_files(), 1);

    let page = server.get("/process", Some(&cookie)).await;
    assert_eq!(page.status(), 200);
    assert!(page.text().await.unwrap().contains("clip.MP4"));

    // Preview runs to the end of the clip, one part per frame
    let stream = server.get("/process_stream", Some(&cookie)).await;
    assert_eq!(stream.status(), 200);
    assert_eq!(
        stream.headers()[CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );
    let body = stream.bytes().await.unwrap();
    assert_eq!(count_parts(&body), 10);

    let alert: serde_json::Value = server
        .get("/check_high_confidence", None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(alert["high_confidence"], true);
    assert_eq!(alert["score"], 0.85);
    assert_eq!(alert["threshold"], 0.7);

    // Wait for the background writer
    let mut status = serde_json::Value::Null;
    for _ in 0..200 {
        let response = server.get("/process_status", Some(&cookie)).await;
        assert_eq!(response.status(), 200);
        status = response.json().await.unwrap();
        if status["state"] != "running" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(status["state"], "completed");
    assert_eq!(status["frames_written"], 10);

    let output_filename = status["output_filename"].as_str().unwrap();
    assert!(output_filename.starts_with("processed_"));
    let output = server
        .backend
        .output(&server.state.config.output_dir.join(output_filename))
        .expect("writer output");
    assert!(output.finished);
    assert_eq!(output.frames.len(), 10);
    let red_frames = output
        .frames
        .iter()
        .filter(|frame| *frame.get_pixel(20, 50) == Rgb([255, 0, 0]))
        .count();
    assert_eq!(red_frames, 1);

    let result = server.get("/finish_processing", Some(&cookie)).await;
    assert_eq!(result.status(), 200);
    let html = result.text().await.unwrap();
    assert!(html.contains("Processed 10 frames (0.4 seconds)"));
    assert!(html.contains(&format!("/outputs/{output_filename}")));

    // Session is cleared
    let again = server.get("/process", Some(&cookie)).await;
    assert_eq!(again.status(), 303);
    assert_eq!(location(&again), "/demo?error=no_video");

    // Writer state is cleared with it
    let status = server.get("/process_status", Some(&cookie)).await;
    assert_eq!(status.status(), 404);
    assert!(server.state.writers.read().await.is_empty());
}

#[tokio::test]
async fn test_upload_rejections_leave_no_file() {
    let server = TestServer::start(None, MemoryBackend::new()).await;

    let no_field = Form::new().text("comment", "hello");
    let response = server.upload(no_field).await;
    assert_eq!(response.status(), 303);
    assert_eq!(location(&response), "/demo?error=no_file");

    let response = server.upload(video_form("notes.txt")).await;
    assert_eq!(response.status(), 303);
    assert_eq!(location(&response), "/demo?error=unsupported_format");

    let response = server.upload(video_form("")).await;
    assert_eq!(response.status(), 303);
    assert_eq!(location(&response), "/demo?error=empty_filename");

    assert_eq!(server.uploaded_files(), 0);
}

#[tokio::test]
async fn test_demo_page_shows_error() {
    let server = TestServer::start(None, MemoryBackend::new()).await;
    let html = server
        .get("/demo?error=unsupported_format", None)
        .await
        .text()
        .await
        .unwrap();
    assert!(html.contains("Unsupported format."));
    assert!(html.contains("name=\"video\""));
}

#[tokio::test]
async fn test_health_reports_model_status() {
    let degraded = TestServer::start(None, MemoryBackend::new()).await;
    let response = degraded.get("/healthz", None).await;
    assert_eq!(response.status(), 503);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["model_loaded"], false);
    assert_eq!(json["conf_threshold"], 0.5);

    let healthy = TestServer::start(Some(marker_detector()), MemoryBackend::new()).await;
    let response = healthy.get("/healthz", None).await;
    assert_eq!(response.status(), 200);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["model_loaded"], true);
}

#[tokio::test]
async fn test_check_high_confidence_initially_quiet() {
    let server = TestServer::start(Some(marker_detector()), MemoryBackend::new()).await;
    let json: serde_json::Value = server
        .get("/check_high_confidence", None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(json["high_confidence"], false);
    assert!(json["score"].is_null());

    server.state.alerts.record_high_confidence(0.912_345);
    let json: serde_json::Value = server
        .get("/check_high_confidence", None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(json["high_confidence"], true);
    assert_eq!(json["score"], 0.9123);
}

#[tokio::test]
async fn test_live_feed_unavailable_source_is_empty() {
    let server = TestServer::start(Some(marker_detector()), MemoryBackend::new()).await;
    let response = server.get("/live_feed", None).await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()[CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_live_feed_streams_source() {
    let backend = MemoryBackend::new();
    backend.insert(SourceId::Device(LIVE_DEVICE), marked_clip());
    let server = TestServer::start(Some(marker_detector()), backend).await;

    let body = server.get("/live_feed", None).await.bytes().await.unwrap();
    assert_eq!(count_parts(&body), 10);
    assert!(server.state.alerts.query().is_recent);
}

#[tokio::test]
async fn test_routes_without_session() {
    let server = TestServer::start(None, MemoryBackend::new()).await;

    let stream = server.get("/process_stream", None).await;
    assert_eq!(stream.status(), 200);
    assert!(stream.bytes().await.unwrap().is_empty());

    let status = server
        .get("/process_status", Some("fire_session=unknown"))
        .await;
    assert_eq!(status.status(), 404);

    let finish = server.get("/finish_processing", None).await;
    assert_eq!(finish.status(), 303);
    assert_eq!(location(&finish), "/demo?error=processing_error");
}

#[tokio::test]
async fn test_outputs_are_served() {
    let server = TestServer::start(None, MemoryBackend::new()).await;
    // The output directory is created when serving starts
    let output_dir = server.state.config.output_dir.clone();
    for _ in 0..50 {
        if Path::new(&output_dir).is_dir() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    std::fs::write(output_dir.join("processed_test.mp4"), b"mp4 bytes").unwrap();

    let response = server.get("/outputs/processed_test.mp4", None).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"mp4 bytes");

    let missing = server.get("/outputs/nope.mp4", None).await;
    assert_eq!(missing.status(), 404);
}
