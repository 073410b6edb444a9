use image::{Rgb, RgbImage};
use fire_watch_detection::{Detector, YoloConfig, YoloDetector};

const MODEL_PATH: &str = "model/fire.onnx";

/// Create a test image with solid color
fn create_test_image(width: u32, height: u32, color: Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(width, height, |_, _| color)
}

#[test]
#[ignore] // Requires a fire model exported to model/fire.onnx
fn test_detector_loads_model() {
    let detector = YoloDetector::new(MODEL_PATH, YoloConfig::default());
    assert!(
        detector.is_ok(),
        "Failed to load YOLOv8 model from {MODEL_PATH}"
    );
}

#[test]
#[ignore] // Requires a fire model exported to model/fire.onnx
fn test_detect_on_blank_image() {
    let detector = YoloDetector::new(MODEL_PATH, YoloConfig::default()).unwrap();

    let img = create_test_image(640, 480, Rgb([255, 255, 255]));
    let detections = detector.detect(&img).unwrap();

    assert!(
        detections.len() < 5,
        "Unexpected detections on blank image: {detections:?}"
    );
}

#[test]
#[ignore] // Requires a fire model exported to model/fire.onnx
fn test_detections_stay_inside_frame() {
    let detector = YoloDetector::new(MODEL_PATH, YoloConfig::default()).unwrap();

    // Non-square frame so the box rescaling is exercised on both axes
    let img = create_test_image(1280, 360, Rgb([200, 80, 20]));
    for det in detector.detect(&img).unwrap() {
        assert!((0.0..=1.0).contains(&det.confidence));
        assert!(det.bbox.x1 < det.bbox.x2);
        assert!(det.bbox.y1 < det.bbox.y2);
        assert!(det.bbox.x2 <= 1280.0 * 1.05);
        assert!(det.bbox.y2 <= 360.0 * 1.05);
    }
}
