/// Integration tests for the FFmpeg backend
///
/// These encode a short clip with the `ffmpeg` CLI and decode it again, so
/// they need FFmpeg on PATH.
#[cfg(feature = "ffmpeg")]
mod ffmpeg_roundtrip {
    use fire_watch_video::{FfmpegBackend, SinkSpec, SourceId, VideoBackend};
    use image::{Rgb, RgbImage};

    fn write_clip(path: &std::path::Path, frames: usize) {
        let backend = FfmpegBackend::default();
        let spec = SinkSpec {
            width: 160,
            height: 120,
            fps: 25.0,
        };
        let mut sink = backend.create_sink(path, &spec).expect("create sink");
        for i in 0..frames {
            let shade = (i * 20) as u8;
            sink.write_frame(&RgbImage::from_pixel(160, 120, Rgb([shade, 64, 64])))
                .expect("write frame");
        }
        sink.finish().expect("finish sink");
    }

    #[test]
    #[ignore = "requires ffmpeg on PATH"]
    fn test_written_clip_probes_and_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        write_clip(&path, 10);

        let backend = FfmpegBackend::default();
        let info = backend.probe(&path).expect("probe");
        assert_eq!((info.width, info.height), (160, 120));
        assert_eq!(info.frame_count, Some(10));
        let fps = info.fps.expect("frame rate");
        assert!((fps - 25.0).abs() < 0.01, "fps was {fps}");

        let mut source = backend.open(&SourceId::from(path.as_path())).expect("open");
        let mut decoded = 0;
        while let Some(frame) = source.read_frame().expect("read") {
            assert_eq!(frame.dimensions(), (160, 120));
            decoded += 1;
        }
        assert_eq!(decoded, 10);
    }

    #[test]
    #[ignore = "requires ffmpeg on PATH"]
    fn test_odd_sized_frames_are_padded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.mp4");

        let backend = FfmpegBackend::default();
        let spec = SinkSpec {
            width: 161,
            height: 121,
            fps: 10.0,
        };
        let mut sink = backend.create_sink(&path, &spec).expect("create sink");
        for _ in 0..3 {
            sink.write_frame(&RgbImage::new(161, 121)).expect("write frame");
        }
        sink.finish().expect("finish sink");

        let info = backend.probe(&path).expect("probe");
        assert_eq!((info.width, info.height), (162, 122));
    }

    #[test]
    fn test_unknown_device_is_unavailable() {
        let backend = FfmpegBackend::default();
        assert!(backend.open(&SourceId::Device(250)).is_err());
    }
}
