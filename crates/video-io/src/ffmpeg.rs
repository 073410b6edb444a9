//! FFmpeg-backed video backend
//!
//! Sources decode on a dedicated thread with `ffmpeg-next` and hand RGB24
//! frames over a bounded channel, so a reader blocks on "next frame" the same
//! way it would on the capture device itself. Dropping the source disconnects
//! the channel and the decode thread releases the input on its next send.
//!
//! Sinks pipe raw RGB24 frames into an `ffmpeg` child process.

use crossbeam_channel::{bounded, Receiver, Sender};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use fire_watch_common::{ProcessingError, Result, VideoInfo};

use crate::{SinkSpec, SourceId, VideoBackend, VideoSink, VideoSource};

/// Frames buffered between the decode thread and the reader
const FRAME_BUFFER: usize = 2;

/// Initialize `FFmpeg` library (registers devices and network protocols)
fn init_ffmpeg() -> Result<()> {
    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to initialize FFmpeg: {e}")))
}

/// Backend decoding with libav* and encoding with the `ffmpeg` CLI
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg_binary: PathBuf,
    codec: String,
}

impl FfmpegBackend {
    /// Backend writing outputs with the given encoder (e.g. `libx264`, `mpeg4`)
    #[must_use]
    pub fn new(codec: impl Into<String>) -> Self {
        Self {
            ffmpeg_binary: PathBuf::from("ffmpeg"),
            codec: codec.into(),
        }
    }

    /// Use a specific `ffmpeg` executable for sinks
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.ffmpeg_binary = binary.into();
        self
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("libx264")
    }
}

impl VideoBackend for FfmpegBackend {
    fn open(&self, source: &SourceId) -> Result<Box<dyn VideoSource>> {
        init_ffmpeg()?;
        Ok(Box::new(FfmpegSource::open(source.clone())?))
    }

    fn create_sink(&self, path: &Path, spec: &SinkSpec) -> Result<Box<dyn VideoSink>> {
        Ok(Box::new(FfmpegSink::spawn(
            &self.ffmpeg_binary,
            &self.codec,
            path,
            spec.clone(),
        )?))
    }

    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        init_ffmpeg()?;
        let input = open_input(&SourceId::Path(path.to_path_buf()))?;
        let (_, info) = video_stream_info(&input)?;
        Ok(info)
    }
}

fn open_input(source: &SourceId) -> Result<ffmpeg::format::context::Input> {
    let unavailable = |e: ffmpeg::Error| ProcessingError::SourceUnavailable(format!("{source}: {e}"));
    match source {
        SourceId::Path(path) => ffmpeg::format::input(path).map_err(unavailable),
        SourceId::Uri(uri) => ffmpeg::format::input(uri).map_err(unavailable),
        SourceId::Device(index) => open_capture_device(*index),
    }
}

/// Open `/dev/video<N>` through the v4l2 input device
fn open_capture_device(index: u32) -> Result<ffmpeg::format::context::Input> {
    let device_path = format!("/dev/video{index}");
    let format = ffmpeg::device::input::video()
        .find(|format| format.name() == "v4l2")
        .ok_or_else(|| {
            ProcessingError::SourceUnavailable("v4l2 capture support not available".to_string())
        })?;

    let context = ffmpeg::format::open_with(&device_path, &format, ffmpeg::Dictionary::new())
        .map_err(|e| ProcessingError::SourceUnavailable(format!("{device_path}: {e}")))?;

    match context {
        ffmpeg::format::context::Context::Input(input) => Ok(input),
        ffmpeg::format::context::Context::Output(_) => Err(ProcessingError::SourceUnavailable(
            format!("{device_path} opened as an output"),
        )),
    }
}

fn video_decoder(
    input: &ffmpeg::format::context::Input,
    stream_index: usize,
) -> Result<ffmpeg::decoder::Video> {
    let stream = input
        .stream(stream_index)
        .ok_or(ProcessingError::NoVideoStream)?;
    ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to create context: {e}")))?
        .decoder()
        .video()
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to create decoder: {e}")))
}

/// Best video stream index plus its size, frame rate and frame count
#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn video_stream_info(input: &ffmpeg::format::context::Input) -> Result<(usize, VideoInfo)> {
    let stream = input
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or(ProcessingError::NoVideoStream)?;
    let stream_index = stream.index();

    let fps = Some(f64::from(stream.avg_frame_rate())).filter(|fps| fps.is_finite() && *fps > 0.0);

    // Container frame count first, otherwise estimate from duration (AV_TIME_BASE = 1e6)
    let frame_count = match stream.frames() {
        n if n > 0 => Some(n as u64),
        _ => {
            let duration_secs = input.duration() as f64 / 1_000_000.0;
            fps.filter(|_| duration_secs > 0.0)
                .map(|fps| (duration_secs * fps).round() as u64)
        }
    };

    let decoder = video_decoder(input, stream_index)?;

    Ok((
        stream_index,
        VideoInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            frame_count,
        },
    ))
}

/// Decoding source backed by a dedicated decode thread
pub struct FfmpegSource {
    info: VideoInfo,
    frames: Receiver<Result<RgbImage>>,
}

impl FfmpegSource {
    /// Open a source and wait until its stream parameters are known
    pub fn open(source: SourceId) -> Result<Self> {
        let (setup_tx, setup_rx) = bounded::<Result<VideoInfo>>(1);
        let (frame_tx, frame_rx) = bounded::<Result<RgbImage>>(FRAME_BUFFER);

        let label = source.to_string();
        std::thread::Builder::new()
            .name("ffmpeg-decode".to_string())
            .spawn(move || match DecodeSession::open(&source) {
                Ok(session) => {
                    if setup_tx.send(Ok(session.info)).is_ok() {
                        session.run(&frame_tx);
                    }
                }
                Err(e) => {
                    let _ = setup_tx.send(Err(e));
                }
            })?;

        let info = setup_rx.recv().map_err(|_| {
            ProcessingError::SourceUnavailable(format!("{label}: decode thread exited"))
        })??;

        info!(
            source = %label,
            width = info.width,
            height = info.height,
            fps = ?info.fps,
            "Opened video source"
        );

        Ok(Self {
            info,
            frames: frame_rx,
        })
    }
}

impl VideoSource for FfmpegSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        match self.frames.recv() {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(e)) => Err(e),
            // Decode thread finished: end of stream
            Err(_) => Ok(None),
        }
    }
}

/// libav* state owned by the decode thread
struct DecodeSession {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    info: VideoInfo,
}

impl DecodeSession {
    fn open(source: &SourceId) -> Result<Self> {
        let input = open_input(source)?;
        let (stream_index, info) = video_stream_info(&input)?;
        let decoder = video_decoder(&input, stream_index)?;

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to create scaler: {e}")))?;

        Ok(Self {
            input,
            decoder,
            scaler,
            stream_index,
            info,
        })
    }

    /// Decode until end of input or until the reader goes away
    fn run(mut self, frames: &Sender<Result<RgbImage>>) {
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        let mut converted = ffmpeg::util::frame::video::Video::empty();

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            if let Err(e) = self.decoder.send_packet(&packet) {
                debug!("Skipping undecodable packet: {e}");
                continue;
            }
            if !drain_decoder(
                &mut self.decoder,
                &mut self.scaler,
                &mut decoded,
                &mut converted,
                frames,
            ) {
                debug!("Reader dropped, stopping decode");
                return;
            }
        }

        // Flush decoder
        self.decoder.send_eof().ok();
        drain_decoder(
            &mut self.decoder,
            &mut self.scaler,
            &mut decoded,
            &mut converted,
            frames,
        );
    }
}

/// Forward every ready frame; false once the reader has disconnected
fn drain_decoder(
    decoder: &mut ffmpeg::decoder::Video,
    scaler: &mut ffmpeg::software::scaling::Context,
    decoded: &mut ffmpeg::util::frame::video::Video,
    converted: &mut ffmpeg::util::frame::video::Video,
    frames: &Sender<Result<RgbImage>>,
) -> bool {
    while decoder.receive_frame(decoded).is_ok() {
        let frame = scaler
            .run(decoded, converted)
            .map_err(|e| ProcessingError::FFmpegError(format!("Failed to convert frame: {e}")))
            .and_then(|()| rgb_image(converted));
        if frames.send(frame).is_err() {
            return false;
        }
    }
    true
}

/// Copy a packed RGB24 frame (row stride may exceed width * 3) into an image
fn rgb_image(frame: &ffmpeg::util::frame::video::Video) -> Result<RgbImage> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let plane_data = frame.data(0);

    let mut data = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row_start = y * stride;
        let row_end = row_start + width * 3;
        data.extend_from_slice(&plane_data[row_start..row_end]);
    }

    RgbImage::from_raw(frame.width(), frame.height(), data)
        .ok_or_else(|| ProcessingError::ImageError("RGB frame buffer size mismatch".to_string()))
}

/// Output container written by an `ffmpeg` child process
pub struct FfmpegSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    /// Collects the child's stderr so a chatty encoder never blocks on a full pipe
    stderr: Option<JoinHandle<String>>,
    spec: SinkSpec,
    path: PathBuf,
}

impl FfmpegSink {
    fn spawn(binary: &Path, codec: &str, path: &Path, spec: SinkSpec) -> Result<Self> {
        let mut cmd = Command::new(binary);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{}x{}", spec.width, spec.height))
            .arg("-r")
            .arg(format!("{}", spec.fps))
            .args(["-i", "-", "-an"])
            // yuv420p needs even dimensions
            .args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"])
            .args(["-c:v", codec, "-pix_fmt", "yuv420p"]);
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
        {
            cmd.args(["-movflags", "+faststart"]);
        }
        cmd.arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!("Spawning video writer: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            ProcessingError::Sink(format!("failed to start {}: {e}", binary.display()))
        })?;
        let stdin = child.stdin.take();
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut log = String::new();
                if let Err(e) = pipe.read_to_string(&mut log) {
                    debug!("Stopped reading ffmpeg stderr: {e}");
                }
                log
            })
        });

        info!(
            output = %path.display(),
            width = spec.width,
            height = spec.height,
            fps = spec.fps,
            codec,
            "Opened video sink"
        );

        Ok(Self {
            child: Some(child),
            stdin,
            stderr,
            spec,
            path: path.to_path_buf(),
        })
    }
}

impl VideoSink for FfmpegSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ProcessingError::Sink("sink already finished".to_string()))?;

        let resized;
        let frame = if frame.dimensions() == (self.spec.width, self.spec.height) {
            frame
        } else {
            resized = image::imageops::resize(
                frame,
                self.spec.width,
                self.spec.height,
                image::imageops::FilterType::Triangle,
            );
            &resized
        };

        stdin
            .write_all(frame.as_raw())
            .map_err(|e| ProcessingError::Sink(format!("{}: {e}", self.path.display())))
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        // Closing stdin signals end of input to ffmpeg
        drop(self.stdin.take());

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        let log = self
            .stderr
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        if status.success() {
            info!(output = %self.path.display(), "Video sink finished");
            Ok(())
        } else {
            Err(ProcessingError::Sink(format!(
                "ffmpeg exited with {status}: {}",
                log.trim()
            )))
        }
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            warn!(output = %self.path.display(), "Video sink dropped before finish, stopping ffmpeg");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
