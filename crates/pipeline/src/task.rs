//! Supervised background writer
//!
//! The disk writer runs on its own OS thread. The returned [`WriterHandle`]
//! can be polled, cancelled or joined; dropping it leaves the thread running.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{error, info};

use fire_watch_common::Result;
use fire_watch_video::VideoBackend;

use crate::annotator::FrameAnnotator;
use crate::producer::{write_video, WriteSummary, WriterSettings};

/// Lifecycle of a background write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterState {
    Running,
    Completed(WriteSummary),
    Failed(String),
    Cancelled,
}

impl WriterState {
    /// Lower-case name used in status responses
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            WriterState::Running => "running",
            WriterState::Completed(_) => "completed",
            WriterState::Failed(_) => "failed",
            WriterState::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, WriterState::Running)
    }
}

/// Handle to a writer thread
pub struct WriterHandle {
    state: Arc<Mutex<WriterState>>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    output: PathBuf,
}

impl WriterHandle {
    /// Current state
    pub fn state(&self) -> WriterState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_finished(&self) -> bool {
        !self.state().is_running()
    }

    /// Ask the writer to stop after the current frame
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Wait for the thread and return its final state
    pub fn join(mut self) -> WriterState {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                *state = WriterState::Failed("writer thread panicked".to_string());
            }
        }
        self.state()
    }
}

/// Start writing an annotated copy of `input` to `output` on a new thread
pub fn spawn_background_writer(
    backend: Arc<dyn VideoBackend>,
    input: PathBuf,
    output: PathBuf,
    annotator: Arc<FrameAnnotator>,
    settings: WriterSettings,
) -> Result<WriterHandle> {
    let state = Arc::new(Mutex::new(WriterState::Running));
    let cancel = Arc::new(AtomicBool::new(false));

    let thread = {
        let state = state.clone();
        let cancel = cancel.clone();
        let output = output.clone();
        thread::Builder::new()
            .name("fire-watch-writer".to_string())
            .spawn(move || {
                let result = write_video(
                    backend.as_ref(),
                    &input,
                    &output,
                    &annotator,
                    &settings,
                    &cancel,
                );
                let final_state = match result {
                    Ok(summary) if summary.cancelled => WriterState::Cancelled,
                    Ok(summary) => {
                        info!(
                            "Background writer completed {} ({} frames)",
                            output.display(),
                            summary.frames_written
                        );
                        WriterState::Completed(summary)
                    }
                    Err(e) => {
                        error!("Background writer for {} failed: {e}", input.display());
                        WriterState::Failed(e.to_string())
                    }
                };
                *state.lock().unwrap_or_else(PoisonError::into_inner) = final_state;
            })?
    };

    Ok(WriterHandle {
        state,
        cancel,
        thread: Some(thread),
        output,
    })
}
