//! Alert state store
//!
//! Holds the most recent high-confidence detection. Annotators write it,
//! the polling endpoint reads it, both through the same lock.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How long a high-confidence event counts as "recent"
pub const RECENT_WINDOW: Duration = Duration::from_secs(2);

/// Last recorded high-confidence event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertRecord {
    pub last_high_confidence_time: SystemTime,
    pub last_high_confidence_score: f32,
}

impl Default for AlertRecord {
    fn default() -> Self {
        Self {
            last_high_confidence_time: UNIX_EPOCH,
            last_high_confidence_score: 0.0,
        }
    }
}

/// Result of a poll
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlertStatus {
    pub is_recent: bool,
    /// Only present while the event is recent
    pub score: Option<f32>,
}

/// Shared last-writer-wins alert record
#[derive(Debug, Default)]
pub struct AlertState {
    record: Mutex<AlertRecord>,
}

impl AlertState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a high-confidence detection now
    pub fn record_high_confidence(&self, score: f32) {
        self.record_high_confidence_at(score, SystemTime::now());
    }

    /// Record a high-confidence detection at `time`, replacing any previous record
    pub fn record_high_confidence_at(&self, score: f32, time: SystemTime) {
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        *record = AlertRecord {
            last_high_confidence_time: time,
            last_high_confidence_score: score,
        };
    }

    /// Poll against the current time
    #[must_use]
    pub fn query(&self) -> AlertStatus {
        self.query_at(SystemTime::now())
    }

    /// Poll against `now`; the window is evaluated on every call
    #[must_use]
    pub fn query_at(&self, now: SystemTime) -> AlertStatus {
        let record = *self.record.lock().unwrap_or_else(PoisonError::into_inner);

        // A record stamped after `now` (clock skew between threads) is recent
        let is_recent = match now.duration_since(record.last_high_confidence_time) {
            Ok(elapsed) => elapsed < RECENT_WINDOW,
            Err(_) => true,
        };

        AlertStatus {
            is_recent,
            score: is_recent.then_some(record.last_high_confidence_score),
        }
    }

    /// Copy of the stored record, regardless of age
    #[must_use]
    pub fn snapshot(&self) -> AlertRecord {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
