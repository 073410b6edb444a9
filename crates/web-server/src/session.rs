//! Per-browser processing sessions, keyed by a cookie

use axum::http::{header, HeaderMap};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "fire_session";

/// Upload waiting to be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingSession {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub output_filename: String,
    pub original_filename: String,
}

/// Session id from the request's `Cookie` headers
#[must_use]
pub fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

/// `Set-Cookie` value for a session id
#[must_use]
pub fn session_cookie(id: &str) -> String {
    format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax")
}

/// In-memory session table
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, ProcessingSession>>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `session` under the request's id, or a new one; returns the id used
    pub async fn insert(&self, existing_id: Option<String>, session: ProcessingSession) -> String {
        let id = existing_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        self.sessions.write().await.insert(id.clone(), session);
        id
    }

    pub async fn get(&self, id: &str) -> Option<ProcessingSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove and return a session
    pub async fn take(&self, id: &str) -> Option<ProcessingSession> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
