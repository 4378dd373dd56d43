//! # HTTP API
//!
//! - `GET  /ws/project/:project_id` - run a project, streaming its events
//! - `GET  /api/keys`, `POST /api/keys` - credential store
//! - `GET  /health`

pub mod keys;
pub mod project;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Parent of every per-run workspace
    pub workspace_root: PathBuf,
    /// Directory holding the credential file
    pub config_dir: PathBuf,
    /// Serializes read-modify-write of the credential file
    pub keys_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf, config_dir: PathBuf) -> Self {
        Self {
            workspace_root,
            config_dir,
            keys_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/project/:project_id", get(project::project_websocket))
        .nest("/api", keys::keys_routes())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
