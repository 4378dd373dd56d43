//! # Keys API
//!
//! Provider keys live in the credential store and are merged into every
//! run's agent environment.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use swarm_core::state::{ApiKeyUpdate, CredentialStore};

use super::AppState;

pub fn keys_routes() -> Router<AppState> {
    Router::new().route("/keys", get(get_keys).post(set_keys))
}

/// Stored keys, masked
async fn get_keys(State(state): State<AppState>) -> Json<BTreeMap<String, String>> {
    let store = CredentialStore::load_from_dir(&state.config_dir).await;
    Json(store.masked())
}

async fn set_keys(
    State(state): State<AppState>,
    Json(update): Json<ApiKeyUpdate>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let _guard = state.keys_lock.lock().await;

    let mut store = CredentialStore::load_from_dir(&state.config_dir).await;
    store.merge_keys(&update);
    store.save().await.map_err(|e| {
        tracing::error!(error = %e, "failed to save API keys");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": format!("{:#}", e) })),
        )
    })?;

    tracing::info!(
        keys = store.keys().len(),
        path = %store.path().display(),
        "API keys updated"
    );
    Ok(Json(json!({ "message": "API keys updated successfully" })))
}
