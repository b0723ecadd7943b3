//! Shared config and HTTP status API for the Mooring agent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::{Router, response::Json, routing::get};
use mooring_recovery::{RecoveryEngine, RecoveryStats};
use mooring_sync::{HttpRemoteConfig, PassReport, Reconciler, SyncConfig, SyncError};
use mooring_types::PendingAction;
use serde::{Deserialize, Serialize};

/// On-disk agent configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// SQLite database holding the cache and the pending-action queue.
    pub db_path: Option<PathBuf>,
    pub remote: HttpRemoteConfig,
    pub sync: SyncConfig,
}

impl AgentConfig {
    /// Reads a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Overlays command-line values on top of the file values.
    pub fn overlay(
        mut self,
        db_path: Option<PathBuf>,
        remote_url: Option<String>,
        api_key: Option<String>,
    ) -> Self {
        if db_path.is_some() {
            self.db_path = db_path;
        }
        if let Some(url) = remote_url {
            self.remote.base_url = url;
        }
        if api_key.is_some() {
            self.remote.api_key = api_key;
        }
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("mooring.db"))
    }
}

/// State shared by the API handlers.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub recovery: Option<RecoveryEngine>,
}

#[derive(Serialize, Debug, Clone)]
pub struct StatusResponse {
    pub online: bool,
    pub syncing: bool,
    pub pending: usize,
    pub dead_letters: usize,
    pub last_pass: Option<PassReport>,
    pub recovery: Option<RecoveryStats>,
}

#[derive(Deserialize, Debug, Default)]
pub struct CollectionFilter {
    pub collection: Option<String>,
}

type ApiError = (StatusCode, String);

fn internal(e: SyncError) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn status_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let queue = state.reconciler.queue();
    let pending = queue.pending_count(None).await.map_err(internal)?;
    let dead_letters = queue.dead_letters(None).await.map_err(internal)?.len();

    Ok(Json(StatusResponse {
        online: state.reconciler.monitor().is_online(),
        syncing: state.reconciler.is_syncing(),
        pending,
        dead_letters,
        last_pass: state.reconciler.last_pass(),
        recovery: state.recovery.as_ref().map(RecoveryEngine::stats),
    }))
}

async fn dead_letters_handler(
    State(state): State<AppState>,
    Query(filter): Query<CollectionFilter>,
) -> Result<Json<Vec<PendingAction>>, ApiError> {
    let letters = state
        .reconciler
        .queue()
        .dead_letters(filter.collection.as_deref())
        .await
        .map_err(internal)?;
    Ok(Json(letters))
}

/// Build the HTTP API router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/dead-letters", get(dead_letters_handler))
        .with_state(state)
}
