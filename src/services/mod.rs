//! Service layer: session persistence and the upload lifecycle manager.

pub mod session_store;
pub mod upload_manager;

use crate::storage::local::LocalBackend;
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};
use upload_manager::UploadManager;

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: UploadManager,
    /// Direct handle to the local backend for the signed part-PUT and
    /// object-GET endpoints.
    pub local: Arc<LocalBackend>,
    pub db: Arc<SqlitePool>,
    /// Root of the local object store, probed by the readiness check.
    pub storage_dir: PathBuf,
    /// Shared secret expected by the cleanup trigger.
    pub cleanup_token: String,
}
