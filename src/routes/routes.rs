//! Defines routes for the chunked upload API.
//!
//! ## Structure
//! - **Session lifecycle**
//!   - `POST   /uploads` — initiate an upload session
//!   - `POST   /uploads/{id}/parts/{part}` — presign one part upload
//!   - `POST   /uploads/{id}/parts/{part}/complete` — confirm a part
//!   - `DELETE /uploads/{id}` — abort a session
//!
//! - **Local storage emulation**
//!   - `PUT /parts/{*key}` — signed target that local presigned URLs hit
//!   - `GET /files/{*key}` — stream a finalized local object
//!
//! - **Operations**
//!   - `POST /internal/cleanup` — reclaim expired sessions (shared secret)
//!
//! The wildcard `*key` allows nested keys like `owner/session/file.bin`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        part_handlers::{get_object, put_part},
        upload_handlers::{abort_upload, confirm_part, initiate_upload, presign_part, run_cleanup},
    },
    services::AppState,
};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Build and return the router for all upload-service routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Session lifecycle
        .route("/uploads", post(initiate_upload))
        .route("/uploads/{id}", delete(abort_upload))
        .route("/uploads/{id}/parts/{part}", post(presign_part))
        .route("/uploads/{id}/parts/{part}/complete", post(confirm_part))
        // Local storage emulation targets
        .route("/parts/{*key}", put(put_part))
        .route("/files/{*key}", get(get_object))
        // Periodic maintenance trigger
        .route("/internal/cleanup", post(run_cleanup))
}
