//! HTTP handlers for the upload session lifecycle.
//!
//! Identity arrives as a trusted `x-user-id` header placed by the external
//! auth layer; these handlers only translate between HTTP and the
//! `UploadManager`, which owns all lifecycle rules.

use crate::{
    errors::AppError,
    models::session::StorageKind,
    services::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const USER_ID_HEADER: &str = "x-user-id";
const CLEANUP_TOKEN_HEADER: &str = "x-cleanup-token";

/// Extract the authenticated user from the header the auth layer sets.
fn require_identity(headers: &HeaderMap) -> Result<Uuid, AppError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .ok_or_else(|| AppError::unauthorized("missing or invalid x-user-id header"))
}

/// Request body for `POST /uploads`.
#[derive(Debug, Deserialize)]
pub struct InitiateUploadReq {
    pub file_name: String,
    pub file_size: i64,
}

#[derive(Debug, Serialize)]
pub struct InitiateUploadResp {
    pub id: Uuid,
    pub total_parts: i64,
    pub part_size: i64,
    pub storage_kind: StorageKind,
    pub expires_at: DateTime<Utc>,
}

/// POST `/uploads` — start a chunked upload session.
pub async fn initiate_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InitiateUploadReq>,
) -> Result<impl IntoResponse, AppError> {
    let owner = require_identity(&headers)?;
    let session = state
        .manager
        .create_session(owner, req.file_size, &req.file_name)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitiateUploadResp {
            id: session.id,
            total_parts: session.total_parts,
            part_size: session.part_size,
            storage_kind: session.storage_kind,
            expires_at: session.expires_at,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct PresignPartResp {
    pub part_number: i64,
    pub storage_kind: StorageKind,
    pub url: String,
    pub url_expires_at: DateTime<Utc>,
}

/// POST `/uploads/{id}/parts/{part}` — presign one part upload.
pub async fn presign_part(
    State(state): State<AppState>,
    Path((id, part_number)): Path<(Uuid, i64)>,
    headers: HeaderMap,
) -> Result<Json<PresignPartResp>, AppError> {
    let requester = require_identity(&headers)?;
    let grant = state.manager.presign_part(id, part_number, requester).await?;

    Ok(Json(PresignPartResp {
        part_number: grant.part_number,
        storage_kind: grant.storage_kind,
        url: grant.url,
        url_expires_at: grant.url_expires_at,
    }))
}

/// Optional request body for part confirmation; clients that captured the
/// `ETag` from their part upload echo it here.
#[derive(Debug, Default, Deserialize)]
pub struct ConfirmPartReq {
    pub etag: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmPartResp {
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_location: Option<String>,
}

/// POST `/uploads/{id}/parts/{part}/complete` — confirm a part landed.
pub async fn confirm_part(
    State(state): State<AppState>,
    Path((id, part_number)): Path<(Uuid, i64)>,
    headers: HeaderMap,
    body: Option<Json<ConfirmPartReq>>,
) -> Result<Json<ConfirmPartResp>, AppError> {
    let requester = require_identity(&headers)?;
    let etag = body.and_then(|Json(req)| req.etag);
    let outcome = state
        .manager
        .confirm_part(id, part_number, requester, etag.as_deref())
        .await?;

    Ok(Json(ConfirmPartResp {
        completed: outcome.completed,
        object_location: outcome.object_location,
    }))
}

/// DELETE `/uploads/{id}` — abort a session; repeat calls are no-ops.
pub async fn abort_upload(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let requester = require_identity(&headers)?;
    state.manager.abort_session(id, requester).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/internal/cleanup` — reclaim expired sessions. Invoked on a
/// cadence by an external scheduler carrying the shared secret.
pub async fn run_cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let presented = headers
        .get(CLEANUP_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("missing x-cleanup-token header"))?;
    if presented != state.cleanup_token {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "invalid cleanup token",
        ));
    }

    let report = state.manager.reclaim_expired(Utc::now()).await?;
    Ok(Json(report))
}
