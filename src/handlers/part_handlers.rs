//! Handlers backing the local storage emulation: the signed part-PUT
//! target that presigned local URLs point at, and a streaming GET for
//! finalized local objects. Streams bodies to avoid buffering whole parts
//! in memory.

use crate::{errors::AppError, services::AppState};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;

/// Query string carried by a local presigned part URL.
#[derive(Debug, Deserialize)]
pub struct PartTokenQuery {
    pub part: i64,
    pub expires: i64,
    pub sig: String,
}

/// PUT `/parts/{*key}?part=&expires=&sig=` — accept one part's bytes.
///
/// The signature covers key, part number and expiry; anything stale or
/// tampered is rejected before a byte is read.
pub async fn put_part(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(token): Query<PartTokenQuery>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    state
        .local
        .verify_part_token(&key, token.part, token.expires, &token.sig)
        .map_err(|err| AppError::new(StatusCode::FORBIDDEN, err.to_string()))?;

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));
    let (size_bytes, etag) = state.local.put_part(&key, token.part, stream).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&size_bytes.to_string()) {
        response
            .headers_mut()
            .insert("x-part-size", value);
    }
    Ok(response)
}

/// GET `/files/{*key}` — stream a finalized local object.
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let (len, file) = state.local.object_reader(&key).await.map_err(|err| {
        if let crate::storage::BackendError::Io(io_err) = &err {
            if io_err.kind() == io::ErrorKind::NotFound {
                return AppError::not_found(format!("object `{}` not found", key));
            }
        }
        AppError::from(err)
    })?;

    let stream = ReaderStream::new(file);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    Ok(response)
}
