//! Storage backend abstraction.
//!
//! One implementation per [`StorageKind`] variant: `local` emulates object
//! storage on disk and points presigned URLs back at this service's signed
//! part endpoint; `remote` targets an S3-style HTTP object gateway. The
//! adapter holds no session state; it only knows backend credentials and
//! layout.

pub mod local;
pub mod remote;
pub mod sign;

use crate::models::session::StorageKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, io, sync::Arc};
use thiserror::Error;

/// Largest part number any backend accepts (S3 limit).
pub const MAX_PART_NUMBER: i64 = 10_000;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("part number {0} outside the supported range")]
    InvalidPart(i64),
    #[error("backend reports {committed} of {expected} parts committed")]
    IncompleteParts { expected: i64, committed: i64 },
    #[error("object `{0}` already exists")]
    FinalizeConflict(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A time-limited URL granting write access to exactly one part.
#[derive(Debug, Clone)]
pub struct PresignedPart {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Uniform capability of a storage backend: hand out per-part upload URLs,
/// assemble committed parts into one object, and release leftovers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Generate a presigned URL for uploading one part of `object_key`.
    ///
    /// The URL is valid for the backend's configured presign TTL, which is
    /// much shorter than a session TTL.
    async fn presign_part(&self, object_key: &str, part_number: i64)
    -> BackendResult<PresignedPart>;

    /// Assemble `part_count` committed parts into the final object and
    /// return its location.
    ///
    /// Fails with `IncompleteParts` when fewer parts landed than expected
    /// and `FinalizeConflict` when the object already exists.
    async fn finalize(&self, object_key: &str, part_count: i64) -> BackendResult<String>;

    /// Best-effort release of uncommitted part data. Backend failures are
    /// logged and swallowed; cleanup is advisory.
    async fn abort(&self, object_key: &str);
}

/// Lookup table from [`StorageKind`] to its backend implementation.
#[derive(Clone)]
pub struct BackendSet {
    backends: HashMap<StorageKind, Arc<dyn StorageBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    pub fn with(mut self, kind: StorageKind, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    /// Resolve the backend for a session's storage kind.
    pub fn get(&self, kind: StorageKind) -> BackendResult<&dyn StorageBackend> {
        self.backends
            .get(&kind)
            .map(|b| b.as_ref())
            .ok_or_else(|| BackendError::Unavailable(format!("no backend for {:?}", kind)))
    }

    /// Kinds this deployment can serve, used by the storage policy.
    pub fn supports(&self, kind: StorageKind) -> bool {
        self.backends.contains_key(&kind)
    }
}

impl Default for BackendSet {
    fn default() -> Self {
        Self::new()
    }
}
