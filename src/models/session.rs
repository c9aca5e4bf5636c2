//! Represents chunked upload sessions and their parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Which storage backend holds the object for a session.
///
/// Chosen at session creation by the size-threshold policy and immutable
/// afterwards.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Remote,
}

/// Lifecycle state of an upload session.
///
/// `Active` is the only non-terminal state; no transition ever leaves
/// `Completed`, `Aborted` or `Expired`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Aborted,
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

/// State of a single part within a session.
///
/// `UrlIssued` only records that a presigned URL was handed out; the part
/// counts toward completion only once a client confirms it `Uploaded`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PartState {
    Pending,
    UrlIssued,
    Uploaded,
}

/// A chunked upload session, initiated before uploading a large file in
/// parts.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadSession {
    /// Session identifier (returned to the client).
    pub id: Uuid,

    /// User that initiated the upload.
    pub owner_id: Uuid,

    /// Original filename as supplied at initiation.
    pub file_name: String,

    /// Declared size of the whole file, in bytes.
    pub file_size: i64,

    /// Backend chosen for this session.
    pub storage_kind: StorageKind,

    /// Destination key within the backend.
    pub object_key: String,

    /// Number of parts the file was split into.
    pub total_parts: i64,

    /// Target size of each part (the last part may be smaller).
    pub part_size: i64,

    /// Lifecycle state.
    pub status: SessionStatus,

    /// Optimistic-concurrency counter, bumped when the finalize ticket is
    /// taken.
    pub version: i64,

    /// Backend location of the assembled object, set at completion.
    pub object_location: Option<String>,

    /// Timestamp when the session was created.
    pub created_at: DateTime<Utc>,

    /// Hard deadline after which the session is reclaimable. Never
    /// extended.
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A single part row belonging to an upload session.
///
/// Rows for parts `1..=total_parts` are created together with the session,
/// so the set of part numbers never has gaps.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadPart {
    /// Parent session.
    pub session_id: Uuid,

    /// Part number (1-based).
    pub part_number: i64,

    /// Progress state of this part.
    pub state: PartState,

    /// Checksum reported by the backend once the part landed, if any.
    pub etag: Option<String>,

    /// Timestamp of the last state change.
    pub updated_at: DateTime<Utc>,
}
