//! Upload session lifecycle orchestration.
//!
//! The manager owns every state transition; the session store only
//! persists. It holds no in-memory session cache: each operation re-reads
//! current state and mutates through conditional writes, so many handler
//! instances (or processes) can drive the same session safely. The manager
//! never retries backend failures itself; retrying is the caller's call.

use crate::{
    config::AppConfig,
    models::session::{SessionStatus, StorageKind, UploadSession},
    services::session_store::SessionStore,
    storage::{BackendError, BackendResult, BackendSet, MAX_PART_NUMBER},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::{future::Future, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How many expired sessions one cleanup page fetches.
const CLEANUP_PAGE_SIZE: i64 = 100;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("file of {size} bytes exceeds the {limit}-byte limit")]
    QuotaExceeded { size: i64, limit: i64 },
    #[error("upload session `{0}` not found")]
    SessionNotFound(Uuid),
    #[error("upload session `{0}` has expired")]
    SessionExpired(Uuid),
    #[error("upload session `{id}` is no longer active ({status:?})")]
    SessionNotActive { id: Uuid, status: SessionStatus },
    #[error("requester does not own this upload session")]
    Forbidden,
    #[error("part {part} outside 1..={total}")]
    InvalidPart { part: i64, total: i64 },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Sizing and placement policy for new sessions. Kept as plain data so a
/// tier- or content-aware policy can replace the thresholds without
/// touching the state machine.
#[derive(Clone, Debug)]
pub struct UploadPolicy {
    pub part_size: i64,
    pub max_file_size: i64,
    pub remote_threshold: i64,
    pub session_ttl: ChronoDuration,
    pub backend_timeout: Duration,
}

impl UploadPolicy {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            part_size: cfg.part_size,
            max_file_size: cfg.max_file_size,
            remote_threshold: cfg.remote_threshold,
            session_ttl: ChronoDuration::hours(cfg.session_ttl_hours),
            backend_timeout: cfg.backend_timeout(),
        }
    }
}

/// Number of parts a file of `file_size` splits into at `part_size`.
pub fn plan_parts(part_size: i64, file_size: i64) -> i64 {
    (file_size + part_size - 1) / part_size
}

/// A presigned upload URL for one part, echoing what the client needs to
/// pick the right upload protocol.
#[derive(Debug, Clone)]
pub struct PartGrant {
    pub part_number: i64,
    pub storage_kind: StorageKind,
    pub url: String,
    pub url_expires_at: DateTime<Utc>,
}

/// Result of a part confirmation. `completed` flips on the call that
/// observed the session reach its terminal completed state.
#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    pub completed: bool,
    pub object_location: Option<String>,
}

/// Tally of one cleanup sweep. Failures are counted, never propagated.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct ReclaimReport {
    pub reclaimed: u64,
    pub failed: u64,
}

#[derive(Clone)]
pub struct UploadManager {
    store: SessionStore,
    backends: BackendSet,
    policy: UploadPolicy,
}

impl UploadManager {
    pub fn new(store: SessionStore, backends: BackendSet, policy: UploadPolicy) -> Self {
        Self {
            store,
            backends,
            policy,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Pick a backend for a new session: large files go remote when a
    /// remote backend is configured, everything else stays local.
    fn storage_kind_for(&self, file_size: i64) -> StorageKind {
        if file_size >= self.policy.remote_threshold && self.backends.supports(StorageKind::Remote)
        {
            StorageKind::Remote
        } else {
            StorageKind::Local
        }
    }

    /// Run a backend call under the configured timeout; a call that hangs
    /// surfaces as unavailability instead of stalling the request.
    async fn with_timeout<T, F>(&self, fut: F) -> UploadResult<T>
    where
        F: Future<Output = BackendResult<T>>,
    {
        match tokio::time::timeout(self.policy.backend_timeout, fut).await {
            Ok(result) => result.map_err(UploadError::Backend),
            Err(_) => Err(UploadError::Backend(BackendError::Unavailable(
                "backend call timed out".into(),
            ))),
        }
    }

    /// Create a session: plan the part split, pick a backend, persist the
    /// record plus its pending part rows.
    pub async fn create_session(
        &self,
        owner_id: Uuid,
        file_size: i64,
        file_name: &str,
    ) -> UploadResult<UploadSession> {
        if file_size <= 0 {
            return Err(UploadError::InvalidInput(
                "file size must be positive".into(),
            ));
        }
        if file_size > self.policy.max_file_size {
            return Err(UploadError::QuotaExceeded {
                size: file_size,
                limit: self.policy.max_file_size,
            });
        }
        let file_name = sanitize_file_name(file_name)
            .ok_or_else(|| UploadError::InvalidInput("invalid file name".into()))?;

        let total_parts = plan_parts(self.policy.part_size, file_size);
        if total_parts > MAX_PART_NUMBER {
            return Err(UploadError::InvalidInput(format!(
                "file would need {} parts, more than the {} supported",
                total_parts, MAX_PART_NUMBER
            )));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let session = UploadSession {
            id,
            owner_id,
            file_name: file_name.clone(),
            file_size,
            storage_kind: self.storage_kind_for(file_size),
            object_key: format!("{}/{}/{}", owner_id, id, file_name),
            total_parts,
            part_size: self.policy.part_size,
            status: SessionStatus::Active,
            version: 0,
            object_location: None,
            created_at: now,
            expires_at: now + self.policy.session_ttl,
        };
        self.store.create(&session).await?;

        info!(
            session = %session.id,
            owner = %owner_id,
            file_size,
            total_parts,
            storage_kind = ?session.storage_kind,
            "created upload session"
        );
        Ok(session)
    }

    /// Load a session and run the checks shared by every per-session
    /// operation: existence, ownership, liveness.
    async fn load_active(
        &self,
        id: Uuid,
        requester_id: Uuid,
        now: DateTime<Utc>,
    ) -> UploadResult<UploadSession> {
        let session = self
            .store
            .get(id)
            .await?
            .ok_or(UploadError::SessionNotFound(id))?;
        if session.owner_id != requester_id {
            return Err(UploadError::Forbidden);
        }
        match session.status {
            SessionStatus::Active if session.is_expired(now) => {
                Err(UploadError::SessionExpired(id))
            }
            SessionStatus::Active => Ok(session),
            SessionStatus::Expired => Err(UploadError::SessionExpired(id)),
            status => Err(UploadError::SessionNotActive { id, status }),
        }
    }

    /// Issue a presigned URL for one part. Marks the part `url_issued`;
    /// issuance alone never counts toward completion.
    pub async fn presign_part(
        &self,
        id: Uuid,
        part_number: i64,
        requester_id: Uuid,
    ) -> UploadResult<PartGrant> {
        let now = Utc::now();
        let session = self.load_active(id, requester_id, now).await?;
        if part_number < 1 || part_number > session.total_parts {
            return Err(UploadError::InvalidPart {
                part: part_number,
                total: session.total_parts,
            });
        }

        let backend = self.backends.get(session.storage_kind)?;
        let presigned = self
            .with_timeout(backend.presign_part(&session.object_key, part_number))
            .await?;
        self.store.mark_part_issued(id, part_number, now).await?;

        debug!(session = %id, part_number, "presigned part upload");
        Ok(PartGrant {
            part_number,
            storage_kind: session.storage_kind,
            url: presigned.url,
            url_expires_at: presigned.expires_at,
        })
    }

    /// Confirm a part landed, recording the etag the client got back from
    /// its part upload when it reports one. The confirmation that
    /// satisfies the all-parts-uploaded predicate takes the finalize
    /// ticket and drives assembly; racing confirmations observe the
    /// outcome instead.
    pub async fn confirm_part(
        &self,
        id: Uuid,
        part_number: i64,
        requester_id: Uuid,
        etag: Option<&str>,
    ) -> UploadResult<ConfirmOutcome> {
        let now = Utc::now();
        let session = match self.load_active(id, requester_id, now).await {
            Ok(session) => session,
            // Confirming into an already-completed session is an idempotent
            // success: someone (possibly this client's earlier retry) got
            // the upload over the line.
            Err(UploadError::SessionNotActive { id, .. }) => {
                if let Some(existing) = self.store.get(id).await? {
                    if existing.status == SessionStatus::Completed {
                        return Ok(ConfirmOutcome {
                            completed: true,
                            object_location: existing.object_location,
                        });
                    }
                    return Err(UploadError::SessionNotActive {
                        id,
                        status: existing.status,
                    });
                }
                return Err(UploadError::SessionNotFound(id));
            }
            Err(err) => return Err(err),
        };
        if part_number < 1 || part_number > session.total_parts {
            return Err(UploadError::InvalidPart {
                part: part_number,
                total: session.total_parts,
            });
        }

        self.store
            .mark_part_uploaded(id, part_number, etag, now)
            .await?;
        let uploaded = self.store.count_uploaded(id).await?;
        if uploaded < session.total_parts {
            return Ok(ConfirmOutcome {
                completed: false,
                object_location: None,
            });
        }

        // All parts confirmed: exactly one caller may drive finalize.
        if !self.store.take_finalize_ticket(id, session.version).await? {
            let current = self
                .store
                .get(id)
                .await?
                .ok_or(UploadError::SessionNotFound(id))?;
            return Ok(ConfirmOutcome {
                completed: current.status == SessionStatus::Completed,
                object_location: current.object_location,
            });
        }

        let backend = self.backends.get(session.storage_kind)?;
        let location = match self
            .with_timeout(backend.finalize(&session.object_key, session.total_parts))
            .await
        {
            Ok(location) => location,
            Err(err) => {
                // Session stays active; the client re-drives confirmation
                // or finalize at its own pace.
                warn!(session = %id, "finalize failed: {}", err);
                return Err(err);
            }
        };

        if self.store.set_completed(id, &location).await? {
            info!(session = %id, location = %location, "upload session completed");
            Ok(ConfirmOutcome {
                completed: true,
                object_location: Some(location),
            })
        } else {
            // An abort landed between finalize and our transition; the
            // terminal state someone else chose stands.
            warn!(session = %id, "session left active state during finalize");
            Ok(ConfirmOutcome {
                completed: false,
                object_location: None,
            })
        }
    }

    /// Abort a session: terminal-transition it, release backend leftovers
    /// best-effort, drop the record. Idempotent throughout — an unknown or
    /// already-terminal session is a no-op success.
    pub async fn abort_session(&self, id: Uuid, requester_id: Uuid) -> UploadResult<()> {
        let Some(session) = self.store.get(id).await? else {
            return Ok(());
        };
        if session.owner_id != requester_id {
            return Err(UploadError::Forbidden);
        }
        if session.status.is_terminal() {
            return Ok(());
        }

        if !self.store.set_status(id, SessionStatus::Aborted).await? {
            return Ok(());
        }
        self.abort_backend(&session).await;
        self.store.delete(id).await?;
        info!(session = %id, "aborted upload session");
        Ok(())
    }

    /// Sweep sessions past their deadline. Per-session failures are logged
    /// and counted, never propagated; every mutation is conditioned on the
    /// session still being active, so concurrent sweeps are safe.
    pub async fn reclaim_expired(&self, now: DateTime<Utc>) -> UploadResult<ReclaimReport> {
        let mut report = ReclaimReport::default();
        let mut skip = 0;

        loop {
            let page = self
                .store
                .list_expired(now, CLEANUP_PAGE_SIZE, skip)
                .await?;
            if page.is_empty() {
                break;
            }
            for session in &page {
                // `skip` only counts sessions the next scan would list
                // again: once the status CAS lands, the row has left the
                // predicate and a later failure must not shift the page.
                let marked = match self.store.set_status(session.id, SessionStatus::Expired).await
                {
                    Ok(marked) => marked,
                    Err(err) => {
                        warn!(session = %session.id, "failed to reclaim session: {}", err);
                        report.failed += 1;
                        skip += 1;
                        continue;
                    }
                };
                if !marked {
                    continue; // lost the race to a concurrent sweep
                }
                self.abort_backend(session).await;
                match self.store.delete(session.id).await {
                    Ok(()) => {
                        debug!(session = %session.id, "reclaimed expired session");
                        report.reclaimed += 1;
                    }
                    Err(err) => {
                        warn!(session = %session.id, "failed to remove reclaimed session: {}", err);
                        report.failed += 1;
                    }
                }
            }
        }

        if report.reclaimed > 0 || report.failed > 0 {
            info!(
                reclaimed = report.reclaimed,
                failed = report.failed,
                "expired session sweep finished"
            );
        }
        Ok(report)
    }

    /// Best-effort backend cleanup; storage already being gone is an
    /// acceptable outcome.
    async fn abort_backend(&self, session: &UploadSession) {
        let backend = match self.backends.get(session.storage_kind) {
            Ok(backend) => backend,
            Err(err) => {
                warn!(session = %session.id, "no backend for abort: {}", err);
                return;
            }
        };
        if tokio::time::timeout(
            self.policy.backend_timeout,
            backend.abort(&session.object_key),
        )
        .await
        .is_err()
        {
            warn!(session = %session.id, "backend abort timed out");
        }
    }
}

/// Reduce a client-supplied file name to its last path segment and reject
/// names that would not survive as part of an object key.
fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    if base.bytes().any(|b| b.is_ascii_control()) {
        return None;
    }
    Some(base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::session::PartState,
        storage::{StorageBackend, local::LocalBackend, sign::UrlSigner},
    };
    use bytes::Bytes;
    use futures::stream;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::{io, sync::Arc};
    use tempfile::TempDir;

    const MB: i64 = 1024 * 1024;

    struct Harness {
        manager: UploadManager,
        local: Arc<LocalBackend>,
        _dir: TempDir,
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }

        let local = Arc::new(LocalBackend::new(
            dir.path(),
            "http://127.0.0.1:3000",
            UrlSigner::new("test-secret"),
            Duration::from_secs(900),
        ));
        let backends = BackendSet::new().with(StorageKind::Local, local.clone());
        let policy = UploadPolicy {
            part_size: 5 * MB,
            max_file_size: 100 * MB,
            remote_threshold: i64::MAX,
            session_ttl: ChronoDuration::hours(24),
            backend_timeout: Duration::from_secs(5),
        };
        Harness {
            manager: UploadManager::new(SessionStore::new(Arc::new(pool)), backends, policy),
            local,
            _dir: dir,
        }
    }

    fn body(bytes: &'static [u8]) -> impl futures::Stream<Item = io::Result<Bytes>> + Send {
        stream::iter(vec![Ok(Bytes::from_static(bytes))])
    }

    async fn force_expired(manager: &UploadManager, id: Uuid) {
        sqlx::query("UPDATE upload_sessions SET expires_at = ? WHERE id = ?")
            .bind(Utc::now() - ChronoDuration::hours(1))
            .bind(id)
            .execute(manager.store().pool())
            .await
            .unwrap();
    }

    #[test]
    fn part_planning_rounds_up() {
        assert_eq!(plan_parts(5 * MB, 50 * MB), 10);
        assert_eq!(plan_parts(5 * MB, 50 * MB + 1), 11);
        assert_eq!(plan_parts(5 * MB, 1), 1);
    }

    #[tokio::test]
    async fn create_session_plans_parts_and_seeds_rows() {
        let h = harness().await;
        let owner = Uuid::new_v4();

        let session = h
            .manager
            .create_session(owner, 50 * MB, "video.mp4")
            .await
            .unwrap();
        assert_eq!(session.total_parts, 10);
        assert_eq!(session.storage_kind, StorageKind::Local);
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.expires_at > session.created_at);

        let parts = h.manager.store().parts(session.id).await.unwrap();
        assert_eq!(parts.len(), 10);
        assert!(parts.iter().all(|p| p.state == PartState::Pending));
    }

    #[tokio::test]
    async fn create_session_rejects_bad_sizes() {
        let h = harness().await;
        let owner = Uuid::new_v4();

        let err = h.manager.create_session(owner, 0, "a.bin").await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidInput(_)));

        let err = h
            .manager
            .create_session(owner, 500 * MB, "a.bin")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn presign_issues_url_and_marks_part() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let session = h
            .manager
            .create_session(owner, 8 * MB, "a.bin")
            .await
            .unwrap();

        let grant = h.manager.presign_part(session.id, 1, owner).await.unwrap();
        assert_eq!(grant.part_number, 1);
        assert_eq!(grant.storage_kind, StorageKind::Local);
        assert!(grant.url.contains("/parts/"));
        assert!(grant.url_expires_at > Utc::now());

        let parts = h.manager.store().parts(session.id).await.unwrap();
        assert_eq!(parts[0].state, PartState::UrlIssued);
        assert_eq!(parts[1].state, PartState::Pending);
    }

    #[tokio::test]
    async fn presign_validates_part_range() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let session = h
            .manager
            .create_session(owner, 8 * MB, "a.bin")
            .await
            .unwrap();

        let err = h.manager.presign_part(session.id, 0, owner).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidPart { part: 0, total: 2 }));
        let err = h.manager.presign_part(session.id, 3, owner).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidPart { part: 3, total: 2 }));
    }

    #[tokio::test]
    async fn non_owner_is_forbidden_everywhere() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let session = h
            .manager
            .create_session(owner, 8 * MB, "a.bin")
            .await
            .unwrap();

        assert!(matches!(
            h.manager.presign_part(session.id, 1, stranger).await,
            Err(UploadError::Forbidden)
        ));
        assert!(matches!(
            h.manager.confirm_part(session.id, 1, stranger, None).await,
            Err(UploadError::Forbidden)
        ));
        assert!(matches!(
            h.manager.abort_session(session.id, stranger).await,
            Err(UploadError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn presign_refuses_expired_sessions() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let session = h
            .manager
            .create_session(owner, 8 * MB, "a.bin")
            .await
            .unwrap();
        force_expired(&h.manager, session.id).await;

        let err = h.manager.presign_part(session.id, 1, owner).await.unwrap_err();
        assert!(matches!(err, UploadError::SessionExpired(_)));
    }

    #[tokio::test]
    async fn confirm_refuses_expired_sessions() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let session = h
            .manager
            .create_session(owner, 8 * MB, "a.bin")
            .await
            .unwrap();
        h.local
            .put_part(&session.object_key, 1, body(b"late"))
            .await
            .unwrap();
        force_expired(&h.manager, session.id).await;

        // A session past its deadline belongs to the sweep; bytes that
        // landed in time do not buy late confirmations a pass.
        let err = h
            .manager
            .confirm_part(session.id, 1, owner, None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::SessionExpired(_)));
        assert_eq!(
            h.manager.store().count_uploaded(session.id).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let h = harness().await;
        let err = h
            .manager
            .presign_part(Uuid::new_v4(), 1, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn reverse_order_confirmation_completes_once() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let session = h
            .manager
            .create_session(owner, 12 * MB, "a.bin")
            .await
            .unwrap();
        assert_eq!(session.total_parts, 3);

        let chunks: [&'static [u8]; 3] = [b"alpha-", b"beta-", b"gamma"];
        for (i, chunk) in chunks.iter().enumerate() {
            h.local
                .put_part(&session.object_key, (i + 1) as i64, body(chunk))
                .await
                .unwrap();
        }

        // Confirmations arrive out of order; completion is the aggregate
        // predicate, not arrival order.
        for part in [3, 2] {
            let outcome = h
                .manager
                .confirm_part(session.id, part, owner, None)
                .await
                .unwrap();
            assert!(!outcome.completed);
            assert!(outcome.object_location.is_none());
        }
        let outcome = h
            .manager
            .confirm_part(session.id, 1, owner, None)
            .await
            .unwrap();
        assert!(outcome.completed);
        let location = outcome.object_location.unwrap();
        assert!(location.starts_with("file://"));

        let current = h.manager.store().get(session.id).await.unwrap().unwrap();
        assert_eq!(current.status, SessionStatus::Completed);
        assert_eq!(current.object_location.as_deref(), Some(location.as_str()));

        let data = tokio::fs::read(location.trim_start_matches("file://"))
            .await
            .unwrap();
        assert_eq!(data, b"alpha-beta-gamma");
    }

    #[tokio::test]
    async fn confirm_is_idempotent_after_completion() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let session = h
            .manager
            .create_session(owner, 4 * MB, "a.bin")
            .await
            .unwrap();
        h.local
            .put_part(&session.object_key, 1, body(b"payload"))
            .await
            .unwrap();

        let first = h
            .manager
            .confirm_part(session.id, 1, owner, None)
            .await
            .unwrap();
        assert!(first.completed);

        let second = h
            .manager
            .confirm_part(session.id, 1, owner, None)
            .await
            .unwrap();
        assert!(second.completed);
        assert_eq!(second.object_location, first.object_location);
        assert_eq!(
            h.manager.store().get(session.id).await.unwrap().unwrap().status,
            SessionStatus::Completed
        );
    }

    #[tokio::test]
    async fn failed_finalize_leaves_session_retryable() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let session = h
            .manager
            .create_session(owner, 8 * MB, "a.bin")
            .await
            .unwrap();

        // Confirm both parts but only upload bytes for one: the backend
        // reports incomplete parts and the session must stay active.
        h.local
            .put_part(&session.object_key, 1, body(b"one"))
            .await
            .unwrap();
        h.manager
            .confirm_part(session.id, 1, owner, None)
            .await
            .unwrap();
        let err = h
            .manager
            .confirm_part(session.id, 2, owner, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::Backend(BackendError::IncompleteParts { .. })
        ));
        assert_eq!(
            h.manager.store().get(session.id).await.unwrap().unwrap().status,
            SessionStatus::Active
        );

        // After the missing bytes land, re-driving confirmation succeeds.
        h.local
            .put_part(&session.object_key, 2, body(b"two"))
            .await
            .unwrap();
        let outcome = h
            .manager
            .confirm_part(session.id, 2, owner, None)
            .await
            .unwrap();
        assert!(outcome.completed);
    }

    #[tokio::test]
    async fn abort_is_idempotent_and_removes_record() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let session = h
            .manager
            .create_session(owner, 8 * MB, "a.bin")
            .await
            .unwrap();
        h.local
            .put_part(&session.object_key, 1, body(b"junk"))
            .await
            .unwrap();

        h.manager.abort_session(session.id, owner).await.unwrap();
        assert!(h.manager.store().get(session.id).await.unwrap().is_none());

        // Repeat abort of the now-unknown session is still a success.
        h.manager.abort_session(session.id, owner).await.unwrap();

        let err = h.manager.presign_part(session.id, 1, owner).await.unwrap_err();
        assert!(matches!(err, UploadError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn reclaim_sweeps_only_expired_sessions_once() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let stale = h
            .manager
            .create_session(owner, 8 * MB, "stale.bin")
            .await
            .unwrap();
        let fresh = h
            .manager
            .create_session(owner, 8 * MB, "fresh.bin")
            .await
            .unwrap();
        h.local
            .put_part(&stale.object_key, 1, body(b"junk"))
            .await
            .unwrap();
        force_expired(&h.manager, stale.id).await;

        let report = h.manager.reclaim_expired(Utc::now()).await.unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.failed, 0);
        assert!(h.manager.store().get(stale.id).await.unwrap().is_none());
        assert!(h.manager.store().get(fresh.id).await.unwrap().is_some());

        // Second sweep finds nothing left to reclaim.
        let report = h.manager.reclaim_expired(Utc::now()).await.unwrap();
        assert_eq!(report.reclaimed, 0);
    }

    #[tokio::test]
    async fn dotted_file_names_stay_usable_end_to_end() {
        let h = harness().await;
        let owner = Uuid::new_v4();

        // Interior dots are legal in a file name; only whole `.`/`..`
        // segments are traversal.
        let session = h
            .manager
            .create_session(owner, 4 * MB, "report..final.pdf")
            .await
            .unwrap();
        assert!(session.object_key.ends_with("/report..final.pdf"));

        let grant = h.manager.presign_part(session.id, 1, owner).await.unwrap();
        assert!(grant.url.contains("report..final.pdf"));

        h.local
            .put_part(&session.object_key, 1, body(b"pdf bytes"))
            .await
            .unwrap();
        let outcome = h
            .manager
            .confirm_part(session.id, 1, owner, None)
            .await
            .unwrap();
        assert!(outcome.completed);
    }

    #[tokio::test]
    async fn confirm_records_reported_etag() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let session = h
            .manager
            .create_session(owner, 8 * MB, "a.bin")
            .await
            .unwrap();
        h.local
            .put_part(&session.object_key, 1, body(b"one"))
            .await
            .unwrap();

        h.manager
            .confirm_part(session.id, 1, owner, Some("9a0364b9e99bb480dd25e1f0284c8555"))
            .await
            .unwrap();

        let parts = h.manager.store().parts(session.id).await.unwrap();
        assert_eq!(
            parts[0].etag.as_deref(),
            Some("9a0364b9e99bb480dd25e1f0284c8555")
        );
        assert!(parts[1].etag.is_none());
    }

    #[test]
    fn file_names_are_reduced_to_base_names() {
        assert_eq!(sanitize_file_name("a.bin").as_deref(), Some("a.bin"));
        assert_eq!(
            sanitize_file_name("dir/sub/a.bin").as_deref(),
            Some("a.bin")
        );
        assert_eq!(
            sanitize_file_name("c:\\files\\a.bin").as_deref(),
            Some("a.bin")
        );
        assert_eq!(sanitize_file_name(""), None);
        assert_eq!(sanitize_file_name("uploads/.."), None);
    }
}
