//! Durable storage for upload sessions, backed by SQLite.
//!
//! The store persists and scans records; it performs no lifecycle
//! validation. Every mutation is a single-row conditional write so the
//! manager can rely on compare-and-set semantics: an update whose guard no
//! longer holds affects zero rows and the caller decides what that means.

use crate::models::session::{PartState, SessionStatus, UploadPart, UploadSession};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct SessionStore {
    db: Arc<SqlitePool>,
}

impl SessionStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert a session together with its `1..=total_parts` pending part
    /// rows, atomically.
    pub async fn create(&self, session: &UploadSession) -> sqlx::Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO upload_sessions (
                id, owner_id, file_name, file_size, storage_kind, object_key,
                total_parts, part_size, status, version, object_location,
                created_at, expires_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id)
        .bind(session.owner_id)
        .bind(&session.file_name)
        .bind(session.file_size)
        .bind(session.storage_kind)
        .bind(&session.object_key)
        .bind(session.total_parts)
        .bind(session.part_size)
        .bind(session.status)
        .bind(session.version)
        .bind(session.object_location.as_deref())
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&mut *tx)
        .await?;

        for part_number in 1..=session.total_parts {
            sqlx::query(
                "INSERT INTO upload_parts (session_id, part_number, state, etag, updated_at)
                 VALUES (?, ?, ?, NULL, ?)",
            )
            .bind(session.id)
            .bind(part_number)
            .bind(PartState::Pending)
            .bind(session.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    pub async fn get(&self, id: Uuid) -> sqlx::Result<Option<UploadSession>> {
        sqlx::query_as::<_, UploadSession>(
            "SELECT id, owner_id, file_name, file_size, storage_kind, object_key,
                    total_parts, part_size, status, version, object_location,
                    created_at, expires_at
             FROM upload_sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn parts(&self, session_id: Uuid) -> sqlx::Result<Vec<UploadPart>> {
        sqlx::query_as::<_, UploadPart>(
            "SELECT session_id, part_number, state, etag, updated_at
             FROM upload_parts WHERE session_id = ? ORDER BY part_number ASC",
        )
        .bind(session_id)
        .fetch_all(&*self.db)
        .await
    }

    pub async fn count_uploaded(&self, session_id: Uuid) -> sqlx::Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM upload_parts WHERE session_id = ? AND state = ?",
        )
        .bind(session_id)
        .bind(PartState::Uploaded)
        .fetch_one(&*self.db)
        .await
    }

    /// Record that a presigned URL was issued for a part. Only upgrades
    /// `pending`; repeated issuance and already-uploaded parts are no-ops.
    pub async fn mark_part_issued(
        &self,
        session_id: Uuid,
        part_number: i64,
        now: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE upload_parts SET state = ?, updated_at = ?
             WHERE session_id = ? AND part_number = ? AND state = ?",
        )
        .bind(PartState::UrlIssued)
        .bind(now)
        .bind(session_id)
        .bind(part_number)
        .bind(PartState::Pending)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Flip a part to `uploaded`, recording the etag the backend reported
    /// for it when the caller has one. Idempotent: confirming an already
    /// uploaded part affects zero rows and still succeeds.
    pub async fn mark_part_uploaded(
        &self,
        session_id: Uuid,
        part_number: i64,
        etag: Option<&str>,
        now: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE upload_parts SET state = ?, etag = COALESCE(?, etag), updated_at = ?
             WHERE session_id = ? AND part_number = ? AND state <> ?",
        )
        .bind(PartState::Uploaded)
        .bind(etag)
        .bind(now)
        .bind(session_id)
        .bind(part_number)
        .bind(PartState::Uploaded)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Transition an `active` session to a terminal status. Returns false
    /// when the session was no longer active (someone else won the race).
    pub async fn set_status(&self, id: Uuid, status: SessionStatus) -> sqlx::Result<bool> {
        let result = sqlx::query("UPDATE upload_sessions SET status = ? WHERE id = ? AND status = ?")
            .bind(status)
            .bind(id)
            .bind(SessionStatus::Active)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Complete an `active` session and record where the assembled object
    /// lives.
    pub async fn set_completed(&self, id: Uuid, location: &str) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE upload_sessions SET status = ?, object_location = ?
             WHERE id = ? AND status = ?",
        )
        .bind(SessionStatus::Completed)
        .bind(location)
        .bind(id)
        .bind(SessionStatus::Active)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Version-guarded compare-and-set used as the finalize ticket: of all
    /// callers holding the same snapshot, exactly one bumps the version.
    pub async fn take_finalize_ticket(&self, id: Uuid, version: i64) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE upload_sessions SET version = version + 1
             WHERE id = ? AND version = ? AND status = ?",
        )
        .bind(id)
        .bind(version)
        .bind(SessionStatus::Active)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Page of active sessions past their deadline, oldest first. Callers
    /// re-scan from the top: reclaimed rows leave the predicate, so the
    /// scan is restartable; `offset` skips rows a sweep failed to reclaim.
    pub async fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> sqlx::Result<Vec<UploadSession>> {
        sqlx::query_as::<_, UploadSession>(
            "SELECT id, owner_id, file_name, file_size, storage_kind, object_key,
                    total_parts, part_size, status, version, object_location,
                    created_at, expires_at
             FROM upload_sessions
             WHERE status = ? AND expires_at <= ?
             ORDER BY expires_at ASC LIMIT ? OFFSET ?",
        )
        .bind(SessionStatus::Active)
        .bind(now)
        .bind(limit)
        .bind(offset)
        .fetch_all(&*self.db)
        .await
    }

    /// Remove a session; part rows go with it via ON DELETE CASCADE.
    pub async fn delete(&self, id: Uuid) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM upload_sessions WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::StorageKind;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SessionStore {
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
        SessionStore::new(Arc::new(pool))
    }

    fn session(total_parts: i64, expires_in: Duration) -> UploadSession {
        let now = Utc::now();
        UploadSession {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            file_name: "a.bin".into(),
            file_size: total_parts * 1024,
            storage_kind: StorageKind::Local,
            object_key: format!("k/{}", Uuid::new_v4()),
            total_parts,
            part_size: 1024,
            status: SessionStatus::Active,
            version: 0,
            object_location: None,
            created_at: now,
            expires_at: now + expires_in,
        }
    }

    #[tokio::test]
    async fn create_seeds_all_part_rows() {
        let store = store().await;
        let s = session(4, Duration::hours(1));
        store.create(&s).await.unwrap();

        let parts = store.parts(s.id).await.unwrap();
        assert_eq!(
            parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert!(parts.iter().all(|p| p.state == PartState::Pending));
    }

    #[tokio::test]
    async fn status_cas_only_leaves_active_once() {
        let store = store().await;
        let s = session(1, Duration::hours(1));
        store.create(&s).await.unwrap();

        assert!(store.set_status(s.id, SessionStatus::Aborted).await.unwrap());
        assert!(!store.set_status(s.id, SessionStatus::Expired).await.unwrap());
        assert_eq!(
            store.get(s.id).await.unwrap().unwrap().status,
            SessionStatus::Aborted
        );
    }

    #[tokio::test]
    async fn issued_mark_never_downgrades_uploaded() {
        let store = store().await;
        let s = session(1, Duration::hours(1));
        store.create(&s).await.unwrap();

        store
            .mark_part_uploaded(s.id, 1, None, Utc::now())
            .await
            .unwrap();
        store.mark_part_issued(s.id, 1, Utc::now()).await.unwrap();
        assert_eq!(store.parts(s.id).await.unwrap()[0].state, PartState::Uploaded);
        assert_eq!(store.count_uploaded(s.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn uploaded_mark_records_and_keeps_etag() {
        let store = store().await;
        let s = session(1, Duration::hours(1));
        store.create(&s).await.unwrap();

        store
            .mark_part_uploaded(s.id, 1, Some("abc123"), Utc::now())
            .await
            .unwrap();
        assert_eq!(
            store.parts(s.id).await.unwrap()[0].etag.as_deref(),
            Some("abc123")
        );

        // A retried confirmation without an etag keeps the recorded one.
        store
            .mark_part_uploaded(s.id, 1, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(
            store.parts(s.id).await.unwrap()[0].etag.as_deref(),
            Some("abc123")
        );
    }

    #[tokio::test]
    async fn finalize_ticket_granted_once_per_version() {
        let store = store().await;
        let s = session(1, Duration::hours(1));
        store.create(&s).await.unwrap();

        assert!(store.take_finalize_ticket(s.id, 0).await.unwrap());
        assert!(!store.take_finalize_ticket(s.id, 0).await.unwrap());
        assert!(store.take_finalize_ticket(s.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn expired_scan_filters_status_and_deadline() {
        let store = store().await;
        let stale = session(1, Duration::hours(-2));
        let fresh = session(1, Duration::hours(2));
        let aborted = session(1, Duration::hours(-2));
        let reclaiming = session(1, Duration::hours(-2));
        store.create(&stale).await.unwrap();
        store.create(&fresh).await.unwrap();
        store.create(&aborted).await.unwrap();
        store.create(&reclaiming).await.unwrap();
        store.set_status(aborted.id, SessionStatus::Aborted).await.unwrap();
        // A session already marked expired (reclaim under way elsewhere)
        // has left the scan predicate and must not be re-listed.
        store
            .set_status(reclaiming.id, SessionStatus::Expired)
            .await
            .unwrap();

        let page = store.list_expired(Utc::now(), 10, 0).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, stale.id);
    }

    #[tokio::test]
    async fn delete_cascades_to_parts() {
        let store = store().await;
        let s = session(3, Duration::hours(1));
        store.create(&s).await.unwrap();
        store.delete(s.id).await.unwrap();

        assert!(store.get(s.id).await.unwrap().is_none());
        assert!(store.parts(s.id).await.unwrap().is_empty());
    }
}
