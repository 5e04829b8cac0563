//! # Entity Repository
//!
//! Durable cache of Item, Staff and CheckoutLog records.
//!
//! ## Last-Writer-Wins Upsert
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  put(entity)                                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT ... ON CONFLICT(kind, id) DO NOTHING                            │
//! │       │                                                                 │
//! │       ├── 1 row  → Inserted (first write for this id)                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  UPDATE ... WHERE last_modified < incoming                              │
//! │       │                                                                 │
//! │       ├── 1 row  → Replaced                                             │
//! │       └── 0 rows → KeptExisting (stored is newer or equal)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both statements are writes, so inside a transaction the write lock is
//! taken up front and the comparison cannot race another writer.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use stockroom_core::{Entity, EntityKind, Timestamp};

// =============================================================================
// Types
// =============================================================================

/// Result of a last-writer-wins upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// No record existed for this id.
    Inserted,
    /// The incoming record was strictly newer.
    Replaced,
    /// The stored record was newer or equal; nothing changed.
    KeptExisting,
}

impl PutOutcome {
    /// Returns true when the store now holds the incoming record.
    pub fn is_written(&self) -> bool {
        !matches!(self, PutOutcome::KeptExisting)
    }
}

/// A cached entity with its sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub entity: Entity,
    /// Local changes are waiting in the queue.
    pub pending_sync: bool,
    /// When remote ingestion last touched this record.
    pub last_synced_at: Option<Timestamp>,
}

#[derive(Debug, sqlx::FromRow)]
struct EntityRow {
    kind: EntityKind,
    payload: String,
    pending_sync: bool,
    last_synced_at: Option<i64>,
}

impl EntityRow {
    fn into_record(self) -> DbResult<EntityRecord> {
        Ok(EntityRecord {
            entity: Entity::from_payload(self.kind, &self.payload)?,
            pending_sync: self.pending_sync,
            last_synced_at: self.last_synced_at,
        })
    }
}

// =============================================================================
// Connection-level helpers (usable inside transactions)
// =============================================================================

/// LWW upsert. `pending` overrides the pending flag when `Some`.
pub(crate) async fn upsert_lww(
    conn: &mut SqliteConnection,
    entity: &Entity,
    pending: Option<bool>,
) -> DbResult<PutOutcome> {
    let kind = entity.kind();
    let payload = entity.to_payload()?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO entities (kind, id, payload, last_modified, is_active, pending_sync)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(kind, id) DO NOTHING
        "#,
    )
    .bind(kind)
    .bind(entity.id())
    .bind(&payload)
    .bind(entity.last_modified())
    .bind(entity.is_active())
    .bind(pending.unwrap_or(false))
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted == 1 {
        return Ok(PutOutcome::Inserted);
    }

    let replaced = sqlx::query(
        r#"
        UPDATE entities SET
            payload = ?3,
            last_modified = ?4,
            is_active = ?5,
            pending_sync = COALESCE(?6, pending_sync)
        WHERE kind = ?1 AND id = ?2 AND last_modified < ?4
        "#,
    )
    .bind(kind)
    .bind(entity.id())
    .bind(&payload)
    .bind(entity.last_modified())
    .bind(entity.is_active())
    .bind(pending)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if replaced == 1 {
        Ok(PutOutcome::Replaced)
    } else {
        Ok(PutOutcome::KeptExisting)
    }
}

/// Stored `last_modified` for a record, if it exists.
pub(crate) async fn stored_last_modified(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    id: &str,
) -> DbResult<Option<Timestamp>> {
    let stored = sqlx::query_scalar("SELECT last_modified FROM entities WHERE kind = ?1 AND id = ?2")
        .bind(kind)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(stored)
}

/// Sets the pending flag to whether any queued operation remains for the record.
pub(crate) async fn refresh_pending_flag(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    id: &str,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE entities SET pending_sync = EXISTS (
            SELECT 1 FROM pending_operations
            WHERE entity_kind = ?1 AND entity_id = ?2
        )
        WHERE kind = ?1 AND id = ?2
        "#,
    )
    .bind(kind)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for cached entities.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    pool: SqlitePool,
}

impl EntityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        EntityRepository { pool }
    }

    /// Looks up one record. Missing records are `Ok(None)`.
    pub async fn get(&self, kind: EntityKind, id: &str) -> DbResult<Option<Entity>> {
        Ok(self.get_record(kind, id).await?.map(|record| record.entity))
    }

    /// Looks up one record with its sync bookkeeping.
    pub async fn get_record(&self, kind: EntityKind, id: &str) -> DbResult<Option<EntityRecord>> {
        let row: Option<EntityRow> = sqlx::query_as(
            r#"
            SELECT kind, payload, pending_sync, last_synced_at
            FROM entities
            WHERE kind = ?1 AND id = ?2
            "#,
        )
        .bind(kind)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EntityRow::into_record).transpose()
    }

    /// All records of a kind, in insertion order.
    pub async fn get_all(&self, kind: EntityKind) -> DbResult<Vec<Entity>> {
        let rows: Vec<EntityRow> = sqlx::query_as(
            r#"
            SELECT kind, payload, pending_sync, last_synced_at
            FROM entities
            WHERE kind = ?1
            ORDER BY rowid ASC
            "#,
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_record().map(|record| record.entity))
            .collect()
    }

    /// Last-writer-wins upsert. Leaves the pending flag untouched on replace.
    pub async fn put(&self, entity: &Entity) -> DbResult<PutOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = upsert_lww(&mut tx, entity, None).await?;
        tx.commit().await?;

        debug!(
            kind = %entity.kind(),
            id = %entity.id(),
            last_modified = entity.last_modified(),
            outcome = ?outcome,
            "Entity put"
        );

        Ok(outcome)
    }

    /// Physically deletes a record. Soft deletes go through `put`.
    pub async fn remove(&self, kind: EntityKind, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM entities WHERE kind = ?1 AND id = ?2")
            .bind(kind)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records when remote ingestion last confirmed this record.
    pub async fn mark_synced(&self, kind: EntityKind, id: &str, at: Timestamp) -> DbResult<bool> {
        let result =
            sqlx::query("UPDATE entities SET last_synced_at = ?3 WHERE kind = ?1 AND id = ?2")
                .bind(kind)
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_pending_sync(&self, kind: EntityKind, id: &str, pending: bool) -> DbResult<()> {
        sqlx::query("UPDATE entities SET pending_sync = ?3 WHERE kind = ?1 AND id = ?2")
            .bind(kind)
            .bind(id)
            .bind(pending)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self, kind: EntityKind) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE kind = ?1")
            .bind(kind)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Records never ingested from the remote, or last ingested before `older_than`.
    pub async fn stale(&self, kind: EntityKind, older_than: Timestamp) -> DbResult<Vec<Entity>> {
        let rows: Vec<EntityRow> = sqlx::query_as(
            r#"
            SELECT kind, payload, pending_sync, last_synced_at
            FROM entities
            WHERE kind = ?1
              AND (last_synced_at IS NULL OR last_synced_at < ?2)
            ORDER BY rowid ASC
            "#,
        )
        .bind(kind)
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_record().map(|record| record.entity))
            .collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use stockroom_core::{CheckoutLog, Item, Staff};

    use super::*;

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn item_at(id: &str, active: bool, last_modified: Timestamp) -> Entity {
        let mut item = Item::new("Projector", last_modified);
        item.id = id.to_string();
        item.is_active = active;
        Entity::Item(item)
    }

    #[tokio::test]
    async fn test_put_is_last_writer_wins() {
        let db = db().await;
        let repo = db.entities();

        assert_eq!(repo.put(&item_at("i1", true, 100)).await.unwrap(), PutOutcome::Inserted);

        // Older and equal timestamps leave the stored record alone.
        assert_eq!(
            repo.put(&item_at("i1", false, 99)).await.unwrap(),
            PutOutcome::KeptExisting
        );
        assert_eq!(
            repo.put(&item_at("i1", false, 100)).await.unwrap(),
            PutOutcome::KeptExisting
        );
        let stored = repo.get(EntityKind::Item, "i1").await.unwrap().unwrap();
        assert_eq!(stored.is_active(), Some(true));

        assert_eq!(
            repo.put(&item_at("i1", false, 101)).await.unwrap(),
            PutOutcome::Replaced
        );
        let stored = repo.get(EntityKind::Item, "i1").await.unwrap().unwrap();
        assert_eq!(stored.is_active(), Some(false));
        assert_eq!(stored.last_modified(), 101);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let db = db().await;
        assert!(db.entities().get(EntityKind::Staff, "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_kinds_are_separate_namespaces() {
        let db = db().await;
        let repo = db.entities();

        let mut staff = Staff::new("Ana", "Stage", 5);
        staff.id = "shared".to_string();
        repo.put(&Entity::Staff(staff)).await.unwrap();
        repo.put(&item_at("shared", true, 5)).await.unwrap();

        assert_eq!(repo.count(EntityKind::Item).await.unwrap(), 1);
        assert_eq!(repo.count(EntityKind::Staff).await.unwrap(), 1);
        assert_eq!(repo.count(EntityKind::CheckoutLog).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_all_keeps_insertion_order_across_updates() {
        let db = db().await;
        let repo = db.entities();

        for (id, at) in [("c", 1), ("a", 2), ("b", 3)] {
            repo.put(&item_at(id, true, at)).await.unwrap();
        }
        repo.put(&item_at("c", false, 10)).await.unwrap();

        let ids: Vec<String> = repo
            .get_all(EntityKind::Item)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_mark_synced_and_stale() {
        let db = db().await;
        let repo = db.entities();

        let log = Entity::CheckoutLog(CheckoutLog::open("item", "staff", 10));
        let log_id = log.id().to_string();
        repo.put(&log).await.unwrap();
        repo.put(&Entity::CheckoutLog(CheckoutLog::open("item", "staff", 11)))
            .await
            .unwrap();

        assert!(repo.mark_synced(EntityKind::CheckoutLog, &log_id, 1_000).await.unwrap());
        assert!(!repo.mark_synced(EntityKind::CheckoutLog, "missing", 1_000).await.unwrap());

        let record = repo.get_record(EntityKind::CheckoutLog, &log_id).await.unwrap().unwrap();
        assert_eq!(record.last_synced_at, Some(1_000));

        // The never-synced log is always stale; the synced one only past its mark.
        assert_eq!(repo.stale(EntityKind::CheckoutLog, 500).await.unwrap().len(), 1);
        assert_eq!(repo.stale(EntityKind::CheckoutLog, 2_000).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pending_flag_survives_remote_replace() {
        let db = db().await;
        let repo = db.entities();

        repo.put(&item_at("i1", true, 1)).await.unwrap();
        repo.set_pending_sync(EntityKind::Item, "i1", true).await.unwrap();
        repo.put(&item_at("i1", true, 2)).await.unwrap();

        let record = repo.get_record(EntityKind::Item, "i1").await.unwrap().unwrap();
        assert!(record.pending_sync);
    }

    #[tokio::test]
    async fn test_remove() {
        let db = db().await;
        let repo = db.entities();

        repo.put(&item_at("i1", true, 1)).await.unwrap();
        assert!(repo.remove(EntityKind::Item, "i1").await.unwrap());
        assert!(!repo.remove(EntityKind::Item, "i1").await.unwrap());
        assert!(repo.get(EntityKind::Item, "i1").await.unwrap().is_none());
    }
}
