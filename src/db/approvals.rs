//! Durable approval counter store.
//!
//! One integer counter per merge request, created implicitly on first
//! increment and never deleted. Increments are transactional and serialized
//! through a single writer, so concurrent callers observe a linear history:
//! no two callers ever see the same previous count.

use crate::db::pool::DbPool;
use crate::error::BotError;
use crate::models::merge_request::ApprovalKey;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Transactional counter store over the SQLite pool.
///
/// The store is the single writer for `approval_counts`: every increment
/// across all keys runs under one mutex. Throughput is bounded, correctness
/// at webhook volumes is what matters.
pub struct ApprovalStore {
    pool: DbPool,
    write_lock: Mutex<()>,
}

impl ApprovalStore {
    /// Create a store over an initialized pool.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Atomically increment the counter for `key` and return the new value.
    ///
    /// Read-modify-write runs inside one transaction under the writer lock.
    /// A successful return means the new value is committed; a crash between
    /// read and commit loses nothing the caller was told about.
    pub async fn increment(&self, key: &ApprovalKey) -> Result<i64, BotError> {
        let _writer = self.write_lock.lock().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BotError::database_with_op(e.to_string(), "begin"))?;

        let current: Option<(i64,)> = sqlx::query_as(
            "SELECT count FROM approval_counts WHERE project_id = ? AND mr_iid = ?",
        )
        .bind(key.project_id)
        .bind(key.mr_iid)
        .fetch_optional(&mut *tx)
        .await?;

        let new_count = current.map(|(c,)| c).unwrap_or(0) + 1;

        sqlx::query(
            r#"
            INSERT INTO approval_counts (project_id, mr_iid, count, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (project_id, mr_iid)
            DO UPDATE SET count = excluded.count, updated_at = excluded.updated_at
            "#,
        )
        .bind(key.project_id)
        .bind(key.mr_iid)
        .bind(new_count)
        .bind(now())
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| BotError::database_with_op(e.to_string(), "commit"))?;

        Ok(new_count)
    }

    /// Read the current counter for `key` (0 if absent).
    pub async fn get(&self, key: &ApprovalKey) -> Result<i64, BotError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT count FROM approval_counts WHERE project_id = ? AND mr_iid = ?",
        )
        .bind(key.project_id)
        .bind(key.mr_iid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(c,)| c).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn setup_store() -> (tempfile::TempDir, ApprovalStore) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let pool = crate::db::initialize(&db_path).await.unwrap();
        (dir, ApprovalStore::new(pool))
    }

    #[tokio::test]
    async fn test_increment_from_zero() {
        let (_dir, store) = setup_store().await;
        let key = ApprovalKey::new(1, 1);

        assert_eq!(store.get(&key).await.unwrap(), 0);
        assert_eq!(store.increment(&key).await.unwrap(), 1);
        assert_eq!(store.increment(&key).await.unwrap(), 2);
        assert_eq!(store.get(&key).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (_dir, store) = setup_store().await;
        let a = ApprovalKey::new(1, 1);
        let b = ApprovalKey::new(1, 2);
        let c = ApprovalKey::new(2, 1);

        store.increment(&a).await.unwrap();
        store.increment(&a).await.unwrap();
        store.increment(&b).await.unwrap();

        assert_eq!(store.get(&a).await.unwrap(), 2);
        assert_eq!(store.get(&b).await.unwrap(), 1);
        assert_eq!(store.get(&c).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_linear() {
        let (_dir, store) = setup_store().await;
        let store = Arc::new(store);
        let key = ApprovalKey::new(7, 42);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.increment(&key).await.unwrap() },
            ));
        }

        let mut observed = Vec::new();
        for handle in handles {
            observed.push(handle.await.unwrap());
        }
        observed.sort_unstable();

        // Every caller saw a distinct post-increment value: 1..=16.
        assert_eq!(observed, (1..=16).collect::<Vec<i64>>());
        assert_eq!(store.get(&key).await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_counter_survives_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let key = ApprovalKey::new(3, 9);

        {
            let pool = crate::db::initialize(&db_path).await.unwrap();
            let store = ApprovalStore::new(pool.clone());
            store.increment(&key).await.unwrap();
            store.increment(&key).await.unwrap();
            pool.close().await;
        }

        let pool = crate::db::initialize(&db_path).await.unwrap();
        let store = ApprovalStore::new(pool);
        assert_eq!(store.get(&key).await.unwrap(), 2);
        assert_eq!(store.increment(&key).await.unwrap(), 3);
    }
}
