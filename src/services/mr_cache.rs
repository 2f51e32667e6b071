//! In-memory merge-request snapshot cache.
//!
//! Memoizes fetched MR metadata (author, merge status, target branch) keyed
//! by project + IID. Reads take a shared lock; the fetch on a miss happens
//! outside any lock, then the result is stored under an exclusive lock. Two
//! concurrent misses for the same key may both fetch; the duplicate write is
//! idempotent (last writer wins, same value).

use crate::error::BotError;
use crate::models::merge_request::{ApprovalKey, MrSnapshot};
use crate::services::gitlab_client::GitLabApi;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct CachedSnapshot {
    snapshot: MrSnapshot,
    fetched_at: Instant,
}

/// Snapshot cache with an optional refresh TTL.
///
/// `ttl: None` keeps entries for the process lifetime, so a cached merge
/// status can go stale after GitLab-side changes. `ttl: Some(d)` expires
/// entries after `d`, making the next read refetch.
pub struct MrCache {
    entries: RwLock<HashMap<ApprovalKey, CachedSnapshot>>,
    ttl: Option<Duration>,
}

impl MrCache {
    /// Create an empty cache with the given refresh policy.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up a fresh cached snapshot.
    pub async fn get(&self, key: &ApprovalKey) -> Option<MrSnapshot> {
        let entries = self.entries.read().await;
        let cached = entries.get(key)?;

        if let Some(ttl) = self.ttl {
            if cached.fetched_at.elapsed() >= ttl {
                return None;
            }
        }

        Some(cached.snapshot.clone())
    }

    /// Store a snapshot for `key`, replacing any previous entry.
    pub async fn insert(&self, key: ApprovalKey, snapshot: MrSnapshot) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CachedSnapshot {
                snapshot,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Resolve a snapshot: cache hit, or fetch-and-populate on miss.
    ///
    /// The fetch runs with no lock held.
    pub async fn resolve(
        &self,
        key: &ApprovalKey,
        api: &dyn GitLabApi,
    ) -> Result<MrSnapshot, BotError> {
        if let Some(snapshot) = self.get(key).await {
            return Ok(snapshot);
        }

        let mr = api.get_merge_request(key.project_id, key.mr_iid).await?;
        let snapshot = mr.snapshot();
        self.insert(*key, snapshot.clone()).await;

        Ok(snapshot)
    }

    /// Number of cached entries (stale ones included).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
