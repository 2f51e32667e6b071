//! Approval gate.
//!
//! Consumes merge-request comment events, enforces author exclusion,
//! increments the durable counter, and triggers the merge when the quorum
//! is reached.
//!
//! Quorum policy: fire-once-at-transition. The merge is attempted exactly
//! when the post-increment count equals the configured threshold; later
//! approvals keep the quorum satisfied but do not re-trigger the merge.
//!
//! Replayed comment events are not de-duplicated by event ID, so a
//! redelivered comment counts twice.

use crate::config::BotConfig;
use crate::db::approvals::ApprovalStore;
use crate::error::BotError;
use crate::models::event::NoteEvent;
use crate::services::gitlab_client::{GitLabApi, MergeOptions, MergeOutcome};
use crate::services::mr_cache::MrCache;
use std::sync::Arc;
use tracing::{info, warn};

/// Why a comment event was discarded without touching any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The note does not target a merge request.
    NotMergeRequestNote,

    /// The comment body is not the approval keyword.
    KeywordMismatch,
}

/// Result of processing one comment event.
///
/// Only local failures surface as `Err`; every variant here is a normal,
/// logged-and-done outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Filtered without any state change.
    Ignored(IgnoreReason),

    /// The commenter authored the MR; authors cannot approve their own
    /// change. No state change.
    SelfApproval,

    /// Counter incremented; quorum not reached yet.
    Counted { count: i64 },

    /// Quorum reached, but the cached merge status says the MR is not
    /// currently mergeable. No merge attempted.
    QuorumNotMergeable { count: i64 },

    /// Quorum reached and the merge call completed.
    MergeAttempted { count: i64, outcome: MergeOutcome },
}

/// The approval gate. Holds its injected collaborators; one instance is
/// shared by all worker tasks.
pub struct ApprovalGate {
    api: Arc<dyn GitLabApi>,
    store: Arc<ApprovalStore>,
    cache: Arc<MrCache>,
    config: Arc<BotConfig>,
}

impl ApprovalGate {
    /// Create a gate over the injected store, cache and API client.
    pub fn new(
        api: Arc<dyn GitLabApi>,
        store: Arc<ApprovalStore>,
        cache: Arc<MrCache>,
        config: Arc<BotConfig>,
    ) -> Self {
        Self {
            api,
            store,
            cache,
            config,
        }
    }

    /// Process one comment event. Safe to invoke concurrently, including
    /// for the same merge request.
    pub async fn on_note(&self, event: &NoteEvent) -> Result<GateOutcome, BotError> {
        if !event.is_merge_request_note() {
            return Ok(GateOutcome::Ignored(IgnoreReason::NotMergeRequestNote));
        }
        let Some(key) = event.key() else {
            return Ok(GateOutcome::Ignored(IgnoreReason::NotMergeRequestNote));
        };

        // Author exclusion runs before the keyword check, so the snapshot is
        // populated on the first comment either way.
        let snapshot = self.cache.resolve(&key, self.api.as_ref()).await?;

        if event.user.username == snapshot.author_username {
            info!(
                mr = %key,
                user = %event.user.username,
                "comment from MR author, not counted"
            );
            return Ok(GateOutcome::SelfApproval);
        }

        if !self.config.is_approval_note(&event.object_attributes.note) {
            return Ok(GateOutcome::Ignored(IgnoreReason::KeywordMismatch));
        }

        let count = self.store.increment(&key).await?;
        info!(mr = %key, count, user = %event.user.username, "approval counted");

        // Fire-once-at-transition: only the increment that lands exactly on
        // the threshold triggers the merge.
        if count != i64::from(self.config.lgtm_count) {
            return Ok(GateOutcome::Counted { count });
        }

        if !snapshot.can_be_merged() {
            info!(
                mr = %key,
                count,
                merge_status = %snapshot.merge_status,
                "quorum reached but MR is not mergeable"
            );
            return Ok(GateOutcome::QuorumNotMergeable { count });
        }

        let options = MergeOptions {
            should_remove_source_branch: self.config.remove_source_branch,
            squash: self.config.squash,
        };
        let outcome = self
            .api
            .accept_merge_request(key.project_id, key.mr_iid, options)
            .await?;

        match outcome {
            MergeOutcome::Merged => info!(mr = %key, "merge request accepted"),
            MergeOutcome::Conflict => {
                warn!(mr = %key, "merge request has conflicts and cannot be merged")
            }
            MergeOutcome::AlreadyClosed => {
                warn!(mr = %key, "merge request is already merged or closed")
            }
        }

        Ok(GateOutcome::MergeAttempted { count, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Args, BotConfig};
    use crate::models::event::{EventUser, NoteAttributes, NoteEvent, NoteMergeRequest};
    use crate::models::merge_request::ApprovalKey;
    use crate::services::gitlab_client::{GitLabMergeRequest, GitLabTag, GitLabUser};
    use async_trait::async_trait;
    use clap::Parser;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Recording fake for the hosting API.
    struct RecordingApi {
        author: String,
        merge_status: String,
        merge_outcome: MergeOutcome,
        merge_calls: AtomicUsize,
    }

    impl RecordingApi {
        fn new(author: &str, merge_status: &str) -> Self {
            Self {
                author: author.into(),
                merge_status: merge_status.into(),
                merge_outcome: MergeOutcome::Merged,
                merge_calls: AtomicUsize::new(0),
            }
        }

        fn merge_calls(&self) -> usize {
            self.merge_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GitLabApi for RecordingApi {
        async fn get_merge_request(
            &self,
            project_id: i64,
            mr_iid: i64,
        ) -> Result<GitLabMergeRequest, BotError> {
            Ok(GitLabMergeRequest {
                id: mr_iid,
                iid: mr_iid,
                project_id,
                title: "Test MR".into(),
                state: "opened".into(),
                merge_status: self.merge_status.clone(),
                source_branch: "feature".into(),
                target_branch: "master".into(),
                author: GitLabUser {
                    id: 1,
                    username: self.author.clone(),
                    name: "Author".into(),
                },
                web_url: String::new(),
            })
        }

        async fn accept_merge_request(
            &self,
            _project_id: i64,
            _mr_iid: i64,
            _options: MergeOptions,
        ) -> Result<MergeOutcome, BotError> {
            self.merge_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.merge_outcome)
        }

        async fn list_tags(
            &self,
            _project_id: i64,
            _search: &str,
        ) -> Result<Vec<GitLabTag>, BotError> {
            unimplemented!("not used by gate tests")
        }

        async fn create_tag(
            &self,
            _project_id: i64,
            _tag_name: &str,
            _ref_name: &str,
        ) -> Result<GitLabTag, BotError> {
            unimplemented!("not used by gate tests")
        }
    }

    fn test_config(lgtm_count: u32) -> Arc<BotConfig> {
        let count = lgtm_count.to_string();
        let args = Args::parse_from([
            "lgtm-bot",
            "--gitlab-url",
            "https://gitlab.example.com",
            "--token",
            "secret",
            "--lgtm-count",
            count.as_str(),
        ]);
        Arc::new(BotConfig::from_args(&args).unwrap())
    }

    async fn test_gate(
        api: Arc<RecordingApi>,
        lgtm_count: u32,
    ) -> (tempfile::TempDir, ApprovalGate, Arc<ApprovalStore>) {
        let dir = tempdir().unwrap();
        let pool = crate::db::initialize(&dir.path().join("test.db"))
            .await
            .unwrap();
        let store = Arc::new(ApprovalStore::new(pool));
        let gate = ApprovalGate::new(
            api,
            store.clone(),
            Arc::new(MrCache::new(None)),
            test_config(lgtm_count),
        );
        (dir, gate, store)
    }

    fn note_from(username: &str, note: &str) -> NoteEvent {
        NoteEvent {
            user: EventUser {
                username: username.into(),
                name: None,
            },
            project_id: 5,
            object_attributes: NoteAttributes {
                id: 1,
                note: note.into(),
                noteable_type: "MergeRequest".into(),
            },
            merge_request: Some(NoteMergeRequest {
                iid: 7,
                state: "opened".into(),
                merge_status: Some("can_be_merged".into()),
                target_branch: "master".into(),
                source_branch: None,
            }),
        }
    }

    #[tokio::test]
    async fn test_author_comment_never_counts() {
        let api = Arc::new(RecordingApi::new("alice", "can_be_merged"));
        let (_dir, gate, store) = test_gate(api.clone(), 1).await;

        let outcome = gate.on_note(&note_from("alice", "LGTM")).await.unwrap();
        assert_eq!(outcome, GateOutcome::SelfApproval);
        assert_eq!(store.get(&ApprovalKey::new(5, 7)).await.unwrap(), 0);
        assert_eq!(api.merge_calls(), 0);
    }

    #[tokio::test]
    async fn test_keyword_mismatch_does_not_count() {
        let api = Arc::new(RecordingApi::new("alice", "can_be_merged"));
        let (_dir, gate, store) = test_gate(api.clone(), 1).await;

        let outcome = gate
            .on_note(&note_from("bob", "looks good, LGTM"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            GateOutcome::Ignored(IgnoreReason::KeywordMismatch)
        );
        assert_eq!(store.get(&ApprovalKey::new(5, 7)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keyword_match_is_case_insensitive() {
        let api = Arc::new(RecordingApi::new("alice", "can_be_merged"));
        let (_dir, gate, store) = test_gate(api.clone(), 3).await;

        gate.on_note(&note_from("bob", "lgtm")).await.unwrap();
        gate.on_note(&note_from("carol", "Lgtm")).await.unwrap();

        assert_eq!(store.get(&ApprovalKey::new(5, 7)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_non_mr_note_is_ignored() {
        let api = Arc::new(RecordingApi::new("alice", "can_be_merged"));
        let (_dir, gate, _store) = test_gate(api.clone(), 1).await;

        let mut event = note_from("bob", "LGTM");
        event.object_attributes.noteable_type = "Commit".into();
        event.merge_request = None;

        let outcome = gate.on_note(&event).await.unwrap();
        assert_eq!(
            outcome,
            GateOutcome::Ignored(IgnoreReason::NotMergeRequestNote)
        );
    }

    #[tokio::test]
    async fn test_merge_fires_exactly_once_at_transition() {
        let api = Arc::new(RecordingApi::new("alice", "can_be_merged"));
        let (_dir, gate, _store) = test_gate(api.clone(), 2).await;

        let first = gate.on_note(&note_from("bob", "LGTM")).await.unwrap();
        assert_eq!(first, GateOutcome::Counted { count: 1 });
        assert_eq!(api.merge_calls(), 0);

        let second = gate.on_note(&note_from("carol", "LGTM")).await.unwrap();
        assert_eq!(
            second,
            GateOutcome::MergeAttempted {
                count: 2,
                outcome: MergeOutcome::Merged
            }
        );
        assert_eq!(api.merge_calls(), 1);

        // Later approvals stay satisfied but do not re-fire.
        let third = gate.on_note(&note_from("dave", "LGTM")).await.unwrap();
        assert_eq!(third, GateOutcome::Counted { count: 3 });
        assert_eq!(api.merge_calls(), 1);
    }

    #[tokio::test]
    async fn test_quorum_without_mergeable_status_skips_merge() {
        let api = Arc::new(RecordingApi::new("alice", "cannot_be_merged"));
        let (_dir, gate, _store) = test_gate(api.clone(), 1).await;

        let outcome = gate.on_note(&note_from("bob", "LGTM")).await.unwrap();
        assert_eq!(outcome, GateOutcome::QuorumNotMergeable { count: 1 });
        assert_eq!(api.merge_calls(), 0);
    }

    #[tokio::test]
    async fn test_conflict_outcome_is_not_an_error() {
        let mut inner = RecordingApi::new("alice", "can_be_merged");
        inner.merge_outcome = MergeOutcome::Conflict;
        let api = Arc::new(inner);
        let (_dir, gate, _store) = test_gate(api.clone(), 1).await;

        let outcome = gate.on_note(&note_from("bob", "LGTM")).await.unwrap();
        assert_eq!(
            outcome,
            GateOutcome::MergeAttempted {
                count: 1,
                outcome: MergeOutcome::Conflict
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_approvals_count_exactly_and_merge_once() {
        let api = Arc::new(RecordingApi::new("alice", "can_be_merged"));
        let (_dir, gate, store) = test_gate(api.clone(), 4).await;
        let gate = Arc::new(gate);

        let mut handles = Vec::new();
        for i in 0..8 {
            let gate = gate.clone();
            let event = note_from(&format!("user{}", i), "LGTM");
            handles.push(tokio::spawn(async move {
                gate.on_note(&event).await.unwrap()
            }));
        }

        let mut merges = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), GateOutcome::MergeAttempted { .. }) {
                merges += 1;
            }
        }

        assert_eq!(store.get(&ApprovalKey::new(5, 7)).await.unwrap(), 8);
        assert_eq!(merges, 1);
        assert_eq!(api.merge_calls(), 1);
    }
}
