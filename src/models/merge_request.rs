//! Merge-request key and snapshot models.

use serde::{Deserialize, Serialize};

/// Merge status string GitLab reports for a mergeable MR.
pub const STATUS_CAN_BE_MERGED: &str = "can_be_merged";

/// Identifies one merge request: GitLab project ID plus the project-scoped
/// MR number. Counter rows, cache entries and tagged-set entries are all
/// keyed by this pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalKey {
    /// GitLab project ID.
    pub project_id: i64,

    /// Project-scoped MR number (IID).
    pub mr_iid: i64,
}

impl ApprovalKey {
    pub fn new(project_id: i64, mr_iid: i64) -> Self {
        Self { project_id, mr_iid }
    }
}

impl std::fmt::Display for ApprovalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "projects/{}/merge_requests/{}",
            self.project_id, self.mr_iid
        )
    }
}

/// Cached merge-request metadata.
///
/// Populated lazily from the GitLab API on cache miss. Entries are not
/// invalidated on MR updates unless a refresh TTL is configured, so the
/// merge status can lag behind GitLab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MrSnapshot {
    /// Username of the MR author.
    pub author_username: String,

    /// Merge status string: `can_be_merged`, `cannot_be_merged`, ...
    pub merge_status: String,

    /// Destination branch.
    pub target_branch: String,
}

impl MrSnapshot {
    /// Whether GitLab reported the MR as mergeable when this snapshot was
    /// taken.
    pub fn can_be_merged(&self) -> bool {
        self.merge_status == STATUS_CAN_BE_MERGED
    }
}
