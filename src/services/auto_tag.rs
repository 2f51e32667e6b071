//! Auto-tag engine.
//!
//! Consumes completed-merge events for protected branches, derives the next
//! semantic-version tag from the current highest matching tag, and creates
//! it. Redelivered merge events are absorbed by an in-memory tagged set.
//!
//! Tag naming: the designated main branch gets bare `vX.Y.Z` tags; any other
//! eligible branch gets `<branch>-vX.Y.Z`.

use crate::config::BotConfig;
use crate::error::BotError;
use crate::models::event::MergeEvent;
use crate::models::merge_request::ApprovalKey;
use crate::services::gitlab_client::GitLabApi;
use semver::Version;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Tagging state of a merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagState {
    /// A worker is currently creating the tag.
    InFlight,

    /// The tag was created.
    Tagged,
}

/// In-memory set of merge requests already auto-tagged.
///
/// The lock is held only for map operations, never across network calls.
/// A key is claimed (in-flight) before the tag lookup starts, finalized
/// after the tag is created, and released again on any failure so a retry
/// webhook can still succeed. Process-lifetime only: a restart forgets the
/// set, and redelivery after a restart falls through to GitLab's own
/// duplicate-tag rejection.
#[derive(Default)]
pub struct TaggedSet {
    entries: Mutex<HashMap<ApprovalKey, TagState>>,
}

impl TaggedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for tagging. Returns false if it is already tagged or
    /// another worker is mid-flight.
    pub async fn begin(&self, key: ApprovalKey) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(&key) {
            Some(_) => false,
            None => {
                entries.insert(key, TagState::InFlight);
                true
            }
        }
    }

    /// Mark a claimed key as tagged.
    pub async fn complete(&self, key: ApprovalKey) {
        self.entries.lock().await.insert(key, TagState::Tagged);
    }

    /// Release a claimed key after a failure, keeping retries possible.
    pub async fn abandon(&self, key: ApprovalKey) {
        let mut entries = self.entries.lock().await;
        if entries.get(&key) == Some(&TagState::InFlight) {
            entries.remove(&key);
        }
    }

    /// Whether `key` has been tagged.
    pub async fn is_tagged(&self, key: &ApprovalKey) -> bool {
        self.entries.lock().await.get(key) == Some(&TagState::Tagged)
    }
}

/// Why a merge event was discarded without creating a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagIgnoreReason {
    /// The event action is not a completed merge.
    NotCompletedMerge,

    /// The target branch matches no protected-branch pattern.
    BranchNotProtected,

    /// This merge request was already tagged (or is being tagged).
    AlreadyTagged,
}

/// Result of processing one merge event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOutcome {
    /// Filtered without any state change.
    Ignored(TagIgnoreReason),

    /// A tag with this name was created.
    Tagged { name: String },
}

/// The auto-tag engine. One instance is shared by all worker tasks.
pub struct AutoTagEngine {
    api: Arc<dyn GitLabApi>,
    tagged: TaggedSet,
    config: Arc<BotConfig>,
}

impl AutoTagEngine {
    /// Create an engine over the injected API client.
    pub fn new(api: Arc<dyn GitLabApi>, config: Arc<BotConfig>) -> Self {
        Self {
            api,
            tagged: TaggedSet::new(),
            config,
        }
    }

    /// Process one merge event. Idempotent per merge request.
    pub async fn on_merge(&self, event: &MergeEvent) -> Result<TagOutcome, BotError> {
        if !event.is_completed_merge() {
            return Ok(TagOutcome::Ignored(TagIgnoreReason::NotCompletedMerge));
        }

        let branch = event.object_attributes.target_branch.as_str();
        if !self.config.protected_branches.matches(branch) {
            return Ok(TagOutcome::Ignored(TagIgnoreReason::BranchNotProtected));
        }

        let key = event.key();
        if !self.tagged.begin(key).await {
            info!(mr = %key, "merge request is tagged already");
            return Ok(TagOutcome::Ignored(TagIgnoreReason::AlreadyTagged));
        }

        match self.tag_branch(&key, branch).await {
            Ok(name) => {
                self.tagged.complete(key).await;
                info!(mr = %key, branch, tag = %name, "tag created");
                Ok(TagOutcome::Tagged { name })
            }
            Err(e) => {
                // Leave the key unclaimed so a retried webhook can succeed.
                self.tagged.abandon(key).await;
                error!(mr = %key, branch, "tagging failed: {}", e);
                Err(e)
            }
        }
    }

    /// Look up the current highest matching tag and create the next one.
    async fn tag_branch(&self, key: &ApprovalKey, branch: &str) -> Result<String, BotError> {
        let search = tag_search_pattern(branch, &self.config.main_branch);
        let tags = self.api.list_tags(key.project_id, &search).await?;

        let current = tags.first().map(|t| t.name.as_str()).unwrap_or("");
        let next = next_tag(
            branch,
            current,
            &self.config.main_branch,
            &self.config.initial_version,
        )?;

        self.api.create_tag(key.project_id, &next, branch).await?;
        Ok(next)
    }
}

/// Name-search pattern for the current tags of a branch: `^v` for the main
/// branch, `^<branch>-v` for any other.
pub fn tag_search_pattern(branch: &str, main_branch: &str) -> String {
    if branch == main_branch {
        "^v".to_string()
    } else {
        format!("^{}-v", branch)
    }
}

/// Compute the next tag name for `branch` from the current highest tag.
///
/// Strips the branch prefix if present, increments the patch component of
/// the remaining semantic version, and re-applies the prefix. An empty
/// `current` yields `<prefix><initial_version>`. A current tag that does not
/// parse as a (tolerant) semantic version is an error; no fallback guess.
pub fn next_tag(
    branch: &str,
    current: &str,
    main_branch: &str,
    initial_version: &str,
) -> Result<String, BotError> {
    let prefix = if branch == main_branch {
        String::new()
    } else {
        format!("{}-", branch)
    };

    let bare = current.strip_prefix(&prefix).unwrap_or(current);
    if bare.is_empty() {
        return Ok(format!("{}{}", prefix, initial_version));
    }

    let version = parse_tolerant(bare)?;
    Ok(format!(
        "{}v{}.{}.{}",
        prefix,
        version.major,
        version.minor,
        version.patch + 1
    ))
}

/// Parse a version string, tolerating a leading `v` and missing minor/patch
/// components ("v1.2" parses as 1.2.0). Validation is delegated to
/// `semver::Version` after normalization.
fn parse_tolerant(input: &str) -> Result<Version, BotError> {
    let trimmed = input.trim();
    let bare = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    // Split the numeric core from any prerelease/build suffix.
    let suffix_at = bare.find(['-', '+']);
    let (core, suffix) = match suffix_at {
        Some(idx) => bare.split_at(idx),
        None => (bare, ""),
    };

    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(BotError::version_parse(input));
    }
    if parts.iter().any(|p| p.is_empty()) {
        return Err(BotError::version_parse(input));
    }
    while parts.len() < 3 {
        parts.push("0");
    }

    let candidate = format!("{}{}", parts.join("."), suffix);
    Version::parse(&candidate).map_err(|_| BotError::version_parse(input))
}
