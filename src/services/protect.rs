//! Branch and tag protection sweep.
//!
//! Applies the configured protection rules to one project: protected
//! branches get push access "no one" / merge access "developer", protected
//! tags get create access "developer". Per-item failures (a rule that is
//! already applied, a missing permission) are logged and skipped so one bad
//! pattern does not abort the sweep.

use crate::config::BotConfig;
use crate::services::gitlab_client::{GitLabClient, ACCESS_DEVELOPER, ACCESS_NO_ONE};
use futures::future::join_all;
use tracing::{info, warn};

/// Apply all configured protection rules to `project_id`.
pub async fn protect_branches_and_tags(client: &GitLabClient, project_id: i64, config: &BotConfig) {
    info!(
        project_id,
        branches = %config.protected_branches.iter().collect::<Vec<_>>().join(","),
        tags = %config.protected_tags.iter().collect::<Vec<_>>().join(","),
        "applying protection rules"
    );

    let branch_rules = config.protected_branches.iter().map(|pattern| async move {
        if let Err(e) = client
            .protect_branch(project_id, pattern, ACCESS_NO_ONE, ACCESS_DEVELOPER)
            .await
        {
            warn!(project_id, branch = pattern, "branch protection failed: {}", e);
        }
    });
    join_all(branch_rules).await;

    let tag_rules = config.protected_tags.iter().map(|pattern| async move {
        if let Err(e) = client
            .protect_tag(project_id, pattern, ACCESS_DEVELOPER)
            .await
        {
            warn!(project_id, tag = pattern, "tag protection failed: {}", e);
        }
    });
    join_all(tag_rules).await;
}
