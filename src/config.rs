//! Runtime configuration.
//!
//! Flags mirror the original deployment knobs: approval keyword and count,
//! protected branch/tag patterns, versioning defaults, and the worker pool
//! bounds. Values come from the command line with environment fallbacks.

use crate::error::BotError;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "lgtm-bot", about = "GitLab approval-gate and auto-tag webhook bot")]
pub struct Args {
    /// Base URL of the GitLab instance (e.g. https://your.gitlab.com).
    #[arg(long, env = "GITLAB_URL")]
    pub gitlab_url: String,

    /// Personal access token used to merge requests and create tags.
    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
    pub token: String,

    /// HTTP listen port for the webhook endpoint.
    #[arg(long, default_value_t = 8989)]
    pub port: u16,

    /// Path to the SQLite file holding the approval counters.
    #[arg(long, default_value = "lgtm.db")]
    pub db_path: String,

    /// Approval keyword matched case-insensitively against comment bodies.
    #[arg(long, default_value = "LGTM")]
    pub lgtm_note: String,

    /// Number of approval comments required before auto-merging.
    #[arg(long, default_value_t = 2)]
    pub lgtm_count: u32,

    /// Comma-separated protected branch patterns (exact or trailing "*").
    #[arg(long, default_value = "master,release-*")]
    pub protected_branches: String,

    /// Comma-separated protected tag patterns.
    #[arg(long, default_value = "v*")]
    pub protected_tags: String,

    /// Tag created for a branch that has no matching tag yet.
    #[arg(long, default_value = "v0.1.0")]
    pub initial_version: String,

    /// Branch whose tags carry no branch-name prefix.
    #[arg(long, default_value = "master")]
    pub main_branch: String,

    /// Do not squash commits when auto-merging.
    #[arg(long)]
    pub no_squash: bool,

    /// Do not remove the source branch when auto-merging.
    #[arg(long)]
    pub no_remove_source_branch: bool,

    /// Number of event worker tasks.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Capacity of the event queue; events past this bound are dropped.
    #[arg(long, default_value_t = 64)]
    pub queue_capacity: usize,

    /// Seconds before a cached merge-request snapshot is refetched.
    /// Unset means snapshots are never refreshed once cached.
    #[arg(long)]
    pub snapshot_ttl_secs: Option<u64>,

    /// Outbound GitLab API request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,
}

/// Validated configuration shared by the engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Approval keyword, compared case-insensitively as a whole.
    pub lgtm_note: String,

    /// Required approval count (quorum threshold).
    pub lgtm_count: u32,

    /// Branch patterns eligible for gating and tagging.
    pub protected_branches: BranchPatterns,

    /// Tag patterns used by the protection sweep.
    pub protected_tags: BranchPatterns,

    /// Tag created when a branch has no matching tag yet.
    pub initial_version: String,

    /// Branch whose tags carry no branch-name prefix.
    pub main_branch: String,

    /// Squash commits when auto-merging.
    pub squash: bool,

    /// Remove the source branch when auto-merging.
    pub remove_source_branch: bool,

    /// Snapshot refresh interval; `None` keeps snapshots for the process
    /// lifetime (a cached merge status can go stale).
    pub snapshot_ttl: Option<Duration>,
}

impl BotConfig {
    /// Build and validate the runtime configuration from parsed arguments.
    pub fn from_args(args: &Args) -> Result<Self, BotError> {
        if args.lgtm_count == 0 {
            return Err(BotError::invalid_input_field(
                "approval count must be positive",
                "lgtm_count",
            ));
        }
        if args.lgtm_note.trim().is_empty() {
            return Err(BotError::invalid_input_field(
                "approval keyword must not be empty",
                "lgtm_note",
            ));
        }

        Ok(Self {
            lgtm_note: args.lgtm_note.clone(),
            lgtm_count: args.lgtm_count,
            protected_branches: BranchPatterns::parse(&args.protected_branches),
            protected_tags: BranchPatterns::parse(&args.protected_tags),
            initial_version: args.initial_version.clone(),
            main_branch: args.main_branch.clone(),
            squash: !args.no_squash,
            remove_source_branch: !args.no_remove_source_branch,
            snapshot_ttl: args.snapshot_ttl_secs.map(Duration::from_secs),
        })
    }

    /// Whether a comment body matches the approval keyword.
    ///
    /// Case-insensitive equality over the whole body, not a substring match.
    pub fn is_approval_note(&self, body: &str) -> bool {
        body.eq_ignore_ascii_case(&self.lgtm_note)
    }
}

/// Ordered list of branch/tag name patterns.
///
/// A pattern is either an exact name or a prefix glob ending in `*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchPatterns(Vec<String>);

impl BranchPatterns {
    /// Parse a comma-separated pattern list. Empty segments are skipped.
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    /// Whether `name` matches any configured pattern.
    pub fn matches(&self, name: &str) -> bool {
        self.0.iter().any(|p| match p.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => p == name,
        })
    }

    /// Iterate over the raw pattern strings.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_args() -> Args {
        Args::parse_from([
            "lgtm-bot",
            "--gitlab-url",
            "https://gitlab.example.com",
            "--token",
            "secret",
        ])
    }

    #[test]
    fn test_prefix_glob_matching() {
        let patterns = BranchPatterns::parse("master,release-*");
        assert!(patterns.matches("master"));
        assert!(patterns.matches("release-v1.1"));
        assert!(patterns.matches("release-tx"));
        assert!(!patterns.matches("relea999"));
        assert!(!patterns.matches("masterpiece"));
    }

    #[test]
    fn test_exact_matching_only_for_plain_patterns() {
        let patterns = BranchPatterns::parse("master");
        assert!(patterns.matches("master"));
        assert!(!patterns.matches("master-2"));
    }

    #[test]
    fn test_parse_skips_empty_segments() {
        let patterns = BranchPatterns::parse("main, ,release-*,");
        assert!(patterns.matches("main"));
        assert!(patterns.matches("release-1"));
        assert_eq!(patterns.iter().count(), 2);
    }

    #[test]
    fn test_defaults() {
        let config = BotConfig::from_args(&test_args()).unwrap();
        assert_eq!(config.lgtm_note, "LGTM");
        assert_eq!(config.lgtm_count, 2);
        assert_eq!(config.main_branch, "master");
        assert_eq!(config.initial_version, "v0.1.0");
        assert!(config.squash);
        assert!(config.remove_source_branch);
        assert!(config.snapshot_ttl.is_none());
    }

    #[test]
    fn test_zero_count_rejected() {
        let mut args = test_args();
        args.lgtm_count = 0;
        assert!(BotConfig::from_args(&args).is_err());
    }

    #[test]
    fn test_approval_note_is_case_insensitive_equality() {
        let config = BotConfig::from_args(&test_args()).unwrap();
        assert!(config.is_approval_note("lgtm"));
        assert!(config.is_approval_note("Lgtm"));
        assert!(!config.is_approval_note("lgtm!"));
        assert!(!config.is_approval_note("looks good, lgtm"));
    }
}
