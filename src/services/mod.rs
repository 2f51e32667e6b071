//! Business logic services.
//!
//! The two engines (approval gate, auto-tag), the state they own (snapshot
//! cache, tagged set), the GitLab API client they call, and the inbound
//! surface (dispatcher + webhook server).

pub mod approval_gate;
pub mod auto_tag;
pub mod dispatcher;
pub mod gitlab_client;
pub mod mr_cache;
pub mod protect;
pub mod webhook;

pub use approval_gate::{ApprovalGate, GateOutcome};
pub use auto_tag::{AutoTagEngine, TagOutcome, TaggedSet};
pub use dispatcher::DispatchHandle;
pub use gitlab_client::{GitLabApi, GitLabClient, GitLabClientConfig, MergeOutcome};
pub use mr_cache::MrCache;
