//! Webhook event payloads.
//!
//! GitLab delivers every hook as JSON with an `object_kind` discriminator.
//! The router decodes the body exactly once into a closed [`WebhookEvent`]
//! variant; the engines never see raw JSON.

use crate::error::BotError;
use crate::models::merge_request::ApprovalKey;
use serde::{Deserialize, Serialize};

/// `object_kind` of a comment hook.
pub const OBJECT_KIND_NOTE: &str = "note";

/// `object_kind` of a merge-request hook.
pub const OBJECT_KIND_MERGE_REQUEST: &str = "merge_request";

/// `noteable_type` of a comment placed on a merge request.
pub const NOTEABLE_MERGE_REQUEST: &str = "MergeRequest";

/// `action` of a merge-request hook fired by a completed merge.
pub const ACTION_MERGE: &str = "merge";

/// A decoded webhook delivery.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    /// A comment (`object_kind: note`).
    Note(NoteEvent),

    /// A merge-request state change (`object_kind: merge_request`).
    Merge(MergeEvent),

    /// Any other kind GitLab may deliver; accepted and ignored.
    Other(String),
}

impl WebhookEvent {
    /// Decode a raw webhook body.
    ///
    /// A body that is not JSON, lacks `object_kind`, or fails to decode as
    /// its declared kind is a structural error (the webhook receives a 400).
    /// Kinds the bot does not handle decode to [`WebhookEvent::Other`].
    pub fn parse(body: &[u8]) -> Result<Self, BotError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| BotError::invalid_input(format!("invalid request body: {}", e)))?;

        let kind = value
            .get("object_kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| BotError::invalid_input_field("missing object_kind", "object_kind"))?
            .to_string();

        if kind == OBJECT_KIND_NOTE {
            serde_json::from_value(value)
                .map(Self::Note)
                .map_err(|e| BotError::invalid_input(format!("malformed note event: {}", e)))
        } else if kind == OBJECT_KIND_MERGE_REQUEST {
            serde_json::from_value(value)
                .map(Self::Merge)
                .map_err(|e| BotError::invalid_input(format!("malformed merge event: {}", e)))
        } else {
            Ok(Self::Other(kind))
        }
    }

    /// The `object_kind` this event was delivered as.
    pub fn kind(&self) -> &str {
        match self {
            Self::Note(_) => OBJECT_KIND_NOTE,
            Self::Merge(_) => OBJECT_KIND_MERGE_REQUEST,
            Self::Other(kind) => kind,
        }
    }
}

/// The user who triggered a hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventUser {
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Project block of a hook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventProject {
    pub id: i64,
    #[serde(default)]
    pub path_with_namespace: Option<String>,
}

/// Comment hook payload (trimmed to the fields the bot reads).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteEvent {
    pub user: EventUser,
    pub project_id: i64,
    pub object_attributes: NoteAttributes,
    /// Present only when the note targets a merge request.
    #[serde(default)]
    pub merge_request: Option<NoteMergeRequest>,
}

/// `object_attributes` of a comment hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteAttributes {
    pub id: i64,
    pub note: String,
    pub noteable_type: String,
}

/// The `merge_request` block embedded in a comment hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteMergeRequest {
    pub iid: i64,
    pub state: String,
    #[serde(default)]
    pub merge_status: Option<String>,
    pub target_branch: String,
    #[serde(default)]
    pub source_branch: Option<String>,
}

impl NoteEvent {
    /// Whether the comment was placed on a merge request.
    pub fn is_merge_request_note(&self) -> bool {
        self.object_attributes.noteable_type == NOTEABLE_MERGE_REQUEST
            && self.merge_request.is_some()
    }

    /// Counter/cache key for the commented merge request, if any.
    pub fn key(&self) -> Option<ApprovalKey> {
        self.merge_request
            .as_ref()
            .map(|mr| ApprovalKey::new(self.project_id, mr.iid))
    }
}

/// Merge-request hook payload (trimmed to the fields the bot reads).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeEvent {
    pub user: EventUser,
    pub project: EventProject,
    pub object_attributes: MergeAttributes,
}

/// `object_attributes` of a merge-request hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeAttributes {
    pub id: i64,
    pub iid: i64,
    /// `open`, `update`, `merge`, `close`, ... Absent on some older hooks.
    #[serde(default)]
    pub action: Option<String>,
    pub state: String,
    pub target_branch: String,
    #[serde(default)]
    pub source_branch: Option<String>,
}

impl MergeEvent {
    /// Whether this hook was fired by a completed merge.
    pub fn is_completed_merge(&self) -> bool {
        self.object_attributes.action.as_deref() == Some(ACTION_MERGE)
    }

    /// Counter/tagged-set key for the merged merge request.
    pub fn key(&self) -> ApprovalKey {
        ApprovalKey::new(self.project.id, self.object_attributes.iid)
    }
}
