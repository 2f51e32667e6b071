//! Data models for the bot.
//!
//! Webhook payload types decoded once by the event router, and the
//! merge-request key/snapshot types shared by the counter store, the
//! in-memory cache and the tagged set.

pub mod event;
pub mod merge_request;

// Re-exports for convenient access
pub use event::{MergeEvent, NoteEvent, WebhookEvent};
pub use merge_request::{ApprovalKey, MrSnapshot};
