//! Event dispatcher.
//!
//! Routes decoded webhook events to the approval gate or the auto-tag
//! engine. Instead of spawning one task per delivery, events go through a
//! bounded queue drained by a fixed pool of workers, so a webhook burst
//! cannot create unbounded concurrent GitLab calls. Submission never blocks
//! the webhook response: when the queue is full the event is dropped with a
//! warning.

use crate::models::event::WebhookEvent;
use crate::services::approval_gate::ApprovalGate;
use crate::services::auto_tag::AutoTagEngine;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Lightweight clone-able handle for submitting events to the worker pool.
///
/// Workers stop once every handle is dropped and the queue drains.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<WebhookEvent>,
}

impl DispatchHandle {
    /// Submit an event for asynchronous processing.
    ///
    /// Returns false if the event was dropped (queue full or workers gone).
    /// Either way the webhook has already been acknowledged; business
    /// outcomes are never surfaced synchronously.
    pub fn submit(&self, event: WebhookEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(kind = event.kind(), "event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                error!(kind = event.kind(), "event workers stopped, dropping event");
                false
            }
        }
    }
}

/// Start `workers` worker tasks over a queue of `capacity` events.
pub fn start(
    gate: Arc<ApprovalGate>,
    tagger: Arc<AutoTagEngine>,
    workers: usize,
    capacity: usize,
) -> DispatchHandle {
    let (tx, rx) = mpsc::channel::<WebhookEvent>(capacity.max(1));
    let rx = Arc::new(Mutex::new(rx));

    for worker_id in 0..workers.max(1) {
        let rx = rx.clone();
        let gate = gate.clone();
        let tagger = tagger.clone();

        tokio::spawn(async move {
            loop {
                // Hold the receiver lock only while waiting for the next
                // event, not while processing it.
                let event = { rx.lock().await.recv().await };
                let Some(event) = event else { break };

                handle_event(worker_id, &gate, &tagger, event).await;
            }
            debug!(worker_id, "event worker stopped");
        });
    }

    DispatchHandle { tx }
}

/// Process one event; engine errors are terminal for the event and logged.
async fn handle_event(
    worker_id: usize,
    gate: &ApprovalGate,
    tagger: &AutoTagEngine,
    event: WebhookEvent,
) {
    match event {
        WebhookEvent::Note(note) => match gate.on_note(&note).await {
            Ok(outcome) => debug!(worker_id, ?outcome, "note event processed"),
            Err(e) => error!(worker_id, "note event failed: {}", e),
        },
        WebhookEvent::Merge(merge) => match tagger.on_merge(&merge).await {
            Ok(outcome) => debug!(worker_id, ?outcome, "merge event processed"),
            Err(e) => error!(worker_id, "merge event failed: {}", e),
        },
        WebhookEvent::Other(kind) => debug!(worker_id, kind, "ignoring event kind"),
    }
}
