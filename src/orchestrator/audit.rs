//! Fire-and-forget audit writer.
//!
//! Backed by a bounded `mpsc` channel and a single background task. A full
//! queue drops the entry rather than back-pressuring the driver that produced
//! it — audit writes are best-effort by contract (SPEC_FULL.md §9).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model::AuditEntry;
use crate::store::StoreAdapter;

const QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditWriter {
    /// Spawn the background writer task. The returned `JoinHandle` resolves once
    /// every sender clone is dropped and the queue has drained — callers await it
    /// at the end of an invocation to give in-flight writes a chance to land.
    pub fn spawn(store: Arc<dyn StoreAdapter>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = store.append_audit(&entry).await {
                    tracing::warn!(error = %e, event_type = %entry.event_type, "failed to append audit entry");
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Enqueue an entry. Never blocks; drops and logs on a full or closed queue.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.tx.try_send(entry) {
            tracing::warn!(error = %e, "audit queue full or closed, dropping entry");
        }
    }

    pub fn sender(&self) -> mpsc::Sender<AuditEntry> {
        self.tx.clone()
    }
}
