//! Bulk archive/delete reconciliation between the mailbox and the local mirror

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, TriageError};
use crate::gmail::MailboxGateway;
use crate::models::{BatchAction, BatchActionReport};
use crate::store::MessageStore;

const TRASH_LABEL: &str = "TRASH";
const INBOX_LABEL: &str = "INBOX";

/// Applies a bulk remote mutation, then aligns the local mirror.
///
/// The remote mailbox is the source of truth: local rows are removed only
/// after the remote call succeeds, so the mirror never runs ahead of remote
/// state.
pub struct ReconciliationEngine {
    mailbox: Arc<dyn MailboxGateway>,
    store: Arc<dyn MessageStore>,
}

impl ReconciliationEngine {
    pub fn new(mailbox: Arc<dyn MailboxGateway>, store: Arc<dyn MessageStore>) -> Self {
        Self { mailbox, store }
    }

    /// Archive or delete a batch of messages remotely, then drop them from
    /// the mirror.
    ///
    /// Validation failures (empty id set) are rejected before any remote
    /// call. A remote failure is surfaced with no local mutation. A local
    /// delete failure after remote success is logged and the operation still
    /// reports success; the next sync pass heals the stale rows.
    pub async fn apply_batch_action(
        &self,
        user_id: &str,
        ids: &[String],
        action: BatchAction,
    ) -> Result<BatchActionReport> {
        if ids.is_empty() {
            return Err(TriageError::BadRequest(
                "Batch action requires at least one message id".to_string(),
            ));
        }

        let (add_labels, remove_labels) = match action {
            BatchAction::Delete => (
                vec![TRASH_LABEL.to_string()],
                vec![INBOX_LABEL.to_string()],
            ),
            BatchAction::Archive => (Vec::new(), vec![INBOX_LABEL.to_string()]),
        };

        self.mailbox
            .batch_modify_labels(ids, &add_labels, &remove_labels)
            .await?;

        match self.store.delete_many(user_id, ids).await {
            Ok(removed) => info!(
                "Applied {} to {} messages for {} ({} removed locally)",
                action,
                ids.len(),
                user_id,
                removed
            ),
            Err(e) => warn!(
                "Remote {} succeeded but local delete failed for {}: {}; \
                 the next sync pass will reconcile",
                action, user_id, e
            ),
        }

        Ok(BatchActionReport {
            success: true,
            count: ids.len(),
        })
    }
}
