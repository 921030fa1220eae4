//! Incremental mailbox sync into the local mirror

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::gmail::MailboxGateway;
use crate::models::{RemoteMessage, StoredMessage, SyncCursor, SyncReport};
use crate::store::MessageStore;

/// Drives deduplicated ingestion from the mailbox gateway into the store.
///
/// Stateless with respect to cursors: the caller persists the returned
/// continuation token and passes it back on the next invocation.
pub struct SyncEngine {
    mailbox: Arc<dyn MailboxGateway>,
    store: Arc<dyn MessageStore>,
    max_concurrent_fetches: usize,
}

impl SyncEngine {
    pub fn new(
        mailbox: Arc<dyn MailboxGateway>,
        store: Arc<dyn MessageStore>,
        max_concurrent_fetches: usize,
    ) -> Self {
        Self {
            mailbox,
            store,
            max_concurrent_fetches,
        }
    }

    /// Mirror one page of mailbox history.
    ///
    /// Ids already present locally are skipped. A metadata fetch or store
    /// failure for an individual message is logged and skipped without
    /// aborting the rest of the page; the message is picked up by a future
    /// sync of the same range while it remains absent.
    pub async fn sync(&self, user_id: &str, cursor: Option<&SyncCursor>) -> Result<SyncReport> {
        let page = self.mailbox.list_message_ids(cursor).await?;
        let page_len = page.ids.len();

        let mut new_ids = Vec::with_capacity(page.ids.len());
        for id in page.ids {
            if self.store.exists(user_id, &id).await? {
                debug!("Message {} already mirrored, skipping", id);
            } else {
                new_ids.push(id);
            }
        }

        let fetched: Vec<Option<RemoteMessage>> = stream::iter(new_ids)
            .map(|id| {
                let mailbox = Arc::clone(&self.mailbox);
                async move {
                    match mailbox.get_message_metadata(&id).await {
                        Ok(remote) => Some(remote),
                        Err(e) => {
                            warn!("Failed to fetch message {}: {}", id, e);
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.max_concurrent_fetches)
            .collect()
            .await;

        let mut synced_count = 0;
        for remote in fetched.into_iter().flatten() {
            let message = StoredMessage::from_remote(user_id, remote);
            match self.store.insert_if_absent(&message).await {
                // A lost insert race means another sync got there first;
                // the message is present either way
                Ok(true) => synced_count += 1,
                Ok(false) => debug!("Message {} inserted concurrently, skipping", message.id),
                Err(e) => warn!("Failed to store message {}: {}", message.id, e),
            }
        }

        info!(
            "Synced {} of {} listed messages for {}",
            synced_count, page_len, user_id
        );

        Ok(SyncReport {
            synced_count,
            next_cursor: page.next_page_token,
        })
    }
}
