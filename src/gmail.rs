//! Gmail mailbox gateway with rate limiting and retry logic

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_gmail1::{
    api::{BatchModifyMessagesRequest, Message},
    hyper_rustls, hyper_util, Gmail,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{Result, TriageError};
use crate::models::{MessagePage, RemoteMessage, SyncCursor};

/// Scope used for all mailbox calls (read + label mutation, no permanent deletion)
pub const MAILBOX_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Type alias for the Gmail hub to simplify signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// External mailbox capability the engines call into.
///
/// Implementations own the credential for the user they serve; engines
/// receive a gateway per call and never read ambient auth state.
#[async_trait]
pub trait MailboxGateway: Send + Sync {
    /// List one page of message ids, newest first.
    ///
    /// `page_token` resumes from where a previous page left off; absent
    /// means the most recent page. The returned token is handed back to the
    /// caller unchanged.
    async fn list_message_ids(&self, page_token: Option<&SyncCursor>) -> Result<MessagePage>;

    /// Fetch From/Subject/Date metadata and the snippet for a single message
    async fn get_message_metadata(&self, id: &str) -> Result<RemoteMessage>;

    /// Add and remove labels on multiple messages in one bulk mutation
    async fn batch_modify_labels(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()>;
}

/// Production Gmail gateway
///
/// This implementation includes:
/// - Semaphore-based rate limiting for metadata fan-out
/// - Exponential backoff retry for transient transport errors
///
/// The engines themselves never retry; backoff here is a transport concern.
pub struct GmailMailbox {
    hub: GmailHub,
    rate_limiter: Arc<Semaphore>,
    page_size: u32,
}

impl GmailMailbox {
    /// Create a new gateway around an authenticated hub
    ///
    /// # Arguments
    /// * `hub` - Gmail API hub instance
    /// * `max_concurrent` - Maximum concurrent metadata requests
    /// * `page_size` - Ids requested per listing page
    pub fn new(hub: GmailHub, max_concurrent: usize, page_size: u32) -> Self {
        Self {
            hub,
            rate_limiter: Arc::new(Semaphore::new(max_concurrent)),
            page_size,
        }
    }

    /// Check if an error is retryable
    fn should_retry(error: &TriageError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch a single message with rate limiting and retry
    async fn fetch_single_with_retry(&self, id: &str) -> Result<RemoteMessage> {
        let _permit = self.rate_limiter.acquire().await.map_err(|e| {
            TriageError::Unknown(format!("Failed to acquire rate limit permit: {}", e))
        })?;

        Self::with_retry("get_message_metadata", 3, || async {
            let (_, msg) = self
                .hub
                .users()
                .messages_get("me", id)
                .format("metadata")
                .add_metadata_headers("From")
                .add_metadata_headers("Subject")
                .add_metadata_headers("Date")
                .add_scope(MAILBOX_SCOPE)
                .doit()
                .await?;

            parse_remote_message(msg)
        })
        .await
    }
}

/// Parse a Gmail API Message into gateway metadata
fn parse_remote_message(msg: Message) -> Result<RemoteMessage> {
    let id = msg
        .id
        .ok_or_else(|| TriageError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let snippet = msg.snippet.unwrap_or_default();

    let mut from = String::new();
    let mut subject = String::new();
    let mut date_str = String::new();

    if let Some(headers) = msg.payload.as_ref().and_then(|p| p.headers.as_ref()) {
        for header in headers {
            if let (Some(name), Some(value)) = (&header.name, &header.value) {
                match name.to_lowercase().as_str() {
                    "from" => from = value.clone(),
                    "subject" => subject = value.clone(),
                    "date" => date_str = value.clone(),
                    _ => {}
                }
            }
        }
    }

    // The ingestion-time fallback for unparsable dates belongs to the sync
    // engine, so an invalid header surfaces here as None
    let date = parse_date(&date_str).ok();

    Ok(RemoteMessage {
        id,
        from,
        subject,
        snippet,
        date,
    })
}

/// Parse RFC 2822 date string with an RFC 3339 fallback
fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| DateTime::parse_from_rfc3339(date_str).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| TriageError::InvalidMessageFormat(format!("Invalid date format: {}", e)))
}

#[async_trait]
impl MailboxGateway for GmailMailbox {
    async fn list_message_ids(&self, page_token: Option<&SyncCursor>) -> Result<MessagePage> {
        Self::with_retry("list_message_ids", 3, || async {
            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .max_results(self.page_size);

            if let Some(token) = page_token {
                call = call.page_token(token.as_str());
            }

            let (_, response) = call.add_scope(MAILBOX_SCOPE).doit().await?;

            let ids: Vec<String> = response
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|msg_ref| msg_ref.id)
                .collect();

            debug!("Listed {} message ids", ids.len());

            Ok(MessagePage {
                ids,
                next_page_token: response.next_page_token.map(SyncCursor::new),
            })
        })
        .await
    }

    async fn get_message_metadata(&self, id: &str) -> Result<RemoteMessage> {
        self.fetch_single_with_retry(id).await
    }

    async fn batch_modify_labels(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        // Gmail API allows up to 1000 messages per batch request
        const BATCH_SIZE: usize = 1000;

        let add_labels = if add_label_ids.is_empty() {
            None
        } else {
            Some(add_label_ids.to_vec())
        };

        let remove_labels = if remove_label_ids.is_empty() {
            None
        } else {
            Some(remove_label_ids.to_vec())
        };

        for chunk in ids.chunks(BATCH_SIZE) {
            let chunk_vec = chunk.to_vec();
            let add_labels_clone = add_labels.clone();
            let remove_labels_clone = remove_labels.clone();

            Self::with_retry("batch_modify_labels", 3, || async {
                let request = BatchModifyMessagesRequest {
                    ids: Some(chunk_vec.clone()),
                    add_label_ids: add_labels_clone.clone(),
                    remove_label_ids: remove_labels_clone.clone(),
                };

                self.hub
                    .users()
                    .messages_batch_modify(request, "me")
                    .add_scope(MAILBOX_SCOPE)
                    .doit()
                    .await?;

                Ok(())
            })
            .await?;

            debug!("Batch modified labels on {} messages", chunk.len());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePart, MessagePartHeader};

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    fn metadata_message(id: &str, headers: Vec<MessagePartHeader>) -> Message {
        Message {
            id: Some(id.to_string()),
            snippet: Some("Snippet text...".to_string()),
            payload: Some(MessagePart {
                headers: Some(headers),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_should_retry_transient_errors() {
        let server_error = TriageError::ServerError {
            status: 500,
            message: "Internal error".to_string(),
        };
        assert!(GmailMailbox::should_retry(&server_error));

        let rate_limit = TriageError::RateLimitExceeded { retry_after: 5 };
        assert!(GmailMailbox::should_retry(&rate_limit));

        let network = TriageError::NetworkError("connection reset".to_string());
        assert!(GmailMailbox::should_retry(&network));
    }

    #[test]
    fn test_should_not_retry_permanent_errors() {
        let auth = TriageError::AuthError("invalid token".to_string());
        assert!(!GmailMailbox::should_retry(&auth));

        let bad_request = TriageError::BadRequest("invalid page token".to_string());
        assert!(!GmailMailbox::should_retry(&bad_request));
    }

    #[test]
    fn test_parse_date() {
        let result = parse_date("Mon, 24 Nov 2025 10:30:00 +0000");
        assert!(result.is_ok());

        let result = parse_date("2025-11-24T10:30:00+00:00");
        assert!(result.is_ok());

        assert!(parse_date("next tuesday").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn test_parse_remote_message() {
        let msg = metadata_message(
            "m123",
            vec![
                header("From", "Alice <alice@example.com>"),
                header("Subject", "Quarterly report"),
                header("Date", "Mon, 24 Nov 2025 10:30:00 +0000"),
            ],
        );

        let remote = parse_remote_message(msg).unwrap();
        assert_eq!(remote.id, "m123");
        assert_eq!(remote.from, "Alice <alice@example.com>");
        assert_eq!(remote.subject, "Quarterly report");
        assert_eq!(remote.snippet, "Snippet text...");
        assert!(remote.date.is_some());
    }

    #[test]
    fn test_parse_remote_message_unparsable_date() {
        let msg = metadata_message(
            "m124",
            vec![
                header("From", "bob@example.com"),
                header("Subject", "No usable date"),
                header("Date", "not a date"),
            ],
        );

        let remote = parse_remote_message(msg).unwrap();
        // Fallback to ingestion time happens in the sync engine, not here
        assert!(remote.date.is_none());
    }

    #[test]
    fn test_parse_remote_message_missing_headers() {
        let msg = Message {
            id: Some("m125".to_string()),
            ..Default::default()
        };

        let remote = parse_remote_message(msg).unwrap();
        assert_eq!(remote.from, "");
        assert_eq!(remote.subject, "");
        assert_eq!(remote.snippet, "");
        assert!(remote.date.is_none());
    }

    #[test]
    fn test_parse_remote_message_missing_id() {
        let msg = Message::default();
        assert!(parse_remote_message(msg).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_succeeds_after_transient_error() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailbox::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                let current = count.fetch_add(1, Ordering::SeqCst);
                if current < 2 {
                    Err(TriageError::NetworkError("Connection timeout".to_string()))
                } else {
                    Ok("success".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_fails_on_permanent_error() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailbox::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(TriageError::AuthError("Invalid credentials".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        // Permanent errors are not retried
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhausts_all_retries() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailbox::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(TriageError::RateLimitExceeded { retry_after: 1 })
            }
        })
        .await;

        assert!(result.is_err());
        // Initial attempt + 3 retries
        assert_eq!(attempt_count.load(Ordering::SeqCst), 4);
    }
}
