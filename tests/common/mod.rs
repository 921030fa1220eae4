//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use gmail_triage::ai::ClassificationGateway;
use gmail_triage::error::{Result, TriageError};
use gmail_triage::gmail::MailboxGateway;
use gmail_triage::models::{MessagePage, RemoteMessage, SyncCursor};
use gmail_triage::store::SqliteMessageStore;

/// Create a fresh in-memory store
pub async fn in_memory_store() -> SqliteMessageStore {
    SqliteMessageStore::in_memory()
        .await
        .expect("in-memory store")
}

/// Remote metadata fixture with a fixed date
pub fn remote_message(id: &str, from: &str, subject: &str) -> RemoteMessage {
    RemoteMessage {
        id: id.to_string(),
        from: from.to_string(),
        subject: subject.to_string(),
        snippet: format!("Snippet for {id}"),
        date: Some(fixed_date(12)),
    }
}

pub fn fixed_date(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 2, hour, 0, 0).unwrap()
}

/// Recorded arguments of one batch label mutation
#[derive(Debug, Clone)]
pub struct BatchModifyCall {
    pub ids: Vec<String>,
    pub add_label_ids: Vec<String>,
    pub remove_label_ids: Vec<String>,
}

/// Scripted mailbox gateway.
///
/// Pages are keyed by the incoming continuation token, metadata by message
/// id; batch mutations are recorded for assertions and can be forced to
/// fail to exercise the remote-before-local ordering.
pub struct ScriptedMailbox {
    pages: Mutex<HashMap<Option<String>, MessagePage>>,
    metadata: Mutex<HashMap<String, RemoteMessage>>,
    failing_ids: Mutex<HashSet<String>>,
    fail_batch_modify: AtomicBool,
    pub listed_tokens: Mutex<Vec<Option<String>>>,
    pub batch_calls: Mutex<Vec<BatchModifyCall>>,
}

impl ScriptedMailbox {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            metadata: Mutex::new(HashMap::new()),
            failing_ids: Mutex::new(HashSet::new()),
            fail_batch_modify: AtomicBool::new(false),
            listed_tokens: Mutex::new(Vec::new()),
            batch_calls: Mutex::new(Vec::new()),
        }
    }

    /// Script the page returned for a given incoming token (None = first page)
    pub fn with_page(self, token: Option<&str>, ids: &[&str], next_token: Option<&str>) -> Self {
        self.pages.lock().unwrap().insert(
            token.map(str::to_string),
            MessagePage {
                ids: ids.iter().map(|s| s.to_string()).collect(),
                next_page_token: next_token.map(SyncCursor::new),
            },
        );
        self
    }

    pub fn with_metadata(self, remote: RemoteMessage) -> Self {
        self.metadata
            .lock()
            .unwrap()
            .insert(remote.id.clone(), remote);
        self
    }

    /// Make metadata fetches for this id fail with a network error
    pub fn with_failing_id(self, id: &str) -> Self {
        self.failing_ids.lock().unwrap().insert(id.to_string());
        self
    }

    /// Make batch label mutations fail with a network error
    pub fn failing_batch_modify(self) -> Self {
        self.fail_batch_modify.store(true, Ordering::SeqCst);
        self
    }

    pub fn batch_call_count(&self) -> usize {
        self.batch_calls.lock().unwrap().len()
    }
}

impl Default for ScriptedMailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailboxGateway for ScriptedMailbox {
    async fn list_message_ids(&self, page_token: Option<&SyncCursor>) -> Result<MessagePage> {
        let key = page_token.map(|t| t.as_str().to_string());
        self.listed_tokens.lock().unwrap().push(key.clone());

        let pages = self.pages.lock().unwrap();
        Ok(pages.get(&key).cloned().unwrap_or(MessagePage {
            ids: Vec::new(),
            next_page_token: None,
        }))
    }

    async fn get_message_metadata(&self, id: &str) -> Result<RemoteMessage> {
        if self.failing_ids.lock().unwrap().contains(id) {
            return Err(TriageError::NetworkError(format!(
                "scripted fetch failure for {id}"
            )));
        }

        self.metadata
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| TriageError::MessageNotFound(id.to_string()))
    }

    async fn batch_modify_labels(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        if self.fail_batch_modify.load(Ordering::SeqCst) {
            return Err(TriageError::NetworkError(
                "scripted batch modify failure".to_string(),
            ));
        }

        self.batch_calls.lock().unwrap().push(BatchModifyCall {
            ids: ids.to_vec(),
            add_label_ids: add_label_ids.to_vec(),
            remove_label_ids: remove_label_ids.to_vec(),
        });
        Ok(())
    }
}

/// Scripted classification gateway replaying canned replies in order
pub struct ScriptedClassifier {
    replies: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedClassifier {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The system prompt of the nth recorded call
    pub fn system_prompt(&self, index: usize) -> String {
        self.calls.lock().unwrap()[index].0.clone()
    }

    /// The user prompt of the nth recorded call
    pub fn user_prompt(&self, index: usize) -> String {
        self.calls.lock().unwrap()[index].1.clone()
    }
}

#[async_trait]
impl ClassificationGateway for ScriptedClassifier {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TriageError::ClassificationError("no scripted reply left".to_string()))
    }
}
