//! Batched AI classification of unanalyzed messages

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ai::ClassificationGateway;
use crate::error::Result;
use crate::models::{ClassifyReport, StoredMessage, SuggestedAction};
use crate::store::{ClassificationUpdate, MessageStore};

/// Error marker reported when the model reply is not a JSON array
pub const JSON_PARSE_ERROR: &str = "JSON Parse Error";

/// Selects pending messages, classifies them in one gateway call, and
/// applies the validated results to the store.
///
/// Never retries the gateway; a caller-level retry re-selects the same
/// still-unanalyzed messages on the next pass.
pub struct ClassificationEngine {
    gateway: Arc<dyn ClassificationGateway>,
    store: Arc<dyn MessageStore>,
    batch_size: u32,
    snippet_max_chars: usize,
}

impl ClassificationEngine {
    pub fn new(
        gateway: Arc<dyn ClassificationGateway>,
        store: Arc<dyn MessageStore>,
        batch_size: u32,
        snippet_max_chars: usize,
    ) -> Self {
        Self {
            gateway,
            store,
            batch_size,
            snippet_max_chars,
        }
    }

    /// Classify up to one batch of unanalyzed messages for the user.
    ///
    /// An empty pending set is success with zero processed, not an error,
    /// and makes no gateway call. A reply that cannot be parsed as a JSON
    /// array degrades to `{processed_count: 0, error: "JSON Parse Error"}`
    /// without touching the store. Malformed array elements are dropped
    /// individually; valid elements in the same batch still apply.
    pub async fn classify_pending(&self, user_id: &str) -> Result<ClassifyReport> {
        let pending = self.store.find_unanalyzed(user_id, self.batch_size).await?;
        if pending.is_empty() {
            debug!("No unanalyzed messages for {}", user_id);
            return Ok(ClassifyReport {
                processed_count: 0,
                error: None,
            });
        }

        // Existing categories steer the model toward reusing labels instead
        // of inventing near-duplicates across batches
        let categories = self.store.distinct_categories(user_id).await?;

        let system_prompt = build_system_prompt(&categories);
        let user_prompt = build_user_prompt(&pending, self.snippet_max_chars);

        let raw = self.gateway.complete(&system_prompt, &user_prompt).await?;

        let entries = match parse_reply(&raw) {
            Some(entries) => entries,
            None => {
                warn!("Classification reply was not a JSON array after fence stripping");
                return Ok(ClassifyReport {
                    processed_count: 0,
                    error: Some(JSON_PARSE_ERROR.to_string()),
                });
            }
        };

        let mut processed_count = 0;
        for entry in entries {
            let parsed = match entry {
                ReplyEntry::Valid(parsed) => parsed,
                ReplyEntry::Malformed(value) => {
                    debug!("Skipping malformed classification entry: {}", value);
                    continue;
                }
            };

            let update = ClassificationUpdate {
                category: parsed.category,
                suggested_action: parsed.action,
                reasoning: parsed.reasoning,
            };

            match self
                .store
                .update_classification(user_id, &parsed.id, &update)
                .await
            {
                Ok(0) => warn!("Classification for unknown message {}, skipping", parsed.id),
                Ok(_) => processed_count += 1,
                Err(e) => warn!("Failed to update message {}: {}", parsed.id, e),
            }
        }

        info!(
            "Classified {} of {} pending messages for {}",
            processed_count,
            pending.len(),
            user_id
        );

        Ok(ClassifyReport {
            processed_count,
            error: None,
        })
    }
}

/// One element of the model reply after validation.
///
/// The reply is untrusted input: each element is tagged before any store
/// mutation instead of trusting field presence.
enum ReplyEntry {
    Valid(ParsedClassification),
    Malformed(Value),
}

struct ParsedClassification {
    id: String,
    category: String,
    action: SuggestedAction,
    reasoning: String,
}

/// Strip leading/trailing Markdown code fences the model may wrap its
/// reply in (``` or ```json)
fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();

    if let Some(rest) = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```JSON"))
        .or_else(|| text.strip_prefix("```"))
    {
        text = rest.trim_start();
    }

    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim_end();
    }

    text
}

/// Parse the reply into tagged entries; None when the text is not a JSON array
fn parse_reply(raw: &str) -> Option<Vec<ReplyEntry>> {
    let cleaned = strip_code_fences(raw);
    let value: Value = serde_json::from_str(cleaned).ok()?;

    match value {
        Value::Array(elements) => Some(elements.into_iter().map(classify_entry).collect()),
        _ => None,
    }
}

/// Validate one reply element. Missing id/category/action, or an action
/// outside the allowed vocabulary, tags the element as malformed.
fn classify_entry(value: Value) -> ReplyEntry {
    let parsed = (|| {
        let obj = value.as_object()?;
        let id = obj.get("id")?.as_str()?;
        let category = obj.get("category")?.as_str()?;
        let action = obj.get("action")?.as_str()?.parse::<SuggestedAction>().ok()?;

        if id.is_empty() || category.is_empty() {
            return None;
        }

        let reasoning = obj
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Some(ParsedClassification {
            id: id.to_string(),
            category: category.to_string(),
            action,
            reasoning,
        })
    })();

    match parsed {
        Some(parsed) => ReplyEntry::Valid(parsed),
        None => ReplyEntry::Malformed(value),
    }
}

fn build_system_prompt(categories: &[String]) -> String {
    let mut prompt = String::from(
        "You are an email triage assistant. For each email in the list, assign a short \
         category label and suggest one action. Respond with a JSON array only, one object \
         per email, each with the fields: id, category, action, reasoning. \
         The action must be exactly one of: archive, delete, keep.",
    );

    if !categories.is_empty() {
        prompt.push_str("\nPrefer reusing these existing categories when they fit: ");
        prompt.push_str(&categories.join(", "));
        prompt.push('.');
    }

    prompt
}

fn build_user_prompt(messages: &[StoredMessage], snippet_max_chars: usize) -> String {
    messages
        .iter()
        .map(|message| {
            format!(
                "Id: {}\nFrom: {}\nSubject: {}\nSnippet: {}",
                message.id,
                message.from,
                message.subject,
                truncate_chars(&message.snippet, snippet_max_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// Truncate to `max_chars` characters, appending "..." when shortened
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!(
            "{}...",
            text.chars()
                .take(max_chars.saturating_sub(3))
                .collect::<String>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pending_message(id: &str, from: &str, subject: &str, snippet: &str) -> StoredMessage {
        StoredMessage {
            id: id.to_string(),
            user_id: "u1".to_string(),
            from: from.to_string(),
            subject: subject.to_string(),
            snippet: snippet.to_string(),
            date: Utc::now(),
            is_analyzed: false,
            category: None,
            suggested_action: None,
            reasoning: None,
        }
    }

    #[test]
    fn test_strip_code_fences_variants() {
        assert_eq!(strip_code_fences("[]"), "[]");
        assert_eq!(strip_code_fences("```json\n[]\n```"), "[]");
        assert_eq!(strip_code_fences("```JSON\n[]\n```"), "[]");
        assert_eq!(strip_code_fences("```\n[]\n```"), "[]");
        assert_eq!(strip_code_fences("  ```json\n[{\"a\":1}]\n```  "), "[{\"a\":1}]");
        // Fence markers without a closing fence still strip the opener
        assert_eq!(strip_code_fences("```json\n[]"), "[]");
    }

    #[test]
    fn test_parse_reply_rejects_non_json() {
        assert!(parse_reply("not json").is_none());
        assert!(parse_reply("").is_none());
    }

    #[test]
    fn test_parse_reply_rejects_non_array_json() {
        assert!(parse_reply("{\"id\": \"m1\"}").is_none());
        assert!(parse_reply("42").is_none());
    }

    #[test]
    fn test_parse_reply_tags_partial_elements() {
        let raw = r#"[
            {"id": "1", "category": "Work", "action": "keep"},
            {"id": "2"}
        ]"#;

        let entries = parse_reply(raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(&entries[0], ReplyEntry::Valid(p) if p.id == "1"));
        assert!(matches!(&entries[1], ReplyEntry::Malformed(_)));
    }

    #[test]
    fn test_classify_entry_rejects_unknown_action() {
        let value = serde_json::json!({
            "id": "m1",
            "category": "Work",
            "action": "purge",
            "reasoning": "?"
        });
        assert!(matches!(classify_entry(value), ReplyEntry::Malformed(_)));
    }

    #[test]
    fn test_classify_entry_lowercases_action() {
        let value = serde_json::json!({
            "id": "m1",
            "category": "Work",
            "action": "ARCHIVE"
        });
        match classify_entry(value) {
            ReplyEntry::Valid(parsed) => {
                assert_eq!(parsed.action, SuggestedAction::Archive);
                assert_eq!(parsed.reasoning, "");
            }
            ReplyEntry::Malformed(_) => panic!("expected valid entry"),
        }
    }

    #[test]
    fn test_classify_entry_rejects_non_object() {
        let value = serde_json::json!("just a string");
        assert!(matches!(classify_entry(value), ReplyEntry::Malformed(_)));
    }

    #[test]
    fn test_system_prompt_includes_existing_categories() {
        let categories = vec!["Bills".to_string(), "Work".to_string()];
        let prompt = build_system_prompt(&categories);
        assert!(prompt.contains("Bills, Work"));
        assert!(prompt.contains("archive, delete, keep"));

        let empty = build_system_prompt(&[]);
        assert!(!empty.contains("existing categories"));
    }

    #[test]
    fn test_user_prompt_layout_and_truncation() {
        let messages = vec![
            pending_message("m1", "a@example.com", "Hello", "short"),
            pending_message("m2", "b@example.com", "World", &"x".repeat(300)),
        ];

        let prompt = build_user_prompt(&messages, 200);
        assert!(prompt.contains("Id: m1"));
        assert!(prompt.contains("From: a@example.com"));
        assert!(prompt.contains("\n---\n"));
        // Long snippets are bounded
        assert!(!prompt.contains(&"x".repeat(201)));
        assert!(prompt.contains(&format!("{}...", "x".repeat(197))));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abc", 5), "abc");
        assert_eq!(truncate_chars("abcdef", 5), "ab...");
        assert_eq!(truncate_chars("", 5), "");
    }
}
