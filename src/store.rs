//! Local message mirror backed by SQLite

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::error::{Result, TriageError};
use crate::models::{StoredMessage, SuggestedAction};

/// Filter for paginated listing of the local mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    All,
    Unanalyzed,
    Category(String),
}

/// One page of stored messages plus the total match count
#[derive(Debug, Clone)]
pub struct StoredPage {
    pub items: Vec<StoredMessage>,
    pub total: u64,
}

/// Fields written by a successful classification
#[derive(Debug, Clone)]
pub struct ClassificationUpdate {
    pub category: String,
    pub suggested_action: SuggestedAction,
    pub reasoning: String,
}

/// Durable keyed records of mirrored messages.
///
/// `(user_id, message id)` is the identity; the uniqueness constraint is the
/// final arbiter of concurrent ingestion races.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a message unless `(user_id, id)` is already present.
    ///
    /// Returns true when a new row was written. A conflicting concurrent
    /// insert resolves to false, not an error.
    async fn insert_if_absent(&self, message: &StoredMessage) -> Result<bool>;

    async fn exists(&self, user_id: &str, id: &str) -> Result<bool>;

    /// Unanalyzed messages for the user, most recent first, bounded by `limit`
    async fn find_unanalyzed(&self, user_id: &str, limit: u32) -> Result<Vec<StoredMessage>>;

    /// Distinct non-null categories currently assigned for the user
    async fn distinct_categories(&self, user_id: &str) -> Result<Vec<String>>;

    /// Filtered page of the mirror, most recent first. `page` is 1-based.
    async fn find_page(
        &self,
        user_id: &str,
        filter: &MessageFilter,
        page: u32,
        page_size: u32,
    ) -> Result<StoredPage>;

    /// Apply a classification by message id.
    ///
    /// Returns affected rows; 0 when the id is unknown or was deleted
    /// concurrently, which callers treat as a skip.
    async fn update_classification(
        &self,
        user_id: &str,
        id: &str,
        update: &ClassificationUpdate,
    ) -> Result<u64>;

    /// Remove the given ids for the user regardless of their analysis state
    async fn delete_many(&self, user_id: &str, ids: &[String]) -> Result<u64>;
}

/// SQLite-backed message store
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Open (or create) the store at the given database path
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                from_header TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL DEFAULT '',
                snippet TEXT NOT NULL DEFAULT '',
                date TEXT NOT NULL,
                is_analyzed INTEGER NOT NULL DEFAULT 0,
                category TEXT,
                suggested_action TEXT,
                reasoning TEXT,
                UNIQUE(user_id, message_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_messages_pending
            ON messages(user_id, is_analyzed, date)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_messages_category
            ON messages(user_id, category)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Fixed-width RFC 3339 so lexicographic TEXT ordering matches time ordering
fn encode_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn decode_date(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TriageError::InvalidMessageFormat(format!("Invalid stored date: {}", e)))
}

fn row_to_message(row: &SqliteRow) -> Result<StoredMessage> {
    let date_raw: String = row.try_get("date")?;
    let action_raw: Option<String> = row.try_get("suggested_action")?;

    Ok(StoredMessage {
        id: row.try_get("message_id")?,
        user_id: row.try_get("user_id")?,
        from: row.try_get("from_header")?,
        subject: row.try_get("subject")?,
        snippet: row.try_get("snippet")?,
        date: decode_date(&date_raw)?,
        is_analyzed: row.try_get("is_analyzed")?,
        category: row.try_get("category")?,
        suggested_action: action_raw.and_then(|a| a.parse::<SuggestedAction>().ok()),
        reasoning: row.try_get("reasoning")?,
    })
}

const SELECT_COLUMNS: &str = "user_id, message_id, from_header, subject, snippet, date, \
                              is_analyzed, category, suggested_action, reasoning";

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert_if_absent(&self, message: &StoredMessage) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO messages
                (user_id, message_id, from_header, subject, snippet, date,
                 is_analyzed, category, suggested_action, reasoning)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, message_id) DO NOTHING
            ",
        )
        .bind(&message.user_id)
        .bind(&message.id)
        .bind(&message.from)
        .bind(&message.subject)
        .bind(&message.snippet)
        .bind(encode_date(&message.date))
        .bind(message.is_analyzed)
        .bind(&message.category)
        .bind(message.suggested_action.map(|a| a.as_str()))
        .bind(&message.reasoning)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn exists(&self, user_id: &str, id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE user_id = ? AND message_id = ?",
        )
        .bind(user_id)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn find_unanalyzed(&self, user_id: &str, limit: u32) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM messages \
             WHERE user_id = ? AND is_analyzed = 0 \
             ORDER BY date DESC LIMIT ?"
        ))
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn distinct_categories(&self, user_id: &str) -> Result<Vec<String>> {
        let categories: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT category FROM messages \
             WHERE user_id = ? AND category IS NOT NULL \
             ORDER BY category",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(categories)
    }

    async fn find_page(
        &self,
        user_id: &str,
        filter: &MessageFilter,
        page: u32,
        page_size: u32,
    ) -> Result<StoredPage> {
        let page = page.max(1);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let (total, rows) = match filter {
            MessageFilter::All => {
                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE user_id = ?")
                        .bind(user_id)
                        .fetch_one(&self.pool)
                        .await?;

                let rows = sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM messages WHERE user_id = ? \
                     ORDER BY date DESC LIMIT ? OFFSET ?"
                ))
                .bind(user_id)
                .bind(i64::from(page_size))
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                (total, rows)
            }
            MessageFilter::Unanalyzed => {
                let total: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM messages WHERE user_id = ? AND is_analyzed = 0",
                )
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

                let rows = sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM messages \
                     WHERE user_id = ? AND is_analyzed = 0 \
                     ORDER BY date DESC LIMIT ? OFFSET ?"
                ))
                .bind(user_id)
                .bind(i64::from(page_size))
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                (total, rows)
            }
            MessageFilter::Category(name) => {
                let total: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM messages WHERE user_id = ? AND category = ?",
                )
                .bind(user_id)
                .bind(name)
                .fetch_one(&self.pool)
                .await?;

                let rows = sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM messages \
                     WHERE user_id = ? AND category = ? \
                     ORDER BY date DESC LIMIT ? OFFSET ?"
                ))
                .bind(user_id)
                .bind(name)
                .bind(i64::from(page_size))
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                (total, rows)
            }
        };

        let items: Result<Vec<StoredMessage>> = rows.iter().map(row_to_message).collect();

        Ok(StoredPage {
            items: items?,
            total: total as u64,
        })
    }

    async fn update_classification(
        &self,
        user_id: &str,
        id: &str,
        update: &ClassificationUpdate,
    ) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE messages
            SET category = ?, suggested_action = ?, reasoning = ?, is_analyzed = 1
            WHERE user_id = ? AND message_id = ?
            ",
        )
        .bind(&update.category)
        .bind(update.suggested_action.as_str())
        .bind(&update.reasoning)
        .bind(user_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_many(&self, user_id: &str, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "DELETE FROM messages WHERE user_id = ? AND message_id IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(user_id);
        for id in ids {
            query = query.bind(id);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
