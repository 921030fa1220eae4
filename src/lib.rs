//! Gmail Triage System
//!
//! Incrementally mirrors a Gmail mailbox into local storage, enriches each
//! stored message with an AI-suggested category and action, and applies bulk
//! archive/delete actions that stay consistent between the remote mailbox
//! and the local mirror.
//!
//! # Overview
//!
//! The pipeline runs in three externally-triggered steps:
//! - **Sync**: incremental, deduplicated ingestion from the mailbox, resumed
//!   across calls with an opaque continuation token
//! - **Classification**: batched model calls that reuse the categories
//!   already accumulated, applied defensively against malformed replies
//! - **Reconciliation**: bulk remote label mutations followed by local
//!   deletion, remote-first so the mirror never diverges ahead of the mailbox
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_triage::config::Config;
//! use gmail_triage::gmail::{GmailMailbox, MailboxGateway};
//! use gmail_triage::store::{MessageStore, SqliteMessageStore};
//! use gmail_triage::sync::SyncEngine;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let hub = gmail_triage::auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".gmail-triage/token.json".as_ref(),
//!     )
//!     .await?;
//!
//!     let store: Arc<dyn MessageStore> =
//!         Arc::new(SqliteMessageStore::new(&config.storage.database_path).await?);
//!     let mailbox: Arc<dyn MailboxGateway> = Arc::new(GmailMailbox::new(
//!         hub,
//!         config.sync.max_concurrent_fetches,
//!         config.sync.page_size,
//!     ));
//!
//!     let engine = SyncEngine::new(mailbox, store, config.sync.max_concurrent_fetches);
//!     let report = engine.sync("default", None).await?;
//!     println!("Mirrored {} new messages", report.synced_count);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`gmail`] - Rate-limited mailbox gateway with retry logic
//! - [`ai`] - Classification gateway (OpenAI-compatible chat endpoint)
//! - [`store`] - Local message mirror backed by SQLite
//! - [`sync`] - Incremental mailbox sync engine
//! - [`classify`] - Batched classification engine
//! - [`reconcile`] - Batch archive/delete reconciliation engine
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures

pub mod ai;
pub mod auth;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod gmail;
pub mod models;
pub mod reconcile;
pub mod store;
pub mod sync;

// Re-export commonly used types for convenience
pub use error::{Result, TriageError};

// Core data models
pub use models::{
    BatchAction, BatchActionReport, ClassifyReport, MessagePage, RemoteMessage, StoredMessage,
    SuggestedAction, SyncCursor, SyncReport,
};

// Gateway traits and production clients
pub use ai::{ClassificationGateway, OpenAiChatGateway};
pub use gmail::{GmailHub, GmailMailbox, MailboxGateway};

// Store types
pub use store::{ClassificationUpdate, MessageFilter, MessageStore, SqliteMessageStore, StoredPage};

// Engines
pub use classify::ClassificationEngine;
pub use reconcile::ReconciliationEngine;
pub use sync::SyncEngine;

// Config types
pub use config::{ClassificationConfig, Config, StorageConfig, SyncConfig};

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter};
