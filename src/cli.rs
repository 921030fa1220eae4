//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::StoredMessage;

#[derive(Parser, Debug)]
#[command(name = "gmail-triage")]
#[command(version = "0.3.1")]
#[command(about = "Incremental Gmail mirroring with AI-assisted triage", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-triage/token.json")]
    pub token_cache: PathBuf,

    /// Local mirror owner; keeps multiple accounts apart in one database
    #[arg(long, default_value = "default")]
    pub user: String,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with the Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Mirror mailbox pages into the local store
    Sync {
        /// Continuation token from a previous run (omit to start from the
        /// most recent page)
        #[arg(long)]
        cursor: Option<String>,

        /// Number of pages to mirror this run
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },

    /// Classify unanalyzed messages in batches
    Classify {
        /// Number of batches to run back to back
        #[arg(long, default_value_t = 1)]
        rounds: u32,
    },

    /// Archive or delete messages remotely and drop them from the mirror
    Apply {
        /// "archive" or "delete"
        action: String,

        /// Message ids to act on
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// List mirrored messages from the local store
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 10)]
        page_size: u32,

        /// Filter by category ("all" and "unanalyzed" are special)
        #[arg(long, default_value = "all")]
        category: String,
    },

    /// Show the categories assigned so far
    Categories,

    /// Show mirror counts for the current user
    Status,

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Truncate a string to max_len characters, adding "..." if truncated
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!(
            "{}...",
            s.chars()
                .take(max_len.saturating_sub(3))
                .collect::<String>()
        )
    }
}

/// Render one mirror row for the list command
pub fn format_message_row(message: &StoredMessage) -> String {
    let state = match (&message.category, message.suggested_action) {
        (Some(category), Some(action)) => format!("{} / {}", category, action),
        _ => "unanalyzed".to_string(),
    };

    format!(
        "{:<18} {:<12} {:<28} {:<40} [{}]",
        message.id,
        message.date.format("%Y-%m-%d"),
        truncate_string(&message.from, 28),
        truncate_string(&message.subject, 40),
        state
    )
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi: MultiProgress::new(),
            spinner_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        println!("  ✓ {}", msg);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
