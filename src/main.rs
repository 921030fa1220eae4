use anyhow::Result;
use clap::Parser;
use gmail_triage::ai::OpenAiChatGateway;
use gmail_triage::classify::ClassificationEngine;
use gmail_triage::cli::{self, Cli, Commands, ProgressReporter};
use gmail_triage::config::Config;
use gmail_triage::error::TriageError;
use gmail_triage::gmail::{GmailMailbox, MailboxGateway, MAILBOX_SCOPE};
use gmail_triage::models::{BatchAction, SyncCursor};
use gmail_triage::reconcile::ReconciliationEngine;
use gmail_triage::store::{MessageFilter, MessageStore, SqliteMessageStore};
use gmail_triage::sync::SyncEngine;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: gmail-triage --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    // This is necessary because multiple dependencies use different crypto providers
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_triage=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_triage=info,warn,error"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Ensure the working directory for tokens and the mirror exists
    tokio::fs::create_dir_all(".gmail-triage").await?;

    match cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if let Some(parent) = cli.token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            if force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let hub =
                gmail_triage::auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache)
                    .await?;
            gmail_triage::auth::secure_token_file(&cli.token_cache).await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            // Test the connection - must specify scope to avoid triggering
            // an additional OAuth flow
            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope(MAILBOX_SCOPE)
                .doit()
                .await
                .map_err(TriageError::from)?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );

            Ok(())
        }

        Commands::Sync { cursor, pages } => {
            let config = Config::load(&cli.config).await?;
            let reporter = ProgressReporter::new();

            let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
            let hub =
                gmail_triage::auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache)
                    .await?;
            reporter.finish_spinner(&auth_spinner, "Gmail API authenticated");

            let store: Arc<dyn MessageStore> =
                Arc::new(SqliteMessageStore::new(&config.storage.database_path).await?);
            let mailbox: Arc<dyn MailboxGateway> = Arc::new(GmailMailbox::new(
                hub,
                config.sync.max_concurrent_fetches,
                config.sync.page_size,
            ));
            let engine = SyncEngine::new(mailbox, store, config.sync.max_concurrent_fetches);

            let mut next_cursor = cursor.map(SyncCursor::new);
            let mut total_synced = 0;
            let mut pages_done = 0;

            for _ in 0..pages.max(1) {
                let spinner = reporter.add_spinner("Syncing mailbox page...");
                let report = engine.sync(&cli.user, next_cursor.as_ref()).await?;
                reporter.finish_spinner(
                    &spinner,
                    &format!("Page mirrored: {} new messages", report.synced_count),
                );

                total_synced += report.synced_count;
                pages_done += 1;
                next_cursor = report.next_cursor;

                if next_cursor.is_none() {
                    break;
                }
            }

            println!("\n========================================");
            println!("Sync Summary");
            println!("========================================");
            println!("Pages mirrored: {}", pages_done);
            println!("New messages: {}", total_synced);
            match next_cursor {
                Some(cursor) => {
                    println!("Next cursor: {}", cursor);
                    println!("Resume with: gmail-triage sync --cursor {}", cursor);
                }
                None => println!("Reached the end of mailbox history"),
            }
            println!("========================================");

            Ok(())
        }

        Commands::Classify { rounds } => {
            let config = Config::load(&cli.config).await?;
            let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                TriageError::ConfigError("OPENAI_API_KEY not set".to_string())
            })?;

            let store: Arc<dyn MessageStore> =
                Arc::new(SqliteMessageStore::new(&config.storage.database_path).await?);
            let gateway = Arc::new(OpenAiChatGateway::new(
                config.classification.base_url.clone(),
                api_key,
                config.classification.model.clone(),
                config.classification.temperature,
            ));
            let engine = ClassificationEngine::new(
                gateway,
                store,
                config.classification.batch_size,
                config.classification.snippet_max_chars,
            );

            let reporter = ProgressReporter::new();
            let mut total_processed = 0;

            for round in 1..=rounds.max(1) {
                let spinner =
                    reporter.add_spinner(&format!("Classifying batch {}...", round));
                let report = engine.classify_pending(&cli.user).await?;

                if let Some(error) = report.error {
                    reporter.finish_spinner(&spinner, &format!("Batch {} failed: {}", round, error));
                    break;
                }

                reporter.finish_spinner(
                    &spinner,
                    &format!("Batch {}: {} messages classified", round, report.processed_count),
                );
                total_processed += report.processed_count;

                if report.processed_count == 0 {
                    break;
                }
            }

            println!("\n========================================");
            println!("Classification Summary");
            println!("========================================");
            println!("Messages classified: {}", total_processed);
            println!("========================================");

            Ok(())
        }

        Commands::Apply { action, ids } => {
            // Validation happens before any remote call
            let action: BatchAction = action.parse()?;

            let config = Config::load(&cli.config).await?;
            let hub =
                gmail_triage::auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache)
                    .await?;

            let store: Arc<dyn MessageStore> =
                Arc::new(SqliteMessageStore::new(&config.storage.database_path).await?);
            let mailbox: Arc<dyn MailboxGateway> = Arc::new(GmailMailbox::new(
                hub,
                config.sync.max_concurrent_fetches,
                config.sync.page_size,
            ));
            let engine = ReconciliationEngine::new(mailbox, store);

            let report = engine.apply_batch_action(&cli.user, &ids, action).await?;

            println!(
                "Applied {} to {} messages",
                action.as_str(),
                report.count
            );

            Ok(())
        }

        Commands::List {
            page,
            page_size,
            category,
        } => {
            let page_size = page_size.max(1);
            let config = Config::load(&cli.config).await?;
            let store = SqliteMessageStore::new(&config.storage.database_path).await?;

            let filter = if category.eq_ignore_ascii_case("all") {
                MessageFilter::All
            } else if category.eq_ignore_ascii_case("unanalyzed") {
                MessageFilter::Unanalyzed
            } else {
                MessageFilter::Category(category.clone())
            };

            let result = store.find_page(&cli.user, &filter, page, page_size).await?;

            if result.items.is_empty() {
                println!("No messages found.");
            } else {
                for message in &result.items {
                    println!("{}", cli::format_message_row(message));
                }
            }

            let total_pages = (result.total + u64::from(page_size) - 1) / u64::from(page_size);
            println!(
                "\nPage {} of {} ({} messages total)",
                page.max(1),
                total_pages.max(1),
                result.total
            );

            Ok(())
        }

        Commands::Categories => {
            let config = Config::load(&cli.config).await?;
            let store = SqliteMessageStore::new(&config.storage.database_path).await?;

            let categories = store.distinct_categories(&cli.user).await?;
            if categories.is_empty() {
                println!("No categories assigned yet. Run: gmail-triage classify");
            } else {
                for category in categories {
                    println!("{}", category);
                }
            }

            Ok(())
        }

        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            let store = SqliteMessageStore::new(&config.storage.database_path).await?;

            let all = store.find_page(&cli.user, &MessageFilter::All, 1, 1).await?;
            let pending = store
                .find_page(&cli.user, &MessageFilter::Unanalyzed, 1, 1)
                .await?;
            let categories = store.distinct_categories(&cli.user).await?;

            println!("\n========================================");
            println!("Mirror Status");
            println!("========================================");
            println!("User: {}", cli.user);
            println!("Messages mirrored: {}", all.total);
            println!("Awaiting classification: {}", pending.total);
            println!("Categories assigned: {}", categories.len());
            println!("Database: {}", config.storage.database_path);
            println!("========================================");

            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(TriageError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(&output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nPlease edit this file to customize your settings.");
            println!("Key settings to review:");
            println!("  - sync.page_size: Message ids mirrored per page");
            println!("  - classification.batch_size: Messages per model request");
            println!("  - classification.base_url: OpenAI-compatible endpoint");
            println!("  - storage.database_path: Local mirror location");

            Ok(())
        }
    }
}
