use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forum_mirror::config::Config;
use forum_mirror::db::Database;
use forum_mirror::ingest::{IngestRun, IssueKind};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting forum-mirror");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        input_dir = %config.input_dir.display(),
        output_dir = %config.output_dir.display(),
        site_url = %config.site_url,
        "Configuration loaded"
    );

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    let report = IngestRun::new(config, db)?.run().await?;

    let failures = report
        .issues
        .iter()
        .filter(|issue| issue.kind != IssueKind::Skipped)
        .count();
    if failures > 0 {
        warn!(count = failures, "Errors encountered this run");
    }
    for issue in report.issues_of(IssueKind::Parse) {
        warn!("{issue}");
    }
    for issue in report.issues_of(IssueKind::Storage) {
        error!("{issue}");
    }

    info!(
        forum_pages = report.forum_pages,
        topic_pages = report.topic_pages,
        backfilled_pages = report.backfilled_pages,
        skipped = report.issues_of(IssueKind::Skipped).count(),
        assets_acquired = report.assets.acquired,
        assets_unresolved = report.assets.unresolved,
        synthetic_users = report.synthetic_users,
        mismatches = report.mismatches.len(),
        "Run finished"
    );

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,forum_mirror=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
