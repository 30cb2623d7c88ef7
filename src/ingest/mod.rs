//! The ingestion run: index, listings, topics, then consistency checks.
//!
//! All per-run state (synthetic identities, the asset cache, the snapshot
//! cache) is owned by [`IngestRun`]. Pages are processed one at a time so
//! upserts land in the order they are issued.

mod consistency;
mod forum_pages;
pub mod identity;
mod index;
mod topic_pages;

pub use consistency::{CountMismatch, CountedEntity};
pub use identity::IdentityResolver;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::assets::{AssetResolver, AssetStats, SweepReport};
use crate::config::Config;
use crate::db::{self, Database, EntityCounts};
use crate::fs_utils;
use crate::parse::{PageClassifier, PageError, SkipReason};
use crate::wayback::ArchiveRetriever;

/// What went wrong with a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A known non-content page; nothing was stored.
    Skipped,
    /// A required element or pattern was missing.
    Parse,
    /// A storage phase failed; other phases of the page may have succeeded.
    Storage,
}

/// A non-fatal problem recorded against a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestIssue {
    /// File name, or URL for pages fetched from the archive.
    pub page: String,
    pub kind: IssueKind,
    pub reason: String,
    pub cause: Option<String>,
}

impl fmt::Display for IngestIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:?}]: {}", self.page, self.kind, self.reason)?;
        if let Some(cause) = &self.cause {
            write!(f, " ({cause})")?;
        }
        Ok(())
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub forums: usize,
    pub forum_pages: usize,
    pub topic_pages: usize,
    pub backfilled_pages: usize,
    pub asset_sweep: SweepReport,
    pub assets: AssetStats,
    pub synthetic_users: usize,
    pub mismatches: Vec<CountMismatch>,
    pub issues: Vec<IngestIssue>,
    pub counts: EntityCounts,
}

impl IngestReport {
    /// Issues of one kind.
    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &IngestIssue> {
        self.issues.iter().filter(move |issue| issue.kind == kind)
    }
}

/// Counts advertised by listing pages, checked against storage at the end.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeclaredCounts {
    pub topics_per_forum: HashMap<i64, i64>,
    pub posts_per_topic: HashMap<i64, i64>,
}

/// One ingestion run over an export directory.
pub struct IngestRun {
    config: Config,
    db: Database,
    classifier: PageClassifier,
    identities: IdentityResolver,
    archive: Arc<ArchiveRetriever>,
    assets: AssetResolver,
    declared: DeclaredCounts,
    report: IngestReport,
}

impl IngestRun {
    /// Set up a run with fresh per-run caches.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP clients cannot be built.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let archive = Arc::new(ArchiveRetriever::new(&config)?);
        let assets = AssetResolver::new(&config, archive.clone())?;
        Ok(Self {
            config,
            db,
            classifier: PageClassifier::standard(),
            identities: IdentityResolver::new(),
            archive,
            assets,
            declared: DeclaredCounts::default(),
            report: IngestReport::default(),
        })
    }

    /// Replace the page classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: PageClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Run every stage and return the report.
    ///
    /// # Errors
    ///
    /// Returns an error only for problems that make the run meaningless: an
    /// unreadable input directory, an unusable asset table, or (with
    /// `STRICT_FORUM_PAGES`) a listing page without a forum id.
    pub async fn run(mut self) -> Result<IngestReport> {
        let assets_dir = self.config.assets_dir();
        tokio::fs::create_dir_all(&assets_dir)
            .await
            .with_context(|| format!("Failed to create assets directory: {}", assets_dir.display()))?;

        self.assets
            .reload(self.db.pool())
            .await
            .context("Failed to load asset table")?;

        let files = fs_utils::list_html_files(&self.config.input_dir).await?;
        let (forum_files, topic_files) = self.partition(&files);
        info!(
            forum_files = forum_files.len(),
            topic_files = topic_files.len(),
            "Enumerated export"
        );

        self.ingest_index().await;

        let concurrency = self.config.asset_sweep_concurrency;
        self.report.asset_sweep = self
            .assets
            .sweep_unresolved(self.db.pool(), concurrency)
            .await
            .context("Failed to sweep unresolved assets")?;

        for file in &forum_files {
            self.ingest_forum_file(file).await?;
        }
        for file in &topic_files {
            self.ingest_topic_file(file).await;
        }

        self.check_counts().await;
        if self.config.backfill_enabled {
            self.backfill_empty_topics().await;
        }

        self.report.assets = self.assets.stats();
        self.report.synthetic_users = self.identities.assigned_count();
        match db::entity_counts(self.db.pool()).await {
            Ok(counts) => self.report.counts = counts,
            Err(e) => warn!(error = %format!("{e:#}"), "Couldn't count stored entities"),
        }
        info!(
            forums = self.report.counts.forums,
            topics = self.report.counts.topics,
            posts = self.report.counts.posts,
            users = self.report.counts.users,
            assets = self.report.counts.assets,
            issues = self.report.issues.len(),
            "Ingestion complete"
        );
        Ok(self.report)
    }

    fn partition(&self, files: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let mut forums = Vec::new();
        let mut topics = Vec::new();
        for file in files {
            let name = page_name(file);
            if name.starts_with(&self.config.forum_file_prefix) {
                forums.push(file.clone());
            } else if name.starts_with(&self.config.topic_file_prefix) {
                topics.push(file.clone());
            }
        }
        (forums, topics)
    }

    pub(crate) fn skipped(&mut self, page: &str, reason: SkipReason) {
        info!(page = %page, reason = %reason, "Skipping page");
        self.push_issue(page, IssueKind::Skipped, reason.to_string(), None);
    }

    pub(crate) fn parse_failed(&mut self, page: &str, error: &PageError) {
        warn!(page = %page, error = %error, "Couldn't parse page");
        self.push_issue(page, IssueKind::Parse, error.to_string(), None);
    }

    pub(crate) fn storage_failed(&mut self, page: &str, phase: &str, error: &anyhow::Error) {
        warn!(page = %page, phase = %phase, error = %format!("{error:#}"), "Storage error");
        self.push_issue(
            page,
            IssueKind::Storage,
            format!("Error saving {phase}"),
            Some(format!("{error:#}")),
        );
    }

    fn push_issue(&mut self, page: &str, kind: IssueKind, reason: String, cause: Option<String>) {
        self.report.issues.push(IngestIssue {
            page: page.to_string(),
            kind,
            reason,
            cause,
        });
    }
}

/// The name a page is reported under.
pub(crate) fn page_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// Read a page, recording an issue instead of failing the run.
pub(crate) async fn read_page(run: &mut IngestRun, path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            let page = page_name(path);
            warn!(page = %page, error = %e, "Couldn't read page");
            run.push_issue(&page, IssueKind::Parse, "Couldn't read file".to_string(), Some(e.to_string()));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_display() {
        let issue = IngestIssue {
            page: "viewtopic1.html".to_string(),
            kind: IssueKind::Storage,
            reason: "Error saving posts".to_string(),
            cause: Some("no such table: posts".to_string()),
        };
        assert_eq!(
            issue.to_string(),
            "viewtopic1.html [Storage]: Error saving posts (no such table: posts)"
        );
    }

    #[test]
    fn test_page_name() {
        assert_eq!(page_name(Path::new("/in/forum/viewtopic12.html")), "viewtopic12.html");
    }
}
