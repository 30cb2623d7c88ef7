//! Resolving images referenced in post bodies to files under the assets directory.

pub mod reference;
pub mod sources;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};
use url::Url;

use self::reference::{generate_file_name, image_extension, AssetReference};
use self::sources::SourceChain;
use crate::config::Config;
use crate::constants::{ARCHIVAL_USER_AGENT, ASSET_REFERENCE_PREFIX};
use crate::db::{self, Asset};
use crate::wayback::ArchiveRetriever;

/// Running totals for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssetStats {
    /// Acquired from some source this run.
    pub acquired: usize,
    /// Served from the resolved-asset cache.
    pub reused: usize,
    /// Every source failed.
    pub unresolved: usize,
    /// No recognizable image extension.
    pub skipped: usize,
}

/// Result of a sweep over assets earlier runs could not acquire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub attempted: usize,
    pub acquired: usize,
}

/// Maps image sources to local files, acquiring each at most once.
///
/// The cache is keyed by the source exactly as written. Every source is tried
/// at most once per run; failures are persisted so later runs retry them.
pub struct AssetResolver {
    chain: SourceChain,
    site_url: Url,
    assets_dir: PathBuf,
    /// Source to acquired file name.
    resolved: HashMap<String, String>,
    /// Sources stored as unresolved.
    unresolved: HashSet<String>,
    /// Sources tried this run.
    attempted: HashSet<String>,
    /// Rows not yet written to storage.
    pending: Vec<Asset>,
    stats: AssetStats,
}

impl AssetResolver {
    /// A resolver using the standard source chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config, archive: Arc<ArchiveRetriever>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        let chain = SourceChain::standard(
            config.input_dir.clone(),
            config.mirror_root.clone(),
            client,
            archive,
        );
        Ok(Self::with_chain(chain, config.site_url.clone(), config.assets_dir()))
    }

    #[must_use]
    pub fn with_chain(chain: SourceChain, site_url: Url, assets_dir: PathBuf) -> Self {
        Self {
            chain,
            site_url,
            assets_dir,
            resolved: HashMap::new(),
            unresolved: HashSet::new(),
            attempted: HashSet::new(),
            pending: Vec::new(),
            stats: AssetStats::default(),
        }
    }

    /// Replace the in-memory cache with the asset table's contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the asset table cannot be read.
    pub async fn reload(&mut self, pool: &SqlitePool) -> Result<()> {
        let assets = db::list_assets(pool).await?;
        self.resolved.clear();
        self.unresolved.clear();
        for asset in assets {
            match asset.resolved_file() {
                Some(file) => {
                    self.resolved.insert(asset.url.clone(), file.to_string());
                }
                None => {
                    self.unresolved.insert(asset.url);
                }
            }
        }
        debug!(
            resolved = self.resolved.len(),
            unresolved = self.unresolved.len(),
            "Asset cache loaded"
        );
        Ok(())
    }

    /// Write new resolution state to storage and reload the cache from it.
    ///
    /// On failure the pending rows are kept for the next flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert or the reload fails.
    pub async fn flush(&mut self, pool: &SqlitePool) -> Result<usize> {
        let written = self.pending.len();
        if written > 0 {
            db::upsert_assets(pool, &self.pending).await?;
            self.pending.clear();
        }
        self.reload(pool).await?;
        Ok(written)
    }

    /// The file name for `source`, acquiring it if this is the first sighting.
    pub async fn resolve(&mut self, source: &str) -> Option<String> {
        if let Some(file) = self.resolved.get(source) {
            self.stats.reused += 1;
            return Some(file.clone());
        }
        if !self.attempted.insert(source.to_string()) {
            return None;
        }

        let Some(extension) = image_extension(source) else {
            debug!(url = %source, "No image extension, leaving reference as is");
            self.stats.skipped += 1;
            return None;
        };

        let reference = AssetReference::parse(source, &self.site_url);
        let file_name = generate_file_name(&extension);
        let dest = self.assets_dir.join(&file_name);

        if self.chain.acquire(&reference, &dest).await.is_some() {
            self.record_acquired(source, file_name.clone());
            Some(file_name)
        } else {
            debug!(url = %source, "Asset unresolved");
            self.record_unresolved(source);
            None
        }
    }

    /// Resolve every image in a post body and rewrite the references that resolved.
    pub async fn rewrite_body(&mut self, body: &str, sources: &[String]) -> String {
        let mut body = body.to_string();
        let mut done = HashSet::new();
        for source in sources {
            if !done.insert(source.as_str()) {
                continue;
            }
            if let Some(file) = self.resolve(source).await {
                body = rewrite_reference(&body, source, &file);
            }
        }
        body
    }

    /// Retry every stored unresolved asset with up to `concurrency` acquisitions
    /// in flight, then flush.
    ///
    /// Results are applied in table order regardless of completion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the asset table cannot be read or written.
    pub async fn sweep_unresolved(
        &mut self,
        pool: &SqlitePool,
        concurrency: usize,
    ) -> Result<SweepReport> {
        let candidates: Vec<(String, String)> = db::list_unresolved_assets(pool)
            .await?
            .into_iter()
            .filter(|asset| !self.attempted.contains(&asset.url))
            .filter_map(|asset| {
                let extension = image_extension(&asset.url)?;
                Some((asset.url, generate_file_name(&extension)))
            })
            .collect();

        if candidates.is_empty() {
            return Ok(SweepReport::default());
        }
        info!(count = candidates.len(), concurrency, "Retrying unresolved assets");

        let chain = &self.chain;
        let site_url = &self.site_url;
        let assets_dir = &self.assets_dir;
        let outcomes: Vec<(String, String, bool)> = stream::iter(candidates)
            .map(|(url, file_name)| async move {
                let reference = AssetReference::parse(&url, site_url);
                let acquired = chain
                    .acquire(&reference, &assets_dir.join(&file_name))
                    .await
                    .is_some();
                (url, file_name, acquired)
            })
            .buffered(concurrency.clamp(1, 20))
            .collect()
            .await;

        let mut report = SweepReport::default();
        for (url, file_name, acquired) in outcomes {
            report.attempted += 1;
            self.attempted.insert(url.clone());
            if acquired {
                report.acquired += 1;
                self.record_acquired(&url, file_name);
            }
        }

        self.flush(pool).await?;
        info!(
            attempted = report.attempted,
            acquired = report.acquired,
            "Unresolved asset sweep complete"
        );
        Ok(report)
    }

    #[must_use]
    pub const fn stats(&self) -> AssetStats {
        self.stats
    }

    /// The cached file name for `source`, without acquiring anything.
    #[must_use]
    pub fn cached(&self, source: &str) -> Option<&str> {
        self.resolved.get(source).map(String::as_str)
    }

    fn record_acquired(&mut self, source: &str, file_name: String) {
        self.stats.acquired += 1;
        self.unresolved.remove(source);
        self.resolved.insert(source.to_string(), file_name.clone());
        self.pending.push(Asset {
            url: source.to_string(),
            file_name: Some(file_name),
            is_fetched: true,
        });
    }

    fn record_unresolved(&mut self, source: &str) {
        self.stats.unresolved += 1;
        if self.unresolved.insert(source.to_string()) {
            self.pending.push(Asset {
                url: source.to_string(),
                file_name: None,
                is_fetched: false,
            });
        }
    }
}

/// Point every `src` attribute equal to `source` at the local file.
///
/// `body` is serialized markup, so the source is escaped the way the
/// serializer escapes attribute values before matching.
#[must_use]
pub fn rewrite_reference(body: &str, source: &str, file_name: &str) -> String {
    let escaped = source
        .replace('&', "&amp;")
        .replace('\u{a0}', "&nbsp;")
        .replace('"', "&quot;");
    body.replace(
        &format!("src=\"{escaped}\""),
        &format!("src=\"{ASSET_REFERENCE_PREFIX}{file_name}\""),
    )
}
