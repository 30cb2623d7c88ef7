//! Snapshot-archive lookups: find the latest capture of a URL in the index and
//! fetch or download its content.

pub mod cdx;

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::{Client, Response};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use self::cdx::{absorb, normalize_url, parse_index_response, IndexPage, SnapshotRecord};
use crate::config::Config;
use crate::constants::ARCHIVAL_USER_AGENT;
use crate::fs_utils;

static SNAPSHOT_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/web/\d+[a-z_]*/(https?://.+)$").expect("static regex"));

/// Per-key async locks; concurrent callers for one key wait on the first.
type Gates<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

/// Captures seen so far, split by whether the query carried the cutoff.
#[derive(Default)]
struct SnapshotCache {
    /// Normalized URL to its latest capture before the cutoff.
    bounded: HashMap<String, SnapshotRecord>,
    /// Normalized URL to its latest capture from uncapped lookups.
    unbounded: HashMap<String, SnapshotRecord>,
    /// Lookups the index has answered, by normalized URL and cutoff.
    queried: HashSet<(String, bool)>,
}

impl SnapshotCache {
    /// The latest known capture of `key`; with `bounded`, only captures
    /// before the cutoff qualify.
    fn get(&self, key: &str, bounded: bool) -> Option<SnapshotRecord> {
        let before_cutoff = self.bounded.get(key);
        if bounded {
            return before_cutoff.cloned();
        }
        match (before_cutoff, self.unbounded.get(key)) {
            (Some(a), Some(b)) if a.timestamp >= b.timestamp => Some(a.clone()),
            (a, b) => b.or(a).cloned(),
        }
    }

    fn absorb(&mut self, records: Vec<SnapshotRecord>, bounded: bool) {
        let cache = if bounded {
            &mut self.bounded
        } else {
            &mut self.unbounded
        };
        absorb(cache, records);
    }

    fn len(&self) -> usize {
        self.bounded.len()
    }
}

/// Rate-limited, caching client for the snapshot archive.
///
/// Caches live for the lifetime of the retriever; std locks are never held
/// across an `.await`.
pub struct ArchiveRetriever {
    client: Client,
    index_url: String,
    content_url: String,
    cutoff: String,
    /// One permit per request; a background task refills them.
    rate_limiter: Arc<Semaphore>,
    snapshots: Mutex<SnapshotCache>,
    lookups_in_flight: Gates<(String, bool)>,
    /// Normalized URL to a file already downloaded from the archive.
    downloads: Mutex<HashMap<String, PathBuf>>,
    downloads_in_flight: Gates<String>,
}

impl ArchiveRetriever {
    /// Create a retriever allowing `archive_rate_limit_per_min` requests per minute.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let rate_limit = config.archive_rate_limit_per_min.max(1) as usize;
        let permit_interval = Duration::from_secs(60) / config.archive_rate_limit_per_min.max(1);

        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(ARCHIVAL_USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        let rate_limiter = Arc::new(Semaphore::new(rate_limit));

        // Refill permits over time; stop once the retriever is dropped.
        let limiter = Arc::downgrade(&rate_limiter);
        tokio::spawn(async move {
            loop {
                sleep(permit_interval).await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                if limiter.available_permits() < rate_limit {
                    limiter.add_permits(1);
                }
            }
        });

        Ok(Self {
            client,
            index_url: config.snapshot_index_url.clone(),
            content_url: config.snapshot_content_url.trim_end_matches('/').to_string(),
            cutoff: config.snapshot_cutoff.clone(),
            rate_limiter,
            snapshots: Mutex::new(SnapshotCache::default()),
            lookups_in_flight: Mutex::new(HashMap::new()),
            downloads: Mutex::new(HashMap::new()),
            downloads_in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Fetch the text of the latest capture of `url` taken before the cutoff.
    ///
    /// Every failure (no capture, index or content unavailable) yields `None`.
    pub async fn fetch(&self, url: &str) -> Option<String> {
        let record = self.lookup(url, true).await?;
        let response = self.get_snapshot(&record).await?;
        match response.text().await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read snapshot body");
                None
            }
        }
    }

    /// Download the latest capture of `url` into `dest`.
    ///
    /// A resource already downloaded by this retriever is copied from its
    /// earlier destination instead of fetched again. Captures after the cutoff
    /// are accepted.
    pub async fn download(&self, url: &str, dest: &Path) -> bool {
        let key = normalize_url(url);
        let gate = gate(&self.downloads_in_flight, &key);
        let _guard = gate.lock().await;

        let existing = lock(&self.downloads).get(&key).cloned();
        if let Some(existing) = existing {
            match fs_utils::copy_if_exists(&existing, dest).await {
                Ok(true) => {
                    debug!(url = %url, from = %existing.display(), "Reused archived download");
                    return true;
                }
                Ok(false) => {}
                Err(e) => warn!(error = %format!("{e:#}"), "Failed to reuse archived download"),
            }
        }

        let Some(record) = self.lookup(url, false).await else {
            return false;
        };
        let Some(response) = self.get_snapshot(&record).await else {
            return false;
        };

        match fs_utils::stream_to_file(response, dest).await {
            Ok(bytes) => {
                debug!(url = %url, bytes, dest = %dest.display(), "Downloaded from archive");
                let mut downloads = lock(&self.downloads);
                downloads.insert(normalize_url(&record.original), dest.to_path_buf());
                downloads.insert(key, dest.to_path_buf());
                true
            }
            Err(e) => {
                warn!(url = %url, error = %format!("{e:#}"), "Archive download failed");
                false
            }
        }
    }

    /// Walk every index page for captures under `prefix` and cache them.
    ///
    /// Returns the number of distinct URLs cached afterwards.
    pub async fn prepopulate(&self, prefix: &str) -> usize {
        let mut resume_key: Option<String> = None;
        let mut seen_keys = HashSet::new();

        loop {
            let Some(page) = self.query_index(prefix, true, true, resume_key.as_deref()).await
            else {
                break;
            };
            lock(&self.snapshots).absorb(page.records, true);

            match page.resume_key {
                Some(key) if seen_keys.insert(key.clone()) => resume_key = Some(key),
                Some(key) => {
                    warn!(prefix = %prefix, key = %key, "Index repeated a resume key, stopping");
                    break;
                }
                None => break,
            }
        }

        let cached = lock(&self.snapshots).len();
        info!(prefix = %prefix, cached, "Pre-populated snapshot cache");
        cached
    }

    /// The latest cached capture for `url`, if any, regardless of the cutoff.
    #[must_use]
    pub fn cached(&self, url: &str) -> Option<SnapshotRecord> {
        lock(&self.snapshots).get(&normalize_url(url), false)
    }

    /// Address of a capture's content.
    #[must_use]
    pub fn snapshot_address(&self, record: &SnapshotRecord) -> String {
        format!("{}/{}/{}", self.content_url, record.timestamp, record.original)
    }

    /// The latest capture of `url`, asking the index at most once per key
    /// unless the index failed to answer.
    async fn lookup(&self, url: &str, with_cutoff: bool) -> Option<SnapshotRecord> {
        let key = normalize_url(url);
        if let Some(record) = lock(&self.snapshots).get(&key, with_cutoff) {
            return Some(record);
        }

        let query = (key, with_cutoff);
        let gate = gate(&self.lookups_in_flight, &query);
        let _guard = gate.lock().await;
        {
            // Another caller may have answered while this one waited.
            let snapshots = lock(&self.snapshots);
            if let Some(record) = snapshots.get(&query.0, with_cutoff) {
                return Some(record);
            }
            if snapshots.queried.contains(&query) {
                return None;
            }
        }

        let page = self.query_index(&query.0, with_cutoff, false, None).await?;
        let mut snapshots = lock(&self.snapshots);
        snapshots.absorb(page.records, with_cutoff);
        let found = snapshots.get(&query.0, with_cutoff);
        snapshots.queried.insert(query);
        if found.is_none() {
            debug!(url = %url, "No capture in snapshot index");
        }
        found
    }

    async fn query_index(
        &self,
        url: &str,
        with_cutoff: bool,
        show_resume_key: bool,
        resume_key: Option<&str>,
    ) -> Option<IndexPage> {
        let mut params: Vec<(&str, &str)> = vec![
            ("matchType", "prefix"),
            ("output", "json"),
            ("filter", "statuscode:200"),
            ("fastLatest", "true"),
        ];
        if with_cutoff {
            params.push(("to", self.cutoff.as_str()));
        }
        if show_resume_key {
            params.push(("showResumeKey", "true"));
        }
        if let Some(key) = resume_key {
            params.push(("resumeKey", key));
        }
        params.push(("url", url));

        let response = self
            .send(self.client.get(&self.index_url).query(&params))
            .await?;
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read snapshot index response");
                return None;
            }
        };

        match parse_index_response(&body) {
            Ok(page) => {
                debug!(url = %url, records = page.records.len(), "Snapshot index answered");
                Some(page)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Unparseable snapshot index response");
                None
            }
        }
    }

    async fn get_snapshot(&self, record: &SnapshotRecord) -> Option<Response> {
        let address = self.snapshot_address(record);
        debug!(address = %address, "Fetching snapshot");
        self.send(self.client.get(&address)).await
    }

    /// Send a request under the rate limit. Non-success statuses and transport
    /// errors are logged and yield `None`.
    async fn send(&self, request: reqwest::RequestBuilder) -> Option<Response> {
        match self.rate_limiter.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return None,
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => Some(response),
            Ok(response) => {
                warn!(url = %response.url(), status = %response.status(), "Archive request failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "Archive request error");
                None
            }
        }
    }
}

/// The archived URL inside a snapshot address, or the input unchanged.
///
/// Links on archived pages point back into the archive; following them
/// directly would bypass the cache.
#[must_use]
pub fn unwrap_snapshot_address(href: &str) -> &str {
    SNAPSHOT_ADDRESS
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map_or(href, |m| m.as_str())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn gate<K: Eq + Hash + Clone>(gates: &Gates<K>, key: &K) -> Arc<AsyncMutex<()>> {
    Arc::clone(lock(gates).entry(key.clone()).or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_snapshot_address() {
        assert_eq!(
            unwrap_snapshot_address(
                "https://web.archive.org/web/20150101000000/https://example.com/forum/viewtopic.php?f=1&t=2&start=15"
            ),
            "https://example.com/forum/viewtopic.php?f=1&t=2&start=15"
        );
        assert_eq!(
            unwrap_snapshot_address("/web/20150101000000id_/http://example.com/a.gif"),
            "http://example.com/a.gif"
        );
        assert_eq!(
            unwrap_snapshot_address("./viewtopic.php?f=1&t=2&start=15"),
            "./viewtopic.php?f=1&t=2&start=15"
        );
    }

    fn record(timestamp: &str) -> SnapshotRecord {
        SnapshotRecord {
            timestamp: timestamp.to_string(),
            original: "http://example.com/a.gif".to_string(),
        }
    }

    #[test]
    fn test_bounded_lookups_ignore_later_captures() {
        let mut cache = SnapshotCache::default();
        cache.absorb(vec![record("20300101000000")], false);
        assert_eq!(cache.get("example.com/a.gif", true), None);
        assert_eq!(
            cache.get("example.com/a.gif", false).unwrap().timestamp,
            "20300101000000"
        );

        cache.absorb(vec![record("20150101000000")], true);
        assert_eq!(
            cache.get("example.com/a.gif", true).unwrap().timestamp,
            "20150101000000"
        );
        // Uncapped lookups take whichever capture is newest.
        assert_eq!(
            cache.get("example.com/a.gif", false).unwrap().timestamp,
            "20300101000000"
        );
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_address() {
        let config = Config {
            snapshot_content_url: "https://archive.example/web/".to_string(),
            ..Config::for_testing()
        };
        let retriever = ArchiveRetriever::new(&config).unwrap();
        let record = SnapshotRecord {
            timestamp: "20150101000000".to_string(),
            original: "http://example.com/a.gif".to_string(),
        };
        assert_eq!(
            retriever.snapshot_address(&record),
            "https://archive.example/web/20150101000000/http://example.com/a.gif"
        );
    }
}
