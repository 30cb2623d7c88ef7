use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::reference::{AssetReference, ReferenceKind};
use crate::fs_utils;
use crate::wayback::ArchiveRetriever;

/// One place an asset might be acquired from.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Write the asset to `dest`. Returns `false` if this source does not have it.
    async fn acquire(&self, reference: &AssetReference, dest: &Path) -> bool;
}

/// Sources tried in order until one succeeds.
pub struct SourceChain {
    sources: Vec<Box<dyn AssetSource>>,
}

impl SourceChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Local export, mirrored tree, direct http, direct https, then the archive
    /// with and without the query string.
    #[must_use]
    pub fn standard(
        input_dir: PathBuf,
        mirror_root: PathBuf,
        client: Client,
        archive: Arc<ArchiveRetriever>,
    ) -> Self {
        // Export pages may reach up into the mirror, but never out of it.
        let boundary = if is_within(&input_dir, &mirror_root) {
            mirror_root.clone()
        } else {
            input_dir.clone()
        };
        let mut chain = Self::new();
        chain.register(Box::new(LocalTree {
            root: input_dir,
            boundary,
        }));
        chain.register(Box::new(MirrorTree { root: mirror_root }));
        chain.register(Box::new(DirectFetch {
            client: client.clone(),
            scheme: Scheme::Http,
        }));
        chain.register(Box::new(DirectFetch {
            client,
            scheme: Scheme::Https,
        }));
        chain.register(Box::new(ArchiveLookup {
            archive: archive.clone(),
            drop_query: false,
        }));
        chain.register(Box::new(ArchiveLookup {
            archive,
            drop_query: true,
        }));
        chain
    }

    /// Append a source; earlier sources are tried first.
    pub fn register(&mut self, source: Box<dyn AssetSource>) {
        self.sources.push(source);
    }

    /// Try every source in order. Returns the name of the one that succeeded.
    pub async fn acquire(&self, reference: &AssetReference, dest: &Path) -> Option<&'static str> {
        for source in &self.sources {
            if source.acquire(reference, dest).await {
                debug!(url = %reference.source, source = source.name(), "Asset acquired");
                return Some(source.name());
            }
        }
        None
    }

    #[must_use]
    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

impl Default for SourceChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Files next to the exported pages. Only plain relative references live here.
pub struct LocalTree {
    pub root: PathBuf,
    /// Nothing outside this directory is read.
    pub boundary: PathBuf,
}

#[async_trait]
impl AssetSource for LocalTree {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn acquire(&self, reference: &AssetReference, dest: &Path) -> bool {
        if reference.kind != ReferenceKind::Relative {
            return false;
        }
        copy_from(&self.root, &reference.local_path, &self.boundary, dest).await
    }
}

/// The whole mirrored site, two levels above the exported pages.
pub struct MirrorTree {
    pub root: PathBuf,
}

#[async_trait]
impl AssetSource for MirrorTree {
    fn name(&self) -> &'static str {
        "mirror"
    }

    async fn acquire(&self, reference: &AssetReference, dest: &Path) -> bool {
        copy_from(&self.root, &reference.local_path, &self.root, dest).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// A plain GET of the reference's live address.
pub struct DirectFetch {
    pub client: Client,
    pub scheme: Scheme,
}

#[async_trait]
impl AssetSource for DirectFetch {
    fn name(&self) -> &'static str {
        match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    async fn acquire(&self, reference: &AssetReference, dest: &Path) -> bool {
        // An https reference is never downgraded.
        if self.scheme == Scheme::Http && reference.was_https() {
            return false;
        }
        let url = format!("{}://{}", self.name(), reference.remote);

        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "Direct fetch refused");
                return false;
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Direct fetch failed");
                return false;
            }
        };

        match fs_utils::stream_to_file(response, dest).await {
            Ok(_) => true,
            Err(e) => {
                warn!(url = %url, error = %format!("{e:#}"), "Direct download failed");
                false
            }
        }
    }
}

/// The snapshot archive, by the reference's address.
pub struct ArchiveLookup {
    pub archive: Arc<ArchiveRetriever>,
    /// Look up the address with its query string removed; skipped when there is none.
    pub drop_query: bool,
}

#[async_trait]
impl AssetSource for ArchiveLookup {
    fn name(&self) -> &'static str {
        if self.drop_query {
            "archive-no-query"
        } else {
            "archive"
        }
    }

    async fn acquire(&self, reference: &AssetReference, dest: &Path) -> bool {
        let address = if self.drop_query {
            match reference.remote_without_query() {
                Some(address) => address,
                None => return false,
            }
        } else {
            reference.remote.as_str()
        };
        self.archive.download(address, dest).await
    }
}

async fn copy_from(root: &Path, relative: &str, boundary: &Path, dest: &Path) -> bool {
    if relative.is_empty() {
        return false;
    }
    let path = root.join(relative);
    if !is_within(&path, boundary) {
        debug!(path = %path.display(), "Asset path leaves the mirror, skipping");
        return false;
    }
    match fs_utils::copy_if_exists(&path, dest).await {
        Ok(copied) => copied,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Local asset copy failed");
            false
        }
    }
}

/// Whether `path` stays inside `boundary` once `.` and `..` are resolved.
///
/// Resolution is lexical; symlinks are not followed.
fn is_within(path: &Path, boundary: &Path) -> bool {
    match (lexical_absolute(path), lexical_absolute(boundary)) {
        (Some(path), Some(boundary)) => path.starts_with(boundary),
        _ => false,
    }
}

fn lexical_absolute(path: &Path) -> Option<PathBuf> {
    let absolute = std::path::absolute(path).ok()?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other),
        }
    }
    Some(out)
}
