//! How an image `src` found in a post maps to places the file might be found.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::wayback::cdx::strip_scheme;

static IMAGE_EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(gif|png|jpg)(?:\?.*)?$").expect("static regex"));

/// The shape of the original reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// An absolute `http(s)://` or protocol-relative URL.
    Absolute { https: bool },
    /// A root-relative path on the forum's host.
    RootRelative,
    /// `../../`-prefixed: a path from the root of the mirrored file tree.
    UpTree,
    /// Relative to the exported pages.
    Relative,
}

/// An image reference resolved against the forum's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    /// The `src` exactly as written in the markup.
    pub source: String,
    pub kind: ReferenceKind,
    /// Path to try under the local trees, query string removed.
    pub local_path: String,
    /// Scheme-less address (`host/path?query`) for remote lookups.
    pub remote: String,
}

impl AssetReference {
    /// Interpret `source` relative to `site_url`.
    #[must_use]
    pub fn parse(source: &str, site_url: &Url) -> Self {
        let trimmed = source.trim();
        let lower = trimmed.to_ascii_lowercase();

        let (kind, remote) = if lower.starts_with("https://") || lower.starts_with("http://") {
            let https = lower.starts_with("https://");
            (ReferenceKind::Absolute { https }, strip_scheme(trimmed).to_string())
        } else if let Some(rest) = trimmed.strip_prefix("//") {
            (ReferenceKind::Absolute { https: false }, rest.to_string())
        } else if trimmed.starts_with('/') {
            (ReferenceKind::RootRelative, format!("{}{trimmed}", host_of(site_url)))
        } else if trimmed.starts_with("../../") {
            (ReferenceKind::UpTree, joined(site_url, trimmed))
        } else {
            (ReferenceKind::Relative, joined(site_url, trimmed))
        };

        let local = match kind {
            ReferenceKind::UpTree => trimmed.trim_start_matches("../../"),
            ReferenceKind::Relative => trimmed,
            ReferenceKind::Absolute { .. } | ReferenceKind::RootRelative => remote.as_str(),
        };
        let local_path = strip_query(local).to_string();

        Self {
            source: source.to_string(),
            kind,
            local_path,
            remote,
        }
    }

    /// Whether the reference already named the `https` scheme.
    #[must_use]
    pub const fn was_https(&self) -> bool {
        matches!(self.kind, ReferenceKind::Absolute { https: true })
    }

    /// The remote address without its query string, if it had one.
    #[must_use]
    pub fn remote_without_query(&self) -> Option<&str> {
        let stripped = strip_query(&self.remote);
        (stripped.len() < self.remote.len()).then_some(stripped)
    }
}

/// The lowercased image extension (`gif`, `png` or `jpg`), ignoring a trailing query.
#[must_use]
pub fn image_extension(source: &str) -> Option<String> {
    IMAGE_EXTENSION
        .captures(source.trim())
        .map(|caps| caps[1].to_ascii_lowercase())
}

/// A fresh collision-resistant file name: a random 128-bit value in base 36.
#[must_use]
pub fn generate_file_name(extension: &str) -> String {
    format!("{}.{extension}", to_base36(rand::random::<u128>()))
}

fn to_base36(mut value: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(25);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

fn host_of(site_url: &Url) -> String {
    let host = site_url.host_str().unwrap_or_default();
    match site_url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn joined(site_url: &Url, relative: &str) -> String {
    site_url.join(relative).map_or_else(
        |_| format!("{}/{relative}", host_of(site_url)),
        |url| strip_scheme(url.as_str()).to_string(),
    )
}
