//! The snapshot index's JSON shape and the URL key snapshots are cached under.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static SESSION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([?&])sid=[0-9a-f]{32}(&?)").expect("static regex"));

static DEFAULT_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^/?#]+?):(?:80|443)([/?#]|$)").expect("static regex"));

/// One capture of a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// `YYYYMMDDhhmmss`; lexical order is chronological.
    pub timestamp: String,
    /// The URL as it was captured.
    pub original: String,
}

/// One page of index results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPage {
    pub records: Vec<SnapshotRecord>,
    /// Present when more results are available.
    pub resume_key: Option<String>,
}

/// Parse an index response: a header row of field names, data rows, and
/// optionally an empty row followed by a one-element continuation-key row.
///
/// # Errors
///
/// Returns an error if the body is not a JSON array of string arrays.
pub fn parse_index_response(body: &str) -> Result<IndexPage, serde_json::Error> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(IndexPage::default());
    }

    let mut rows: Vec<Vec<String>> = serde_json::from_str(body)?;
    if rows.is_empty() {
        return Ok(IndexPage::default());
    }

    let mut resume_key = None;
    if rows.len() > 2 && rows[rows.len() - 2].is_empty() {
        resume_key = rows.pop().and_then(|row| row.into_iter().next());
        rows.pop();
    }

    let header = rows.remove(0);
    let column = |name: &str| header.iter().position(|field| field == name);
    let (Some(ts_col), Some(original_col)) = (column("timestamp"), column("original")) else {
        return Ok(IndexPage {
            records: Vec::new(),
            resume_key,
        });
    };

    let records = rows
        .into_iter()
        .filter_map(|mut row| {
            if row.len() <= ts_col.max(original_col) {
                return None;
            }
            Some(SnapshotRecord {
                timestamp: std::mem::take(&mut row[ts_col]),
                original: std::mem::take(&mut row[original_col]),
            })
        })
        .collect();

    Ok(IndexPage {
        records,
        resume_key,
    })
}

/// The key a URL's snapshots are cached under: scheme, default ports, and
/// phpBB session ids removed. Hosts are left as written.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_scheme = strip_scheme(trimmed);
    let without_port = DEFAULT_PORT.replace(without_scheme, "$1$2");
    SESSION_ID
        .replace_all(&without_port, |caps: &Captures<'_>| {
            // Keep the separator only if another parameter follows.
            if caps[2].is_empty() {
                String::new()
            } else {
                caps[1].to_string()
            }
        })
        .into_owned()
}

/// `url` without a leading `http://` or `https://`.
#[must_use]
pub fn strip_scheme(url: &str) -> &str {
    let lower = url.get(..8).map(str::to_ascii_lowercase).unwrap_or_default();
    if lower.starts_with("https://") {
        &url[8..]
    } else if lower.starts_with("http://") {
        &url[7..]
    } else {
        url
    }
}

/// Fold records into `cache`, keeping only the latest capture per key.
pub fn absorb(cache: &mut HashMap<String, SnapshotRecord>, records: Vec<SnapshotRecord>) {
    for record in records {
        let key = normalize_url(&record.original);
        match cache.get(&key) {
            Some(existing) if existing.timestamp >= record.timestamp => {}
            _ => {
                cache.insert(key, record);
            }
        }
    }
}
