use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
    #[error("failed to parse {name} as URL: {source}")]
    ParseUrl {
        name: String,
        #[source]
        source: url::ParseError,
    },
}

/// Ingestion configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Input
    pub input_dir: PathBuf,
    pub mirror_root: PathBuf,
    pub index_file: String,
    pub forum_file_prefix: String,
    pub topic_file_prefix: String,

    // Output
    pub output_dir: PathBuf,
    pub database_path: PathBuf,

    // Live site
    pub site_url: Url,

    // Snapshot archive
    pub snapshot_index_url: String,
    pub snapshot_content_url: String,
    pub snapshot_cutoff: String,
    pub archive_rate_limit_per_min: u32,

    // Network
    pub http_timeout: Duration,
    pub asset_sweep_concurrency: usize,

    // Behaviour
    pub backfill_enabled: bool,
    pub strict_forum_pages: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let input_dir = PathBuf::from(required_env("INPUT_DIR")?);
        let mirror_root = optional_env("MIRROR_ROOT")
            .map_or_else(|| input_dir.join("..").join(".."), PathBuf::from);

        Ok(Self {
            // Input
            mirror_root,
            index_file: env_or_default("INDEX_FILE", "index.html"),
            forum_file_prefix: env_or_default("FORUM_FILE_PREFIX", "viewforum"),
            topic_file_prefix: env_or_default("TOPIC_FILE_PREFIX", "viewtopic"),
            input_dir,

            // Output
            output_dir: PathBuf::from(env_or_default("OUTPUT_DIR", "./output")),
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/forum.sqlite")),

            // Live site
            site_url: parse_env_url("SITE_URL", "https://loadingreadyrun.com/forum/")?,

            // Snapshot archive
            snapshot_index_url: env_or_default(
                "SNAPSHOT_INDEX_URL",
                "https://web.archive.org/cdx/search/cdx",
            ),
            snapshot_content_url: env_or_default(
                "SNAPSHOT_CONTENT_URL",
                "https://web.archive.org/web",
            ),
            snapshot_cutoff: env_or_default("SNAPSHOT_CUTOFF", "20250323014429"),
            archive_rate_limit_per_min: parse_env_u32("ARCHIVE_RATE_LIMIT_PER_MIN", 60)?,

            // Network
            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),
            asset_sweep_concurrency: parse_env_usize("ASSET_SWEEP_CONCURRENCY", 4)?,

            // Behaviour
            backfill_enabled: parse_env_bool("BACKFILL_ENABLED", true)?,
            strict_forum_pages: parse_env_bool("STRICT_FORUM_PAGES", false)?,
        })
    }

    /// Configuration for tests: paths under the temp dir and every network
    /// endpoint pointed at a closed local port. Tests override what they need.
    #[must_use]
    pub fn for_testing() -> Self {
        let base = std::env::temp_dir().join("forum-mirror-test");
        let input_dir = base.join("site").join("forum");
        Self {
            mirror_root: base.clone(),
            index_file: "index.html".to_string(),
            forum_file_prefix: "viewforum".to_string(),
            topic_file_prefix: "viewtopic".to_string(),
            input_dir,
            output_dir: base.join("output"),
            database_path: base.join("forum.sqlite"),
            site_url: Url::parse("http://127.0.0.1:9/forum/").expect("static URL"),
            snapshot_index_url: "http://127.0.0.1:9/cdx/search/cdx".to_string(),
            snapshot_content_url: "http://127.0.0.1:9/web".to_string(),
            snapshot_cutoff: "20250323014429".to_string(),
            archive_rate_limit_per_min: 6000,
            http_timeout: Duration::from_secs(5),
            asset_sweep_concurrency: 2,
            backfill_enabled: true,
            strict_forum_pages: false,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=20).contains(&self.asset_sweep_concurrency) {
            return Err(ConfigError::InvalidValue {
                name: "ASSET_SWEEP_CONCURRENCY".to_string(),
                message: "must be between 1 and 20".to_string(),
            });
        }
        if self.archive_rate_limit_per_min == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ARCHIVE_RATE_LIMIT_PER_MIN".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.snapshot_cutoff.is_empty() || !self.snapshot_cutoff.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::InvalidValue {
                name: "SNAPSHOT_CUTOFF".to_string(),
                message: format!("must be a digit-only timestamp, got '{}'", self.snapshot_cutoff),
            });
        }
        if self.site_url.host_str().is_none() {
            return Err(ConfigError::InvalidValue {
                name: "SITE_URL".to_string(),
                message: "must include a host".to_string(),
            });
        }
        Ok(())
    }

    /// Directory that receives every acquired asset.
    #[must_use]
    pub fn assets_dir(&self) -> PathBuf {
        self.output_dir.join("assets")
    }

    /// Path of the top-level index page.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.input_dir.join(&self.index_file)
    }

    /// Whether `path` looks like an exported HTML page.
    #[must_use]
    pub fn is_html(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_url(name: &str, default: &str) -> Result<Url, ConfigError> {
    let raw = env_or_default(name, default);
    // A base without a trailing slash would drop its last path segment on join.
    let raw = if raw.ends_with('/') { raw } else { format!("{raw}/") };
    Url::parse(&raw).map_err(|e| ConfigError::ParseUrl {
        name: name.to_string(),
        source: e,
    })
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => parse_bool(name, &val),
        _ => Ok(default),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::ParseBool {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_env_bool("NONEXISTENT_VAR", true).unwrap());
        assert!(!parse_env_bool("NONEXISTENT_VAR", false).unwrap());
        assert!(parse_bool("X", "YES").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_validate_sweep_concurrency() {
        let mut config = Config::for_testing();
        assert!(config.validate().is_ok());

        config.asset_sweep_concurrency = 0;
        assert!(config.validate().is_err());

        config.asset_sweep_concurrency = 21;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_cutoff() {
        let config = Config {
            snapshot_cutoff: "2025-03-23".to_string(),
            ..Config::for_testing()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_assets_dir() {
        let config = Config {
            output_dir: PathBuf::from("/tmp/out"),
            ..Config::for_testing()
        };
        assert_eq!(config.assets_dir(), PathBuf::from("/tmp/out/assets"));
    }

    #[test]
    fn test_is_html() {
        assert!(Config::is_html(Path::new("viewtopic0ab0.html")));
        assert!(Config::is_html(Path::new("viewforum12.HTM")));
        assert!(!Config::is_html(Path::new("style.css")));
    }
}
