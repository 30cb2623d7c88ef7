//! Shared constants used across the application.

/// User agent string used for every outbound HTTP request.
pub const ARCHIVAL_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// First id handed out to posters that have no profile link.
pub const SYNTHETIC_USER_ID_FLOOR: i64 = 100_000;

/// Prefix written in front of a resolved asset file name when rewriting a post body.
pub const ASSET_REFERENCE_PREFIX: &str = "assets/";
