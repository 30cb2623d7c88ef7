//! Forum mirror library.
//!
//! Rebuilds a relational dataset (forums, topics, posts, users, assets) from a
//! static phpBB HTML export, filling gaps from the Wayback Machine.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod assets;
pub mod config;
pub mod constants;
pub mod db;
pub mod fs_utils;
pub mod ingest;
pub mod parse;
pub mod wayback;
