use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Copy `src` to `dst` if `src` is an existing file.
///
/// Returns `Ok(false)` when there is nothing to copy.
pub async fn copy_if_exists(src: &Path, dst: &Path) -> Result<bool> {
    match tokio::fs::metadata(src).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Ok(false),
    }

    tokio::fs::copy(src, dst).await.with_context(|| {
        format!(
            "Failed to copy {} to {}",
            src.display(),
            dst.display()
        )
    })?;
    Ok(true)
}

/// Stream a response body into `dst`, removing the partial file on failure.
///
/// Returns the number of bytes written.
pub async fn stream_to_file(mut response: reqwest::Response, dst: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(dst)
        .await
        .with_context(|| format!("Failed to create {}", dst.display()))?;

    let mut written = 0u64;
    let result: Result<()> = async {
        while let Some(chunk) = response.chunk().await.context("Failed to read response body")? {
            file.write_all(&chunk).await.context("Failed to write chunk")?;
            written += chunk.len() as u64;
        }
        file.flush().await.context("Failed to flush file")?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        drop(file);
        if let Err(remove_err) = tokio::fs::remove_file(dst).await {
            debug!(path = %dst.display(), error = %remove_err, "Failed to remove partial file");
        }
        return Err(e.context(format!("Failed to download into {}", dst.display())));
    }

    Ok(written)
}

/// Every `.html`/`.htm` file directly inside `dir`, sorted by file name.
pub async fn list_html_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && crate::config::Config::is_html(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_copy_if_exists() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.gif");
        let dst = dir.path().join("b.gif");

        assert!(!copy_if_exists(&src, &dst).await.unwrap());
        tokio::fs::write(&src, b"GIF89a").await.unwrap();
        assert!(copy_if_exists(&src, &dst).await.unwrap());
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"GIF89a");
    }

    #[tokio::test]
    async fn test_copy_ignores_directories() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("out");
        assert!(!copy_if_exists(dir.path(), &dst).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_html_files_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["viewtopic2.html", "viewforum1.html", "style.css", "index.htm"] {
            tokio::fs::write(dir.path().join(name), "").await.unwrap();
        }
        tokio::fs::create_dir(dir.path().join("sub.html")).await.unwrap();

        let names: Vec<String> = list_html_files(dir.path())
            .await
            .unwrap()
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["index.htm", "viewforum1.html", "viewtopic2.html"]);
    }
}
