//! Source acquisition: resolve the configured source to a local file,
//! downloading it first when it is an http(s) URL and not already on disk.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Resolve `source` to a readable local path. URLs are downloaded into the
/// current directory under their last path segment; an existing complete
/// download is reused rather than re-fetched.
pub async fn ensure_local(source: &str) -> Result<PathBuf> {
    ensure_local_in(source, Path::new(".")).await
}

/// Same as [`ensure_local`], with an explicit download directory.
pub async fn ensure_local_in(source: &str, dir: &Path) -> Result<PathBuf> {
    if let Some(url) = parse_http_url(source) {
        let target = dir.join(download_filename(&url));
        if target.exists() {
            info!(path = %target.display(), "source already downloaded; reusing");
            return Ok(target);
        }
        download(&url, &target).await?;
        return Ok(target);
    }

    let path = PathBuf::from(source);
    if !path.exists() {
        bail!("source file {} does not exist", path.display());
    }
    Ok(path)
}

fn parse_http_url(source: &str) -> Option<url::Url> {
    let url = url::Url::parse(source).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Last path segment of the URL, or a fixed fallback when the URL has none.
fn download_filename(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("download.csv")
        .to_string()
}

/// In-progress download path. The final name only ever holds a complete
/// file: a run killed mid-stream leaves `<name>.part` behind, which the
/// `exists()` reuse check ignores.
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Stream the body to disk chunk by chunk (the trip files run to
/// gigabytes), then rename into place once fully flushed.
async fn download(url: &url::Url, target: &Path) -> Result<()> {
    info!(url = %url, path = %target.display(), "downloading source");
    let mut response = reqwest::get(url.clone())
        .await
        .with_context(|| format!("requesting {url}"))?
        .error_for_status()
        .with_context(|| format!("downloading {url}"))?;

    let partial = partial_path(target);
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("creating {}", partial.display()))?;
    let mut bytes: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        bytes += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);
    tokio::fs::rename(&partial, target)
        .await
        .with_context(|| format!("moving download into place at {}", target.display()))?;
    info!(bytes, path = %target.display(), "download complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn existing_path_passes_through() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "a,b").unwrap();
        let path = ensure_local(f.path().to_str().unwrap()).await.unwrap();
        assert_eq!(path, f.path());
    }

    #[tokio::test]
    async fn missing_path_is_an_error() {
        let err = ensure_local("/no/such/file.csv").await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn complete_download_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("trips.csv"), "a,b\n1,2\n").unwrap();
        // An unreachable host proves no network request is made.
        let path = ensure_local_in("https://example.invalid/data/trips.csv", dir.path())
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("trips.csv"));
    }

    #[tokio::test]
    async fn leftover_partial_file_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        // What an interrupted run leaves behind: only the .part file.
        std::fs::write(dir.path().join("trips.csv.part"), "a,b\n1,").unwrap();
        let result = ensure_local_in("https://example.invalid/data/trips.csv", dir.path()).await;
        // The truncated file must not satisfy the request; a fresh download
        // is attempted instead (and fails against the unreachable host).
        assert!(result.is_err());
        assert!(!dir.path().join("trips.csv").exists());
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("yellow_tripdata_2021-01.csv")),
            Path::new("yellow_tripdata_2021-01.csv.part")
        );
    }

    #[test]
    fn derives_filename_from_url() {
        let url = url::Url::parse("https://example.com/data/yellow_tripdata_2021-01.csv").unwrap();
        assert_eq!(download_filename(&url), "yellow_tripdata_2021-01.csv");
        let bare = url::Url::parse("https://example.com/").unwrap();
        assert_eq!(download_filename(&bare), "download.csv");
    }

    #[test]
    fn only_http_schemes_are_urls() {
        assert!(parse_http_url("https://example.com/x.csv").is_some());
        assert!(parse_http_url("http://example.com/x.csv").is_some());
        assert!(parse_http_url("ftp://example.com/x.csv").is_none());
        assert!(parse_http_url("./local/file.csv").is_none());
        assert!(parse_http_url("yellow_tripdata_2021-01.csv").is_none());
    }
}
