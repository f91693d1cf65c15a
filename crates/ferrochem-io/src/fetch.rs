//! Remote files.
//!
//! Downloads are blocking and all-or-nothing: the body is streamed into a temporary file in the
//! destination directory and only renamed into place once complete.
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

pub trait Fetcher {
    /// Download `url` into `dest_dir`, returning the path of the written file.
    fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// Last path segment of `url`, without query or fragment.
pub fn file_name_from_url(url: &str) -> Result<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Cannot derive a file name from '{}'", url))
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("Cannot create '{}'", dest_dir.display()))?;
        let dest = dest_dir.join(file_name_from_url(url)?);

        tracing::info!("Downloading {} to {}", url, dest.display());
        let mut response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Request to '{}' failed", url))?
            .error_for_status()?;

        let mut tmp = NamedTempFile::new_in(dest_dir)?;
        let bytes = response
            .copy_to(&mut tmp)
            .with_context(|| format!("Download of '{}' failed", url))?;
        tmp.persist(&dest)
            .with_context(|| format!("Cannot write '{}'", dest.display()))?;

        tracing::debug!("Downloaded {} bytes", bytes);
        Ok(dest)
    }
}

/// Fetch `url` to `path` unless `path` already exists. Returns whether a download happened.
pub fn download_if_missing(fetcher: &dyn Fetcher, url: &str, path: &Path) -> Result<bool> {
    if path.exists() {
        tracing::debug!("Using cached {}", path.display());
        return Ok(false);
    }
    let dest_dir = path
        .parent()
        .ok_or_else(|| anyhow!("'{}' has no parent directory", path.display()))?;
    let fetched = fetcher.fetch(url, dest_dir)?;
    if fetched != path {
        fs::rename(&fetched, path).with_context(|| {
            format!(
                "Cannot move '{}' to '{}'",
                fetched.display(),
                path.display()
            )
        })?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct WriteFetcher {
        calls: Cell<usize>,
    }

    impl Fetcher for WriteFetcher {
        fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
            self.calls.set(self.calls.get() + 1);
            let dest = dest_dir.join(file_name_from_url(url)?);
            fs::write(&dest, url)?;
            Ok(dest)
        }
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://data.broadinstitute.org/bbbc/BBBC001/BBBC001_v1_counts.txt")
                .unwrap(),
            "BBBC001_v1_counts.txt"
        );
        assert_eq!(
            file_name_from_url("https://host/a/b.zip?token=1").unwrap(),
            "b.zip"
        );
        assert!(file_name_from_url("https://host/dir/").is_err());
    }

    #[test]
    fn test_download_if_missing_only_fetches_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = WriteFetcher { calls: Cell::new(0) };
        let path = dir.path().join("counts.txt");
        assert!(download_if_missing(&fetcher, "https://host/counts.txt", &path)?);
        assert!(!download_if_missing(&fetcher, "https://host/counts.txt", &path)?);
        assert_eq!(fetcher.calls.get(), 1);
        Ok(())
    }

    #[test]
    fn test_download_renames_to_expected_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = WriteFetcher { calls: Cell::new(0) };
        let path = dir.path().join("expected.zip");
        download_if_missing(&fetcher, "https://host/served_name.zip", &path)?;
        assert!(path.is_file());
        assert!(!dir.path().join("served_name.zip").exists());
        Ok(())
    }
}
