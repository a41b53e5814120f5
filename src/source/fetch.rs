//! Materialization of remote inputs into local working directories.
//!
//! Clones land in `<repos_dir>/<repo name>` and downloads in
//! `<downloads_dir>/<file name>`. Both are left on disk after the run. A
//! clone target is emptied before every clone so it always mirrors the
//! remote's current state.

use std::path::{Path, PathBuf};

use reqwest::Client;
use tokio::process::Command;

use super::absolute;
use crate::error::FetchError;

/// Name used when a download URL has no path segment.
const DEFAULT_DOWNLOAD_NAME: &str = "downloaded_file";

/// Clones repositories and downloads files.
pub struct Fetcher {
    http: Client,
    repos_dir: PathBuf,
    downloads_dir: PathBuf,
}

impl Fetcher {
    /// Create a fetcher writing into the given working directories.
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(
        repos_dir: P,
        downloads_dir: Q,
    ) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(concat!("chainaudit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::HttpClient)?;
        Ok(Self::with_http_client(http, repos_dir, downloads_dir))
    }

    /// Create a fetcher around an existing HTTP client.
    ///
    /// Relative directories are anchored to the working directory now, so
    /// every returned path is absolute.
    pub fn with_http_client<P: Into<PathBuf>, Q: Into<PathBuf>>(
        http: Client,
        repos_dir: P,
        downloads_dir: Q,
    ) -> Self {
        Self {
            http,
            repos_dir: absolute(&repos_dir.into()),
            downloads_dir: absolute(&downloads_dir.into()),
        }
    }

    pub fn repos_dir(&self) -> &Path {
        &self.repos_dir
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Clone `url` into a fresh copy of its target directory and return that directory.
    pub async fn clone_repo(&self, url: &str) -> Result<PathBuf, FetchError> {
        let name = clone_dir_name(url).ok_or_else(|| FetchError::BadReference(url.to_string()))?;
        let target = self.repos_dir.join(name);

        std::fs::create_dir_all(&target).map_err(|e| io_error(&target, e))?;
        empty_dir(&target)?;

        tracing::info!(url, target = %target.display(), "cloning repository");
        let output = Command::new("git")
            .arg("clone")
            .arg("--")
            .arg(url)
            .arg(&target)
            .output()
            .await
            .map_err(FetchError::GitSpawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(FetchError::Clone {
                url: url.to_string(),
                stderr,
            });
        }

        Ok(target)
    }

    /// Download `url` verbatim into the downloads directory and return the file path.
    pub async fn download(&self, url: &str) -> Result<PathBuf, FetchError> {
        let target = self.downloads_dir.join(download_file_name(url));
        std::fs::create_dir_all(&self.downloads_dir)
            .map_err(|e| io_error(&self.downloads_dir, e))?;

        tracing::info!(url, target = %target.display(), "downloading file");
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self.http.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        tokio::fs::write(&target, &body)
            .await
            .map_err(|e| io_error(&target, e))?;
        tracing::debug!(bytes = body.len(), "download complete");

        Ok(target)
    }
}

/// Local directory name for a clone: the URL's base name without `.git`.
///
/// Handles scp-style remotes (`git@host:org/repo.git`) as well as URLs and paths.
pub fn clone_dir_name(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let base = trimmed
        .rsplit(|c: char| c == '/' || c == ':')
        .next()
        .unwrap_or(trimmed);
    let name = base.strip_suffix(".git").unwrap_or(base);

    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

/// Local file name for a download: the last path segment, query string dropped.
pub fn download_file_name(url: &str) -> String {
    let from_segments = match url::Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string),
        Err(_) => {
            let path = url.split(['?', '#']).next().unwrap_or("");
            path.rsplit('/').next().map(str::to_string)
        }
    };

    match from_segments {
        Some(name) if !name.is_empty() && name != "." && name != ".." => name,
        _ => DEFAULT_DOWNLOAD_NAME.to_string(),
    }
}

/// Remove everything inside `dir`, keeping `dir` itself.
fn empty_dir(dir: &Path) -> Result<(), FetchError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| io_error(&path, e))?;
        let removed = if file_type.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.map_err(|e| io_error(&path, e))?;
    }
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}
