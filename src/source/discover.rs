//! Recursive discovery of Solidity and Rust files.
//!
//! Each language gets its own independent pass over the tree. Entries whose
//! name starts with `.` and `node_modules` are pruned in both passes; `target`
//! is pruned only in the Rust pass, so a Solidity file under `target/` is
//! still found.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

use super::{FileSet, Language};
use crate::error::DiscoveryError;

/// Directories never descended into.
const ALWAYS_SKIPPED: &[&str] = &["node_modules"];

/// Rust build output.
const RUST_BUILD_DIR: &str = "target";

/// Knobs for the directory walk.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Follow symbolic links. Loops are detected and skipped.
    pub follow_symlinks: bool,
    /// Extra directory-name globs to prune, on top of the fixed rules.
    pub extra_excludes: Option<GlobSet>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: true,
            extra_excludes: None,
        }
    }
}

impl DiscoveryOptions {
    /// Build options with extra exclude patterns.
    pub fn with_excludes(patterns: &[String]) -> Result<Self, globset::Error> {
        let extra_excludes = if patterns.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in patterns {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };

        Ok(Self {
            extra_excludes,
            ..Default::default()
        })
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.extra_excludes
            .as_ref()
            .map(|set| set.is_match(name))
            .unwrap_or(false)
    }
}

/// Discover all Solidity and Rust files under `root`.
///
/// Paths in the result are absolute. Any unreadable entry aborts the call.
pub fn discover(root: &Path, options: &DiscoveryOptions) -> Result<FileSet, DiscoveryError> {
    let root = root.canonicalize().map_err(|source| DiscoveryError::Root {
        path: root.to_path_buf(),
        source,
    })?;

    let set = FileSet {
        solidity_files: discover_language(&root, Language::Solidity, options)?,
        rust_files: discover_language(&root, Language::Rust, options)?,
    };

    tracing::info!(
        root = %root.display(),
        solidity = set.solidity_files.len(),
        rust = set.rust_files.len(),
        "discovery complete"
    );
    Ok(set)
}

/// Run a single language pass over `root`.
pub fn discover_language(
    root: &Path,
    language: Language,
    options: &DiscoveryOptions,
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut files = Vec::new();
    // Real paths already taken; a symlinked directory can reach a file twice.
    let mut seen = HashSet::new();

    let walker = WalkDir::new(root)
        .follow_links(options.follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_pruned(e, language, options));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.loop_ancestor().is_some() => {
                tracing::warn!(
                    path = ?err.path(),
                    "symlink loop detected, skipping"
                );
                continue;
            }
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                return Err(DiscoveryError::Walk { path, source: err });
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .file_name()
            .to_string_lossy()
            .ends_with(language.suffix());
        if !matches {
            continue;
        }

        let real = entry
            .path()
            .canonicalize()
            .map_err(|source| DiscoveryError::Root {
                path: entry.path().to_path_buf(),
                source,
            })?;
        if !seen.insert(real) {
            tracing::debug!(path = %entry.path().display(), "already discovered via another path");
            continue;
        }

        tracing::debug!(path = %entry.path().display(), %language, "discovered");
        files.push(entry.into_path());
    }

    Ok(files)
}

fn is_pruned(entry: &DirEntry, language: Language, options: &DiscoveryOptions) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }

    if !entry.file_type().is_dir() {
        return false;
    }

    ALWAYS_SKIPPED.contains(&&*name)
        || (language == Language::Rust && name == RUST_BUILD_DIR)
        || options.is_excluded(&name)
}
