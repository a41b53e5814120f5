//! Input resolution: classify a raw reference, fetch it if remote, and
//! collect the source files to analyze.
//!
//! Data flows one way:
//!
//! ```text
//! input string -> classify -> (clone | download) -> local path -> discover -> FileSet
//! ```

mod classify;
mod discover;
mod fetch;

pub use classify::{classify, classify_with, InputKind, PathProbe, StdPathProbe};
pub use discover::{discover, discover_language, DiscoveryOptions};
pub use fetch::{clone_dir_name, download_file_name, Fetcher};

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::ResolveError;

/// Source languages the pipeline knows how to analyze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Solidity,
    Rust,
}

impl Language {
    /// Solidity first: dispatch processes languages in this order.
    pub const ALL: [Language; 2] = [Language::Solidity, Language::Rust];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Solidity => "solidity",
            Language::Rust => "rust",
        }
    }

    /// File name suffix, including the dot.
    pub fn suffix(&self) -> &'static str {
        match self {
            Language::Solidity => ".sol",
            Language::Rust => ".rs",
        }
    }

    /// Determine the language from a name ending, without touching the filesystem.
    pub fn from_name(name: &str) -> Option<Self> {
        Language::ALL
            .into_iter()
            .find(|lang| name.ends_with(lang.suffix()))
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(Language::from_name)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Solidity => write!(f, "Solidity"),
            Language::Rust => write!(f, "Rust"),
        }
    }
}

/// The raw reference supplied by the caller. Never mutated.
#[derive(Debug, Clone)]
pub struct InputReference {
    pub input: String,
    pub force_git: bool,
}

impl InputReference {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            force_git: false,
        }
    }

    pub fn force_git(mut self, force: bool) -> Self {
        self.force_git = force;
        self
    }
}

/// A local source after classification and any fetch.
///
/// Fetch failures are not a variant: they surface as `Err(ResolveError)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    SingleFile { path: PathBuf, language: Language },
    Directory(PathBuf),
    /// Nothing usable at the reference; already warned about.
    Empty,
}

/// Files to analyze, one ordered list per language.
///
/// Order is discovery order. A path appears in at most one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileSet {
    pub solidity_files: Vec<PathBuf>,
    pub rust_files: Vec<PathBuf>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(path: PathBuf, language: Language) -> Self {
        let mut set = Self::new();
        set.push(path, language);
        set
    }

    pub fn push(&mut self, path: PathBuf, language: Language) {
        match language {
            Language::Solidity => self.solidity_files.push(path),
            Language::Rust => self.rust_files.push(path),
        }
    }

    pub fn files(&self, language: Language) -> &[PathBuf] {
        match language {
            Language::Solidity => &self.solidity_files,
            Language::Rust => &self.rust_files,
        }
    }

    pub fn len(&self) -> usize {
        self.solidity_files.len() + self.rust_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All files, Solidity first, each tagged with its language.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, Language)> {
        Language::ALL.into_iter().flat_map(move |lang| {
            self.files(lang)
                .iter()
                .map(move |p| (p.as_path(), lang))
        })
    }
}

/// Classify and, for remote inputs, fetch a reference into a local source.
pub async fn resolve(
    reference: &InputReference,
    fetcher: &Fetcher,
) -> Result<ResolvedSource, ResolveError> {
    let kind = classify(&reference.input, reference.force_git);
    tracing::info!(input = %reference.input, kind = kind.as_str(), "classified input");

    let resolved = match kind {
        InputKind::GitRepository => {
            let dir = fetcher.clone_repo(&reference.input).await?;
            ResolvedSource::Directory(dir)
        }
        InputKind::Download => {
            let path = fetcher.download(&reference.input).await?;
            match Language::from_path(&path) {
                Some(language) => ResolvedSource::SingleFile {
                    path: absolute(&path),
                    language,
                },
                None => {
                    tracing::warn!(
                        path = %path.display(),
                        "downloaded file is neither Solidity nor Rust, nothing to analyze"
                    );
                    ResolvedSource::Empty
                }
            }
        }
        InputKind::SingleFile(language) => ResolvedSource::SingleFile {
            path: absolute(Path::new(&reference.input)),
            language,
        },
        InputKind::Directory => ResolvedSource::Directory(PathBuf::from(&reference.input)),
        InputKind::Unresolvable => {
            tracing::warn!(
                input = %reference.input,
                "input is not a supported file, a directory or a URL; nothing to analyze"
            );
            ResolvedSource::Empty
        }
    };

    Ok(resolved)
}

/// Turn a resolved source into the file set to dispatch.
pub fn collect(
    source: &ResolvedSource,
    options: &DiscoveryOptions,
) -> Result<FileSet, ResolveError> {
    match source {
        ResolvedSource::SingleFile { path, language } => {
            Ok(FileSet::single(path.clone(), *language))
        }
        ResolvedSource::Directory(dir) => Ok(discover(dir, options)?),
        ResolvedSource::Empty => Ok(FileSet::new()),
    }
}

/// Make a path absolute against the working directory without touching it.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
