//! Classification of raw input references.
//!
//! A URL is ambiguous between "a file hosted somewhere" and "a repository to
//! clone". A recognized file extension on the end of a URL tips it towards a
//! direct download, even on a known forge.

use std::path::Path;

use super::Language;

/// Hostname fragments of hosted git services.
const FORGE_HOSTS: &[&str] = &["github.com/", "gitlab.com/", "bitbucket.org/"];

/// Extensions that mark a forge URL as a single hosted file.
const FILE_EXTENSIONS: &[&str] = &[".sol", ".rs", ".txt", ".json", ".js", ".md"];

/// What a raw input string denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    GitRepository,
    Download,
    SingleFile(Language),
    Directory,
    /// Not a supported file, not a directory, not a URL.
    Unresolvable,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::GitRepository => "git",
            InputKind::Download => "download",
            InputKind::SingleFile(_) => "file",
            InputKind::Directory => "directory",
            InputKind::Unresolvable => "unresolvable",
        }
    }
}

/// Filesystem access needed by the classifier.
pub trait PathProbe {
    fn is_dir(&self, path: &Path) -> bool;
}

/// Probe backed by `std::fs::metadata`.
pub struct StdPathProbe;

impl PathProbe for StdPathProbe {
    fn is_dir(&self, path: &Path) -> bool {
        std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }
}

/// Classify an input against the real filesystem.
pub fn classify(input: &str, force_git: bool) -> InputKind {
    classify_with(input, force_git, &StdPathProbe)
}

/// Classify an input, stat-ing through `probe` only when no textual rule applies.
pub fn classify_with(input: &str, force_git: bool, probe: &dyn PathProbe) -> InputKind {
    // A .git suffix always means a repository, whatever the host.
    if input.ends_with(".git") || force_git || is_git_scheme(input) {
        return InputKind::GitRepository;
    }

    if is_http(input) {
        if is_forge_repository(input) {
            return InputKind::GitRepository;
        }
        return InputKind::Download;
    }

    if let Some(language) = Language::from_name(input) {
        return InputKind::SingleFile(language);
    }

    if probe.is_dir(Path::new(input)) {
        InputKind::Directory
    } else {
        InputKind::Unresolvable
    }
}

fn is_http(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

fn is_git_scheme(input: &str) -> bool {
    input.starts_with("git@") || input.starts_with("git://")
}

fn is_forge_repository(input: &str) -> bool {
    FORGE_HOSTS.iter().any(|host| input.contains(host))
        && !FILE_EXTENSIONS.iter().any(|ext| input.ends_with(ext))
}
