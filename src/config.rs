//! Configuration file schema and loading.
//!
//! Settings come from a YAML file, overridden by command-line flags. The
//! language model key may also come from the environment.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::dispatch::FailurePolicy;
use crate::llm::LlmConfig;
use crate::source::DiscoveryOptions;

/// Config file names looked for in the working directory.
pub const DEFAULT_CONFIG_NAMES: &[&str] = &["chainaudit.yaml", ".chainaudit.yaml"];

/// Commented default configuration written by `chainaudit init`.
pub const DEFAULT_TEMPLATE: &str = r#"# chainaudit configuration

# Where analysis artifacts are written.
output_dir: ./output

# Working directories for remote inputs. Left on disk after each run;
# a repository's directory is emptied and re-cloned every time.
repos_dir: ./repos
downloads_dir: ./downloads

# abort: stop the whole run at the first failing stage (default)
# continue: record failures and keep going
failure_policy: abort

# Directory-name globs to skip during discovery, in addition to hidden
# directories, node_modules, and target (Rust only).
extra_excludes: []
#  - "lib"
#  - "forge-*"

follow_symlinks: true

llm:
  # api_key: sk-...            # prefer the environment variable below
  api_key_env: OPENAI_API_KEY
  base_url: https://api.openai.com/v1
  model: gpt-4o
  # timeout_secs: 300          # unset waits indefinitely
"#;

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_repos_dir() -> PathBuf {
    PathBuf::from("./repos")
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_true() -> bool {
    true
}

/// Top-level settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_repos_dir")]
    pub repos_dir: PathBuf,
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Glob patterns matched against directory names during discovery
    #[serde(default)]
    pub extra_excludes: Vec<String>,
    #[serde(default = "default_true")]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            repos_dir: default_repos_dir(),
            downloads_dir: default_downloads_dir(),
            failure_policy: FailurePolicy::default(),
            extra_excludes: Vec::new(),
            follow_symlinks: true,
            llm: LlmConfig::default(),
        }
    }
}

impl Settings {
    /// Parse settings from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let settings: Settings = serde_yaml::from_str(&content)?;
        Ok(settings)
    }

    /// Load from an explicit path, a discovered file, or defaults.
    ///
    /// Returns the settings and the file they came from, if any.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => discover_config(Path::new("."), user_config_path().as_deref()),
        };

        match path {
            Some(p) => {
                let settings = Settings::parse_file(&p)
                    .map_err(|e| anyhow::anyhow!("parsing config {}: {}", p.display(), e))?;
                tracing::debug!(path = %p.display(), "loaded config");
                Ok((settings, Some(p)))
            }
            None => Ok((Settings::default(), None)),
        }
    }

    /// Discovery options derived from these settings.
    pub fn discovery_options(&self) -> anyhow::Result<DiscoveryOptions> {
        let options = DiscoveryOptions::with_excludes(&self.extra_excludes)
            .map_err(|e| anyhow::anyhow!("invalid extra_excludes pattern: {}", e))?;
        Ok(options.follow_symlinks(self.follow_symlinks))
    }
}

/// `<user config dir>/chainaudit/config.yaml`, if the platform has one.
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "chainaudit").map(|dirs| dirs.config_dir().join("config.yaml"))
}

/// Find a config file in `dir`, falling back to `user_config`.
pub fn discover_config(dir: &Path, user_config: Option<&Path>) -> Option<PathBuf> {
    DEFAULT_CONFIG_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
        .or_else(|| user_config.filter(|p| p.is_file()).map(Path::to_path_buf))
}

/// Validate settings for correctness.
pub fn validate(settings: &Settings) -> anyhow::Result<()> {
    for pattern in &settings.extra_excludes {
        globset::Glob::new(pattern)
            .map_err(|e| anyhow::anyhow!("invalid extra_excludes pattern {:?}: {}", pattern, e))?;
    }

    url::Url::parse(&settings.llm.base_url)
        .map_err(|e| anyhow::anyhow!("invalid llm.base_url {:?}: {}", settings.llm.base_url, e))?;

    if settings.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_settings() {
        let yaml = r#"
output_dir: /tmp/audit
failure_policy: continue
extra_excludes:
  - "lib"
llm:
  model: gpt-4o-mini
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.output_dir, PathBuf::from("/tmp/audit"));
        assert_eq!(settings.repos_dir, PathBuf::from("./repos"));
        assert_eq!(settings.failure_policy, FailurePolicy::Continue);
        assert_eq!(settings.extra_excludes, vec!["lib"]);
        assert!(settings.follow_symlinks);
        assert_eq!(settings.llm.model, "gpt-4o-mini");
        assert_eq!(settings.llm.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let settings: Settings = serde_yaml::from_str(DEFAULT_TEMPLATE).unwrap();
        let defaults = Settings::default();
        assert_eq!(settings.output_dir, defaults.output_dir);
        assert_eq!(settings.failure_policy, defaults.failure_policy);
        assert_eq!(settings.llm.model, defaults.llm.model);
        assert!(settings.llm.api_key.is_none());
        validate(&settings).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_glob_and_url() {
        let bad_glob = Settings {
            extra_excludes: vec!["[unclosed".to_string()],
            ..Default::default()
        };
        assert!(validate(&bad_glob).is_err());

        let mut bad_url = Settings::default();
        bad_url.llm.base_url = "not a url".to_string();
        assert!(validate(&bad_url).is_err());
    }

    #[test]
    fn test_discover_config_prefers_working_dir() {
        let temp = TempDir::new().unwrap();
        let user = temp.path().join("user.yaml");
        std::fs::write(&user, "output_dir: ./u\n").unwrap();

        assert_eq!(discover_config(temp.path(), Some(&user)), Some(user.clone()));

        let local = temp.path().join(".chainaudit.yaml");
        std::fs::write(&local, "output_dir: ./l\n").unwrap();
        assert_eq!(discover_config(temp.path(), Some(&user)), Some(local));
    }

    #[test]
    fn test_discover_config_none() {
        let temp = TempDir::new().unwrap();
        assert_eq!(discover_config(temp.path(), None), None);
        assert_eq!(
            discover_config(temp.path(), Some(&temp.path().join("absent.yaml"))),
            None
        );
    }

    #[test]
    fn test_load_explicit_malformed_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chainaudit.yaml");
        std::fs::write(&path, "output_dir: [unterminated\n").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }
}
