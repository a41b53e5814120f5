//! Analysis stages and their registry.
//!
//! A stage takes one source file and an output directory and writes one or
//! more artifacts there, named `<file name>.<suffix>` or placed in a
//! stage-specific subdirectory. The dispatcher treats every stage the same
//! way through [`AnalysisStage`].

mod diagram;
mod llm_stage;
mod static_scan;

pub use diagram::DiagramStage;
pub use llm_stage::LlmStage;
pub use static_scan::{Finding, Severity, StaticStage};

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StageError;
use crate::llm::LlmClient;
use crate::source::Language;

/// The five analysis stages, declared in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Diagram,
    Analysis,
    Semgrep,
    Static,
    Explain,
}

impl Stage {
    /// Canonical execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Diagram,
        Stage::Analysis,
        Stage::Semgrep,
        Stage::Static,
        Stage::Explain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Diagram => "diagram",
            Stage::Analysis => "analysis",
            Stage::Semgrep => "semgrep",
            Stage::Static => "static",
            Stage::Explain => "explain",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "diagram" => Ok(Stage::Diagram),
            "analysis" => Ok(Stage::Analysis),
            "semgrep" => Ok(Stage::Semgrep),
            "static" => Ok(Stage::Static),
            "explain" => Ok(Stage::Explain),
            _ => Err(format!("unknown stage: {}", s)),
        }
    }
}

/// Which stages a run executes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StageSelection {
    /// Every stage, in canonical order.
    #[default]
    All,
    /// Only these stages, still in canonical order.
    Subset(BTreeSet<Stage>),
}

impl StageSelection {
    /// Selection from individually requested stages; none requested means all.
    pub fn from_requested<I: IntoIterator<Item = Stage>>(requested: I) -> Self {
        let set: BTreeSet<Stage> = requested.into_iter().collect();
        if set.is_empty() {
            StageSelection::All
        } else {
            StageSelection::Subset(set)
        }
    }

    /// Stages to run, in canonical order.
    pub fn stages(&self) -> Vec<Stage> {
        match self {
            StageSelection::All => Stage::ALL.to_vec(),
            StageSelection::Subset(set) => set.iter().copied().collect(),
        }
    }

    pub fn contains(&self, stage: Stage) -> bool {
        match self {
            StageSelection::All => true,
            StageSelection::Subset(set) => set.contains(&stage),
        }
    }
}

/// One analysis operation applied to a single file.
#[async_trait]
pub trait AnalysisStage: Send + Sync {
    /// Which stage this collaborator implements.
    fn stage(&self) -> Stage;

    /// Analyze `file`, write artifacts under `output_dir`, and return their paths.
    async fn run(&self, file: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, StageError>;
}

/// Stage implementations keyed by language and stage.
#[derive(Default)]
pub struct StageRegistry {
    stages: HashMap<(Language, Stage), Arc<dyn AnalysisStage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in collaborators: five per language.
    pub fn standard(llm: Arc<LlmClient>) -> Self {
        let mut registry = Self::new();
        for language in Language::ALL {
            registry.register(language, Arc::new(DiagramStage::new(language)));
            registry.register(
                language,
                Arc::new(LlmStage::analysis(language, Arc::clone(&llm))),
            );
            registry.register(
                language,
                Arc::new(LlmStage::semgrep(language, Arc::clone(&llm))),
            );
            registry.register(language, Arc::new(StaticStage::new(language)));
            registry.register(
                language,
                Arc::new(LlmStage::explain(language, Arc::clone(&llm))),
            );
        }
        registry
    }

    /// Register `stage` for `language`, replacing any previous one.
    pub fn register(&mut self, language: Language, stage: Arc<dyn AnalysisStage>) {
        self.stages.insert((language, stage.stage()), stage);
    }

    pub fn get(&self, language: Language, stage: Stage) -> Option<Arc<dyn AnalysisStage>> {
        self.stages.get(&(language, stage)).cloned()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// `<output_dir>/<file name><suffix>`.
pub(crate) fn artifact_path(output_dir: &Path, file: &Path, suffix: &str) -> PathBuf {
    output_dir.join(format!("{}{}", file_name(file), suffix))
}

pub(crate) fn file_name(file: &Path) -> String {
    file.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "source".to_string())
}

pub(crate) async fn read_source(file: &Path) -> Result<String, StageError> {
    tokio::fs::read_to_string(file)
        .await
        .map_err(|e| StageError::io(file, e))
}

pub(crate) async fn write_artifact(path: &Path, content: &str) -> Result<(), StageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StageError::io(parent, e))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| StageError::io(path, e))
}
