//! Sequential dispatch of analysis stages over a file set.
//!
//! Work is flattened into an ordered list of (file, stage) items: every
//! Solidity file before any Rust file, and for each file the selected stages
//! in canonical order. Items run one at a time. What happens after a failed
//! item is governed by [`FailurePolicy`].

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, StageError};
use crate::source::{FileSet, Language};
use crate::stages::{Stage, StageRegistry, StageSelection};

/// What to do when a work item fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop at the first failure; the error is returned to the caller.
    #[default]
    #[serde(rename = "abort")]
    AbortAll,
    /// Record the failure and carry on with the remaining items.
    #[serde(rename = "continue")]
    Continue,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::AbortAll),
            "continue" => Ok(FailurePolicy::Continue),
            _ => Err(format!("unknown failure policy: {}", s)),
        }
    }
}

/// One stage applied to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub file: PathBuf,
    pub language: Language,
    pub stage: Stage,
}

/// Result of a single work item.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Succeeded { artifacts: Vec<PathBuf> },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkOutcome {
    #[serde(flatten)]
    pub item: WorkItem,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Everything that ran, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub planned: usize,
    pub outcomes: Vec<WorkOutcome>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Succeeded { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Path> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.outcome {
                Outcome::Succeeded { artifacts } => Some(artifacts),
                Outcome::Failed { .. } => None,
            })
            .flatten()
            .map(PathBuf::as_path)
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.outcomes.len() == self.planned
    }
}

/// Flatten a file set and selection into ordered work items.
pub fn plan(files: &FileSet, selection: &StageSelection) -> Vec<WorkItem> {
    let stages = selection.stages();
    files
        .iter()
        .flat_map(|(file, language)| {
            stages.iter().map(move |&stage| WorkItem {
                file: file.to_path_buf(),
                language,
                stage,
            })
        })
        .collect()
}

/// Runs work items against a stage registry.
pub struct Dispatcher {
    registry: StageRegistry,
    policy: FailurePolicy,
    show_progress: bool,
}

impl Dispatcher {
    pub fn new(registry: StageRegistry) -> Self {
        Self {
            registry,
            policy: FailurePolicy::default(),
            show_progress: false,
        }
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Run the selected stages over every file, writing into `output_dir`.
    pub async fn run(
        &self,
        files: &FileSet,
        selection: &StageSelection,
        output_dir: &Path,
    ) -> Result<DispatchReport, DispatchError> {
        if files.is_empty() {
            return Err(DispatchError::NothingToAnalyze);
        }

        std::fs::create_dir_all(output_dir).map_err(|source| DispatchError::OutputDir {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let items = plan(files, selection);
        let mut report = DispatchReport {
            planned: items.len(),
            outcomes: Vec::with_capacity(items.len()),
        };
        tracing::info!(
            files = files.len(),
            work_items = items.len(),
            policy = ?self.policy,
            "dispatching"
        );

        let progress = self.progress_bar(items.len() as u64);
        for item in items {
            progress.set_message(format!("{} {}", item.stage, display_name(&item.file)));

            match self.run_item(&item, output_dir).await {
                Ok(artifacts) => {
                    tracing::info!(
                        file = %item.file.display(),
                        stage = %item.stage,
                        artifacts = artifacts.len(),
                        "stage complete"
                    );
                    report.outcomes.push(WorkOutcome {
                        item,
                        outcome: Outcome::Succeeded { artifacts },
                    });
                }
                Err(source) => match self.policy {
                    FailurePolicy::AbortAll => {
                        progress.abandon();
                        return Err(DispatchError::Stage {
                            file: item.file,
                            stage: item.stage,
                            source,
                        });
                    }
                    FailurePolicy::Continue => {
                        tracing::warn!(
                            file = %item.file.display(),
                            stage = %item.stage,
                            error = %source,
                            "stage failed, continuing"
                        );
                        report.outcomes.push(WorkOutcome {
                            item,
                            outcome: Outcome::Failed {
                                error: source.to_string(),
                            },
                        });
                    }
                },
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        Ok(report)
    }

    async fn run_item(
        &self,
        item: &WorkItem,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, StageError> {
        let stage = self
            .registry
            .get(item.language, item.stage)
            .ok_or(StageError::Unregistered {
                language: item.language,
                stage: item.stage,
            })?;
        stage.run(&item.file, output_dir).await
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} [{pos}/{len}] {bar:30} {msg}")
        {
            bar.set_style(style);
        }
        bar
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::AnalysisStage;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    type CallLog = Arc<Mutex<Vec<(String, Stage)>>>;

    /// Records each call and optionally fails on one file name.
    struct RecordingStage {
        stage: Stage,
        log: CallLog,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl AnalysisStage for RecordingStage {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn run(&self, file: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, StageError> {
            let name = display_name(file);
            self.log.lock().unwrap().push((name.clone(), self.stage));
            if self.fail_on == Some(name.as_str()) {
                return Err(StageError::Other(format!("{} exploded", name)));
            }
            Ok(vec![output_dir.join(format!("{}.{}", name, self.stage))])
        }
    }

    fn registry(log: &CallLog, failing: Option<(Stage, &'static str)>) -> StageRegistry {
        let mut registry = StageRegistry::new();
        for language in Language::ALL {
            for stage in Stage::ALL {
                let fail_on = failing.and_then(|(s, f)| (s == stage).then_some(f));
                registry.register(
                    language,
                    Arc::new(RecordingStage {
                        stage,
                        log: Arc::clone(log),
                        fail_on,
                    }),
                );
            }
        }
        registry
    }

    fn file_set() -> FileSet {
        let mut set = FileSet::new();
        set.push(PathBuf::from("/src/A.sol"), Language::Solidity);
        set.push(PathBuf::from("/src/B.sol"), Language::Solidity);
        set.push(PathBuf::from("/src/C.sol"), Language::Solidity);
        set.push(PathBuf::from("/src/lib.rs"), Language::Rust);
        set
    }

    #[tokio::test]
    async fn test_all_stages_once_in_order() {
        let temp = TempDir::new().unwrap();
        let log = CallLog::default();
        let dispatcher = Dispatcher::new(registry(&log, None));
        let files = FileSet::single(PathBuf::from("/src/Vault.sol"), Language::Solidity);

        let report = dispatcher
            .run(&files, &StageSelection::All, temp.path())
            .await
            .unwrap();

        let calls = log.lock().unwrap().clone();
        let stages: Vec<Stage> = calls.iter().map(|(_, s)| *s).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
        assert!(calls.iter().all(|(f, _)| f == "Vault.sol"));
        assert_eq!(report.succeeded(), 5);
        assert!(report.is_clean());
        assert_eq!(report.artifacts().count(), 5);
    }

    #[tokio::test]
    async fn test_solidity_before_rust() {
        let temp = TempDir::new().unwrap();
        let log = CallLog::default();
        let dispatcher = Dispatcher::new(registry(&log, None));
        let selection = StageSelection::from_requested([Stage::Static]);

        dispatcher
            .run(&file_set(), &selection, temp.path())
            .await
            .unwrap();

        let files: Vec<String> = log.lock().unwrap().iter().map(|(f, _)| f.clone()).collect();
        assert_eq!(files, vec!["A.sol", "B.sol", "C.sol", "lib.rs"]);
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_work() {
        let temp = TempDir::new().unwrap();
        let log = CallLog::default();
        let dispatcher = Dispatcher::new(registry(&log, Some((Stage::Analysis, "B.sol"))));

        let err = dispatcher
            .run(&file_set(), &StageSelection::All, temp.path())
            .await
            .unwrap_err();

        match err {
            DispatchError::Stage { file, stage, .. } => {
                assert_eq!(file, PathBuf::from("/src/B.sol"));
                assert_eq!(stage, Stage::Analysis);
            }
            other => panic!("expected stage error, got {:?}", other),
        }

        let calls = log.lock().unwrap().clone();
        assert_eq!(calls.last().unwrap(), &("B.sol".to_string(), Stage::Analysis));
        assert!(!calls.iter().any(|(f, _)| f == "C.sol" || f == "lib.rs"));
        assert_eq!(calls.len(), 5 + 2);
    }

    #[tokio::test]
    async fn test_continue_policy_records_failures() {
        let temp = TempDir::new().unwrap();
        let log = CallLog::default();
        let dispatcher = Dispatcher::new(registry(&log, Some((Stage::Analysis, "B.sol"))))
            .failure_policy(FailurePolicy::Continue);

        let report = dispatcher
            .run(&file_set(), &StageSelection::All, temp.path())
            .await
            .unwrap();

        assert_eq!(report.planned, 20);
        assert_eq!(report.outcomes.len(), 20);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_clean());
        let failed = report
            .outcomes
            .iter()
            .find(|o| matches!(o.outcome, Outcome::Failed { .. }))
            .unwrap();
        assert_eq!(failed.item.file, PathBuf::from("/src/B.sol"));
        assert_eq!(failed.item.stage, Stage::Analysis);
    }

    #[tokio::test]
    async fn test_empty_file_set_is_nothing_to_analyze() {
        let temp = TempDir::new().unwrap();
        let log = CallLog::default();
        let dispatcher = Dispatcher::new(registry(&log, None));

        let err = dispatcher
            .run(&FileSet::new(), &StageSelection::All, temp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NothingToAnalyze));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_stage_is_stage_error() {
        let temp = TempDir::new().unwrap();
        let dispatcher = Dispatcher::new(StageRegistry::new());
        let files = FileSet::single(PathBuf::from("/src/lib.rs"), Language::Rust);

        let err = dispatcher
            .run(&files, &StageSelection::All, temp.path())
            .await
            .unwrap_err();
        match err {
            DispatchError::Stage { source, stage, .. } => {
                assert_eq!(stage, Stage::Diagram);
                assert!(matches!(source, StageError::Unregistered { .. }));
            }
            other => panic!("expected stage error, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_order() {
        let selection = StageSelection::from_requested([Stage::Explain, Stage::Diagram]);
        let items = plan(&file_set(), &selection);
        let flat: Vec<(String, Stage)> = items
            .iter()
            .map(|i| (display_name(&i.file), i.stage))
            .collect();
        assert_eq!(flat[0], ("A.sol".to_string(), Stage::Diagram));
        assert_eq!(flat[1], ("A.sol".to_string(), Stage::Explain));
        assert_eq!(flat[6], ("lib.rs".to_string(), Stage::Diagram));
        assert_eq!(items.len(), 8);
    }

    #[test]
    fn test_failure_policy_from_str() {
        assert_eq!("abort".parse::<FailurePolicy>(), Ok(FailurePolicy::AbortAll));
        assert_eq!("Continue".parse::<FailurePolicy>(), Ok(FailurePolicy::Continue));
        assert!("retry".parse::<FailurePolicy>().is_err());
    }
}
