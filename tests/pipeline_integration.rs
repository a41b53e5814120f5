//! Integration tests for the resolve, discover and dispatch pipeline.
//!
//! These tests run against the fixture project under testdata/, which mixes
//! Solidity contracts, a Rust program, and directories that discovery must
//! skip (node_modules, target, hidden directories).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use chainaudit::source::{self, DiscoveryOptions, Fetcher, InputReference, ResolvedSource};
use chainaudit::stages::StageRegistry;
use chainaudit::{
    AnalysisStage, DispatchError, Dispatcher, FailurePolicy, FileSet, Language, Stage,
    StageError, StageSelection,
};

fn project_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join("project")
}

fn relative(files: &[PathBuf]) -> Vec<String> {
    let root = project_path().canonicalize().unwrap();
    files
        .iter()
        .map(|p| p.strip_prefix(&root).unwrap().to_string_lossy().replace('\\', "/"))
        .collect()
}

/// Resolve a local input with a fetcher that is never used.
async fn resolve_local(input: &str, options: &DiscoveryOptions) -> (ResolvedSource, FileSet) {
    let work = TempDir::new().unwrap();
    let fetcher = Fetcher::new(work.path().join("repos"), work.path().join("downloads")).unwrap();
    let resolved = source::resolve(&InputReference::new(input), &fetcher)
        .await
        .expect("local inputs should resolve");
    let files = source::collect(&resolved, options).expect("discovery should succeed");
    (resolved, files)
}

#[tokio::test]
async fn test_directory_discovery_skips_vendor_and_build_dirs() {
    let input = project_path().to_string_lossy().to_string();
    let (resolved, files) = resolve_local(&input, &DiscoveryOptions::default()).await;

    assert!(matches!(resolved, ResolvedSource::Directory(_)));
    assert_eq!(
        relative(&files.solidity_files),
        vec![
            "contracts/Vault.sol",
            "contracts/interfaces/IVault.sol",
            "lib/forge-std/Test.sol",
        ]
    );
    assert_eq!(relative(&files.rust_files), vec!["programs/vault/src/lib.rs"]);
}

#[tokio::test]
async fn test_directory_discovery_with_extra_excludes() {
    let input = project_path().to_string_lossy().to_string();
    let options = DiscoveryOptions::with_excludes(&["lib".to_string()]).unwrap();
    let (_, files) = resolve_local(&input, &options).await;

    assert_eq!(
        relative(&files.solidity_files),
        vec!["contracts/Vault.sol", "contracts/interfaces/IVault.sol"]
    );
    assert_eq!(files.rust_files.len(), 1);
}

#[tokio::test]
async fn test_single_file_input_is_not_walked() {
    let path = project_path().join("contracts").join("Vault.sol");
    let (resolved, files) =
        resolve_local(&path.to_string_lossy(), &DiscoveryOptions::default()).await;

    match resolved {
        ResolvedSource::SingleFile { language, .. } => assert_eq!(language, Language::Solidity),
        other => panic!("expected a single file, got {:?}", other),
    }
    assert_eq!(files.len(), 1);
    assert!(files.rust_files.is_empty());
    assert!(files.solidity_files[0].is_absolute());
}

#[tokio::test]
async fn test_unresolvable_input_yields_empty_set() {
    let missing = project_path().join("no-such-dir");
    let (resolved, files) =
        resolve_local(&missing.to_string_lossy(), &DiscoveryOptions::default()).await;

    assert!(matches!(resolved, ResolvedSource::Empty));
    assert!(files.is_empty());
}

/// Records every invocation into a shared log; fails on a chosen file name.
struct LoggingStage {
    stage: Stage,
    log: Arc<Mutex<Vec<(String, Stage)>>>,
    fail_on: Option<&'static str>,
}

#[async_trait]
impl AnalysisStage for LoggingStage {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn run(&self, file: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, StageError> {
        let name = file.file_name().unwrap().to_string_lossy().to_string();
        self.log.lock().unwrap().push((name.clone(), self.stage));
        if self.fail_on == Some(name.as_str()) {
            return Err(StageError::Other(format!("{} rejected", name)));
        }
        let artifact = output_dir.join(format!("{}.{}.txt", name, self.stage));
        std::fs::write(&artifact, "ok").map_err(|e| StageError::Other(e.to_string()))?;
        Ok(vec![artifact])
    }
}

fn logging_registry(
    log: &Arc<Mutex<Vec<(String, Stage)>>>,
    fail_on: Option<&'static str>,
) -> StageRegistry {
    let mut registry = StageRegistry::new();
    for language in Language::ALL {
        for stage in Stage::ALL {
            registry.register(
                language,
                Arc::new(LoggingStage {
                    stage,
                    log: Arc::clone(log),
                    fail_on,
                }),
            );
        }
    }
    registry
}

#[tokio::test]
async fn test_dispatch_over_discovered_project() {
    let input = project_path().to_string_lossy().to_string();
    let (_, files) = resolve_local(&input, &DiscoveryOptions::default()).await;
    let out = TempDir::new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let selection = StageSelection::from_requested([Stage::Static, Stage::Diagram]);
    let report = Dispatcher::new(logging_registry(&log, None))
        .run(&files, &selection, out.path())
        .await
        .unwrap();

    assert_eq!(report.planned, 8);
    assert!(report.is_clean());
    assert_eq!(report.artifacts().count(), 8);

    let calls = log.lock().unwrap().clone();
    let expected: Vec<(String, Stage)> = [
        ("Vault.sol", Stage::Diagram),
        ("Vault.sol", Stage::Static),
        ("IVault.sol", Stage::Diagram),
        ("IVault.sol", Stage::Static),
        ("Test.sol", Stage::Diagram),
        ("Test.sol", Stage::Static),
        ("lib.rs", Stage::Diagram),
        ("lib.rs", Stage::Static),
    ]
    .into_iter()
    .map(|(name, stage)| (name.to_string(), stage))
    .collect();
    assert_eq!(calls, expected);
}

#[tokio::test]
async fn test_dispatch_abort_stops_at_first_failure() {
    let input = project_path().to_string_lossy().to_string();
    let (_, files) = resolve_local(&input, &DiscoveryOptions::default()).await;
    let out = TempDir::new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let err = Dispatcher::new(logging_registry(&log, Some("IVault.sol")))
        .run(&files, &StageSelection::All, out.path())
        .await
        .unwrap_err();

    match err {
        DispatchError::Stage { file, stage, .. } => {
            assert!(file.ends_with("contracts/interfaces/IVault.sol"));
            assert_eq!(stage, Stage::Diagram);
        }
        other => panic!("unexpected error: {}", other),
    }

    // Five stages for Vault.sol, then the failing first stage of IVault.sol.
    let calls = log.lock().unwrap();
    assert_eq!(calls.len(), 6);
    assert!(calls.iter().all(|(name, _)| name != "Test.sol" && name != "lib.rs"));
}

#[tokio::test]
async fn test_dispatch_continue_records_failures() {
    let input = project_path().to_string_lossy().to_string();
    let (_, files) = resolve_local(&input, &DiscoveryOptions::default()).await;
    let out = TempDir::new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let report = Dispatcher::new(logging_registry(&log, Some("IVault.sol")))
        .failure_policy(FailurePolicy::Continue)
        .run(&files, &StageSelection::All, out.path())
        .await
        .unwrap();

    assert_eq!(report.planned, 20);
    assert_eq!(report.outcomes.len(), 20);
    assert_eq!(report.failed(), 5);
    assert_eq!(report.succeeded(), 15);
    assert!(!report.is_clean());
}

#[tokio::test]
async fn test_standard_stages_write_artifacts() {
    let files = FileSet::single(
        project_path().join("contracts").join("Vault.sol"),
        Language::Solidity,
    );
    let out = TempDir::new().unwrap();
    let llm = Arc::new(chainaudit::LlmClient::new(chainaudit::LlmConfig::default()).unwrap());

    let selection = StageSelection::from_requested([Stage::Diagram, Stage::Static]);
    let report = Dispatcher::new(StageRegistry::standard(llm))
        .run(&files, &selection, out.path())
        .await
        .unwrap();

    assert!(report.is_clean());
    assert!(out.path().join("Vault.sol.dot").is_file());
    assert!(out.path().join("Vault.sol.mermaid.md").is_file());

    let findings = std::fs::read_to_string(out.path().join("Vault.sol.static-analysis.md")).unwrap();
    assert!(findings.contains("tx-origin"));
    assert!(findings.contains("low-level-call"));
}

#[tokio::test]
async fn test_rust_static_stage_flags_unwrap_and_cast() {
    let files = FileSet::single(
        project_path()
            .join("programs")
            .join("vault")
            .join("src")
            .join("lib.rs"),
        Language::Rust,
    );
    let out = TempDir::new().unwrap();
    let llm = Arc::new(chainaudit::LlmClient::new(chainaudit::LlmConfig::default()).unwrap());

    Dispatcher::new(StageRegistry::standard(llm))
        .run(&files, &StageSelection::from_requested([Stage::Static]), out.path())
        .await
        .unwrap();

    let findings = std::fs::read_to_string(out.path().join("lib.rs.static-analysis.md")).unwrap();
    assert!(findings.contains("unwrap"));
    assert!(findings.contains("truncating-cast"));
}
