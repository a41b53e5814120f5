//! Stages backed by the language model: security analysis, semgrep rule
//! generation, and the explanation + vulnerability pass.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{artifact_path, file_name, read_source, write_artifact, AnalysisStage, Stage};
use crate::error::StageError;
use crate::llm::LlmClient;
use crate::source::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    Analysis,
    Semgrep,
    Explain,
}

/// A language-model stage for one language.
pub struct LlmStage {
    task: Task,
    language: Language,
    client: Arc<LlmClient>,
}

impl LlmStage {
    /// Functional and security analysis, written to `<name>.analysis.md`.
    pub fn analysis(language: Language, client: Arc<LlmClient>) -> Self {
        Self::new(Task::Analysis, language, client)
    }

    /// Semgrep rules for the file, written to `semgrep-rules/<stem>.yaml`
    /// (`semgrep-rust-rules/` for Rust).
    pub fn semgrep(language: Language, client: Arc<LlmClient>) -> Self {
        Self::new(Task::Semgrep, language, client)
    }

    /// Plain-language explanation followed by a vulnerability pass,
    /// written to `<name>.explanation.md` and `<name>.vulnerabilities.md`.
    pub fn explain(language: Language, client: Arc<LlmClient>) -> Self {
        Self::new(Task::Explain, language, client)
    }

    fn new(task: Task, language: Language, client: Arc<LlmClient>) -> Self {
        Self {
            task,
            language,
            client,
        }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a senior smart contract security auditor reviewing {} code. \
             Be precise, cite line numbers, and do not invent code that is not shown.",
            self.language
        )
    }

    fn rules_dir(&self, output_dir: &Path) -> PathBuf {
        match self.language {
            Language::Solidity => output_dir.join("semgrep-rules"),
            Language::Rust => output_dir.join("semgrep-rust-rules"),
        }
    }

    async fn run_analysis(
        &self,
        file: &Path,
        source: &str,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, StageError> {
        let prompt = format!(
            "Describe what `{}` does, then list security issues by severity with a fix for each.\n\n```\n{}\n```",
            file_name(file),
            source
        );
        let reply = self.client.complete(&self.system_prompt(), &prompt).await?;

        let path = artifact_path(output_dir, file, ".analysis.md");
        let body = format!("# Analysis: {}\n\n{}\n", file_name(file), reply.trim());
        write_artifact(&path, &body).await?;
        Ok(vec![path])
    }

    async fn run_semgrep(
        &self,
        file: &Path,
        source: &str,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, StageError> {
        let lang_id = match self.language {
            Language::Solidity => "solidity",
            Language::Rust => "rust",
        };
        let prompt = format!(
            "Write semgrep rules (YAML, top-level `rules:` key, `languages: [{}]`) that detect \
             the vulnerability classes present in this code. Reply with YAML only.\n\n```\n{}\n```",
            lang_id, source
        );
        let reply = self.client.complete(&self.system_prompt(), &prompt).await?;

        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "rules".to_string());
        let path = self.rules_dir(output_dir).join(format!("{}.yaml", stem));
        write_artifact(&path, &format!("{}\n", extract_fenced(&reply).trim())).await?;
        Ok(vec![path])
    }

    async fn run_explain(
        &self,
        file: &Path,
        source: &str,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, StageError> {
        let name = file_name(file);
        let explain_prompt = format!(
            "Explain `{}` for a reviewer new to the codebase: purpose, state, entry points, \
             and trust assumptions.\n\n```\n{}\n```",
            name, source
        );
        let explanation = self
            .client
            .complete(&self.system_prompt(), &explain_prompt)
            .await?;

        let vuln_prompt = format!(
            "Given this explanation:\n\n{}\n\nList concrete vulnerabilities in the code below, \
             each with location, impact and a proof-of-concept sketch.\n\n```\n{}\n```",
            explanation.trim(),
            source
        );
        let vulnerabilities = self
            .client
            .complete(&self.system_prompt(), &vuln_prompt)
            .await?;

        let explanation_path = artifact_path(output_dir, file, ".explanation.md");
        let vulnerabilities_path = artifact_path(output_dir, file, ".vulnerabilities.md");
        write_artifact(
            &explanation_path,
            &format!("# Explanation: {}\n\n{}\n", name, explanation.trim()),
        )
        .await?;
        write_artifact(
            &vulnerabilities_path,
            &format!("# Vulnerabilities: {}\n\n{}\n", name, vulnerabilities.trim()),
        )
        .await?;
        Ok(vec![explanation_path, vulnerabilities_path])
    }
}

#[async_trait]
impl AnalysisStage for LlmStage {
    fn stage(&self) -> Stage {
        match self.task {
            Task::Analysis => Stage::Analysis,
            Task::Semgrep => Stage::Semgrep,
            Task::Explain => Stage::Explain,
        }
    }

    async fn run(&self, file: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, StageError> {
        let source = read_source(file).await?;
        match self.task {
            Task::Analysis => self.run_analysis(file, &source, output_dir).await,
            Task::Semgrep => self.run_semgrep(file, &source, output_dir).await,
            Task::Explain => self.run_explain(file, &source, output_dir).await,
        }
    }
}

/// Body of the first fenced code block, or the whole reply if there is none.
fn extract_fenced(reply: &str) -> &str {
    let Some(start) = reply.find("```") else {
        return reply;
    };
    let after_fence = &reply[start + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    }
}
