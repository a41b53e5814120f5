//! Local pattern-based static analysis.
//!
//! Each rule is a regular expression matched line by line. Matches on
//! comment lines and inside string literals are ignored.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{artifact_path, file_name, read_source, write_artifact, AnalysisStage, Stage};
use crate::error::StageError;
use crate::source::Language;

/// Severity of a static finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A heuristic rule.
struct Rule {
    id: &'static str,
    pattern: &'static str,
    severity: Severity,
    description: &'static str,
}

/// Rule with its pattern compiled.
struct CompiledRule {
    rule: &'static Rule,
    regex: Regex,
}

static SOLIDITY_RULES: &[Rule] = &[
    Rule {
        id: "tx-origin",
        pattern: r"\btx\.origin\b",
        severity: Severity::High,
        description: "tx.origin used for authorization can be phished",
    },
    Rule {
        id: "delegatecall",
        pattern: r"\.delegatecall\s*\(",
        severity: Severity::High,
        description: "delegatecall executes foreign code in this contract's storage context",
    },
    Rule {
        id: "selfdestruct",
        pattern: r"\b(selfdestruct|suicide)\s*\(",
        severity: Severity::High,
        description: "selfdestruct can remove the contract and force-send ether",
    },
    Rule {
        id: "low-level-call",
        pattern: r"\.call(\{[^}]*\})?\s*\(",
        severity: Severity::Medium,
        description: "low-level call; check the return value and guard against reentrancy",
    },
    Rule {
        id: "unchecked-send",
        pattern: r"\.send\s*\(",
        severity: Severity::Medium,
        description: "send returns false on failure instead of reverting",
    },
    Rule {
        id: "timestamp-dependence",
        pattern: r"\b(block\.timestamp|now)\b",
        severity: Severity::Low,
        description: "block timestamps can be nudged by miners",
    },
    Rule {
        id: "floating-pragma",
        pattern: r"pragma\s+solidity\s*[\^>]",
        severity: Severity::Low,
        description: "floating compiler version",
    },
    Rule {
        id: "inline-assembly",
        pattern: r"\bassembly\s*\{",
        severity: Severity::Info,
        description: "inline assembly bypasses compiler safety checks",
    },
];

static RUST_RULES: &[Rule] = &[
    Rule {
        id: "transmute",
        pattern: r"\bmem::transmute\b",
        severity: Severity::High,
        description: "transmute reinterprets bits without any checks",
    },
    Rule {
        id: "unsafe-block",
        pattern: r"\bunsafe\s*(\{|fn\b|impl\b)",
        severity: Severity::Medium,
        description: "unsafe code must uphold invariants the compiler cannot check",
    },
    Rule {
        id: "unwrap",
        pattern: r"\.unwrap\(\)",
        severity: Severity::Low,
        description: "unwrap panics on None/Err",
    },
    Rule {
        id: "expect",
        pattern: r"\.expect\(",
        severity: Severity::Low,
        description: "expect panics on None/Err",
    },
    Rule {
        id: "explicit-panic",
        pattern: r"\b(panic|unreachable|todo|unimplemented)!\s*\(",
        severity: Severity::Low,
        description: "explicit panic aborts the transaction or program",
    },
    Rule {
        id: "truncating-cast",
        pattern: r"\bas\s+(u8|u16|u32|i8|i16|i32)\b",
        severity: Severity::Info,
        description: "`as` casts silently truncate",
    },
];

static COMPILED_SOLIDITY: Lazy<Vec<CompiledRule>> = Lazy::new(|| compile(SOLIDITY_RULES));
static COMPILED_RUST: Lazy<Vec<CompiledRule>> = Lazy::new(|| compile(RUST_RULES));

fn compile(rules: &'static [Rule]) -> Vec<CompiledRule> {
    rules
        .iter()
        .filter_map(|rule| match Regex::new(rule.pattern) {
            Ok(regex) => Some(CompiledRule { rule, regex }),
            Err(e) => {
                tracing::error!(rule = rule.id, error = %e, "invalid static rule pattern");
                None
            }
        })
        .collect()
}

/// A single rule match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub rule: &'static str,
    pub severity: Severity,
    pub line: usize,
    pub message: &'static str,
    pub snippet: String,
}

/// Writes `<name>.static-analysis.md`.
pub struct StaticStage {
    language: Language,
}

impl StaticStage {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    /// Scan source text with this language's rules.
    pub fn scan(&self, source: &str) -> Vec<Finding> {
        let rules = match self.language {
            Language::Solidity => &*COMPILED_SOLIDITY,
            Language::Rust => &*COMPILED_RUST,
        };

        let mut findings = Vec::new();
        for (idx, line) in source.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") || trimmed.starts_with('*') || trimmed.starts_with("/*") {
                continue;
            }
            for compiled in rules {
                let hit = compiled
                    .regex
                    .find_iter(line)
                    .any(|m| !is_inside_string_literal(line, m.start()));
                if hit {
                    findings.push(Finding {
                        rule: compiled.rule.id,
                        severity: compiled.rule.severity,
                        line: idx + 1,
                        message: compiled.rule.description,
                        snippet: trimmed.trim_end().to_string(),
                    });
                }
            }
        }

        findings.sort_by(|a, b| a.severity.cmp(&b.severity).then(a.line.cmp(&b.line)));
        findings
    }
}

#[async_trait]
impl AnalysisStage for StaticStage {
    fn stage(&self) -> Stage {
        Stage::Static
    }

    async fn run(&self, file: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, StageError> {
        let source = read_source(file).await?;
        let findings = self.scan(&source);
        tracing::debug!(file = %file.display(), findings = findings.len(), "static scan done");

        let path = artifact_path(output_dir, file, ".static-analysis.md");
        write_artifact(&path, &render(&file_name(file), self.language, &findings)).await?;
        Ok(vec![path])
    }
}

fn render(name: &str, language: Language, findings: &[Finding]) -> String {
    let mut out = format!("# Static analysis: {}\n\nLanguage: {}\n\n", name, language);
    if findings.is_empty() {
        out.push_str("No findings.\n");
        return out;
    }

    let _ = writeln!(out, "{} finding(s).\n", findings.len());
    out.push_str("| Severity | Rule | Line | Description | Code |\n");
    out.push_str("|---|---|---|---|---|\n");
    for f in findings {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | `{}` |",
            f.severity,
            f.rule,
            f.line,
            f.message,
            f.snippet.replace('|', "\\|").replace('`', "'")
        );
    }
    out
}

/// Whether byte offset `pos` in `line` falls inside a double-quoted string.
fn is_inside_string_literal(line: &str, pos: usize) -> bool {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if i >= pos {
            break;
        }
        match c {
            '\\' if in_string => escaped = !escaped,
            '"' if !escaped => in_string = !in_string,
            _ => escaped = false,
        }
    }
    in_string
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_solidity_rules() {
        let source = r#"pragma solidity ^0.8.0;
contract Wallet {
    function pay(address to) external {
        require(tx.origin == owner);
        (bool ok, ) = to.call{value: 1 ether}("");
        // tx.origin in a comment is fine
        string memory s = "tx.origin";
    }
}
"#;
        let findings = StaticStage::new(Language::Solidity).scan(source);
        let rules: Vec<_> = findings.iter().map(|f| (f.rule, f.line)).collect();
        assert_eq!(
            rules,
            vec![("tx-origin", 4), ("low-level-call", 5), ("floating-pragma", 1)]
        );
    }

    #[test]
    fn test_rust_rules() {
        let source = "fn f(x: u64) -> u8 {\n    let v = parse().unwrap();\n    x as u8\n}\n";
        let findings = StaticStage::new(Language::Rust).scan(source);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].rule, "unwrap");
        assert_eq!(findings[1].rule, "truncating-cast");
    }

    #[test]
    fn test_string_literal_detection() {
        assert!(is_inside_string_literal(r#"let s = "x.unwrap()";"#, 10));
        assert!(!is_inside_string_literal(r#"let s = "a"; v.unwrap();"#, 15));
    }

    #[tokio::test]
    async fn test_run_writes_report() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("lib.rs");
        std::fs::write(&file, "pub fn ok() {}\n").unwrap();

        let paths = StaticStage::new(Language::Rust)
            .run(&file, temp.path())
            .await
            .unwrap();
        assert_eq!(paths, vec![temp.path().join("lib.rs.static-analysis.md")]);
        let report = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(report.contains("# Static analysis: lib.rs"));
        assert!(report.contains("No findings."));
    }
}
