//! Structure diagrams: Graphviz DOT and a Mermaid class diagram.
//!
//! Declarations are picked out line by line with regular expressions; this
//! is a sketch of the file's shape, not a parse.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{artifact_path, read_source, write_artifact, AnalysisStage, Stage};
use crate::error::StageError;
use crate::source::Language;

static SOL_CONTAINER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:abstract\s+)?(contract|interface|library)\s+(\w+)(?:\s+is\s+([\w\s,]+))?")
        .unwrap()
});
static SOL_FUNCTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*function\s+(\w+)").unwrap());

static RS_CONTAINER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(struct|enum|trait)\s+(\w+)").unwrap()
});
static RS_IMPL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*impl(?:<[^>]*>)?\s+(?:(\w+)(?:<[^>]*>)?\s+for\s+)?(\w+)").unwrap());
static RS_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)").unwrap()
});

/// A contract, interface, library, struct, enum or trait.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    name: String,
    kind: String,
    parents: Vec<String>,
    functions: Vec<String>,
}

/// Writes `<name>.dot` and `<name>.mermaid.md`.
pub struct DiagramStage {
    language: Language,
}

impl DiagramStage {
    pub fn new(language: Language) -> Self {
        Self { language }
    }
}

#[async_trait]
impl AnalysisStage for DiagramStage {
    fn stage(&self) -> Stage {
        Stage::Diagram
    }

    async fn run(&self, file: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, StageError> {
        let source = read_source(file).await?;
        let nodes = match self.language {
            Language::Solidity => extract_solidity(&source),
            Language::Rust => extract_rust(&source),
        };

        let dot_path = artifact_path(output_dir, file, ".dot");
        let mermaid_path = artifact_path(output_dir, file, ".mermaid.md");
        write_artifact(&dot_path, &render_dot(&nodes)).await?;
        write_artifact(&mermaid_path, &render_mermaid(&nodes)).await?;

        Ok(vec![dot_path, mermaid_path])
    }
}

fn extract_solidity(source: &str) -> Vec<Node> {
    let mut nodes: Vec<Node> = Vec::new();
    for line in source.lines() {
        if let Some(caps) = SOL_CONTAINER.captures(line) {
            let parents = caps
                .get(3)
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            nodes.push(Node {
                name: caps[2].to_string(),
                kind: caps[1].to_string(),
                parents,
                functions: Vec::new(),
            });
        } else if let Some(caps) = SOL_FUNCTION.captures(line) {
            if let Some(current) = nodes.last_mut() {
                current.functions.push(caps[1].to_string());
            }
        }
    }
    nodes
}

fn extract_rust(source: &str) -> Vec<Node> {
    let mut nodes: Vec<Node> = Vec::new();
    let mut current: Option<usize> = None;

    for line in source.lines() {
        if let Some(caps) = RS_CONTAINER.captures(line) {
            nodes.push(Node {
                name: caps[2].to_string(),
                kind: caps[1].to_string(),
                parents: Vec::new(),
                functions: Vec::new(),
            });
            current = Some(nodes.len() - 1);
        } else if let Some(caps) = RS_IMPL.captures(line) {
            let target = caps[2].to_string();
            let idx = match nodes.iter().position(|n| n.name == target) {
                Some(idx) => idx,
                None => {
                    nodes.push(Node {
                        name: target,
                        kind: "impl".to_string(),
                        parents: Vec::new(),
                        functions: Vec::new(),
                    });
                    nodes.len() - 1
                }
            };
            if let Some(trait_name) = caps.get(1) {
                let trait_name = trait_name.as_str().to_string();
                if !nodes[idx].parents.contains(&trait_name) {
                    nodes[idx].parents.push(trait_name);
                }
            }
            current = Some(idx);
        } else if let Some(caps) = RS_FUNCTION.captures(line) {
            match current {
                Some(idx) if line.starts_with(char::is_whitespace) => {
                    nodes[idx].functions.push(caps[1].to_string());
                }
                _ => {
                    current = None;
                    nodes.push(Node {
                        name: caps[1].to_string(),
                        kind: "fn".to_string(),
                        parents: Vec::new(),
                        functions: Vec::new(),
                    });
                }
            }
        }
    }
    nodes
}

fn render_dot(nodes: &[Node]) -> String {
    let mut out = String::from("digraph G {\n  rankdir=LR;\n  node [shape=box];\n");
    for node in nodes {
        let _ = writeln!(
            out,
            "  \"{}\" [label=\"{}\\n<<{}>>\"];",
            node.name, node.name, node.kind
        );
        for function in &node.functions {
            let id = format!("{}::{}", node.name, function);
            let _ = writeln!(out, "  \"{}\" [label=\"{}()\", shape=ellipse];", id, function);
            let _ = writeln!(out, "  \"{}\" -> \"{}\";", node.name, id);
        }
        for parent in &node.parents {
            let _ = writeln!(out, "  \"{}\" -> \"{}\" [style=dashed];", node.name, parent);
        }
    }
    out.push_str("}\n");
    out
}

fn render_mermaid(nodes: &[Node]) -> String {
    let mut out = String::from("```mermaid\nclassDiagram\n");
    for node in nodes {
        let _ = writeln!(out, "  class {} {{", node.name);
        let _ = writeln!(out, "    <<{}>>", node.kind);
        for function in &node.functions {
            let _ = writeln!(out, "    +{}()", function);
        }
        out.push_str("  }\n");
        for parent in &node.parents {
            let _ = writeln!(out, "  {} <|-- {}", parent, node.name);
        }
    }
    out.push_str("```\n");
    out
}
