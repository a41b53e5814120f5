//! Chainaudit - smart contract audit driver.
//!
//! Chainaudit takes one user-supplied reference (a local file, a local
//! directory, a git repository URL or a download URL), turns it into a set
//! of Solidity and Rust source files, and runs a fixed sequence of
//! analysis stages over each file, writing artifacts to an output directory.
//!
//! # Architecture
//!
//! - `source`: input classification, fetching, and file discovery
//! - `stages`: the per-file analysis stages and their registry
//! - `dispatch`: ordered execution of stages with a failure policy
//! - `llm`: chat-completion client used by the model-backed stages
//! - `config`: YAML settings schema and loading
//! - `report`: output formatting (pretty, JSON)
//!
//! # Adding a Stage
//!
//! Implement `AnalysisStage` and register it per language in
//! `StageRegistry::standard`.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod logging;
pub mod report;
pub mod source;
pub mod stages;

#[cfg(test)]
mod test_support;

pub use config::Settings;
pub use dispatch::{DispatchReport, Dispatcher, FailurePolicy, WorkItem};
pub use error::{DiscoveryError, DispatchError, FetchError, ResolveError, StageError};
pub use llm::{LlmClient, LlmConfig};
pub use source::{
    classify, collect, discover, resolve, DiscoveryOptions, Fetcher, FileSet, InputKind,
    InputReference, Language, ResolvedSource,
};
pub use stages::{AnalysisStage, Stage, StageRegistry, StageSelection};
