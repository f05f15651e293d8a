//! # Smellwright-RS: Detect and Safely Remove Code Smells
//!
//! Smellwright scans a Python project for recurring quality defects and
//! rewrites the offending code, gating every edit behind a syntax check and a
//! regression run of the project's own test suite:
//!
//! - **Excessive loop nesting**: perfectly nested `for` loops are flattened
//!   with `itertools.product`
//! - **Long attribute chains**: locally rooted chains are split with aliases
//! - **Repeated calls in loops**: loop-invariant calls are hoisted
//! - **String concatenation in loops**: parts are collected and joined once
//! - **Unused members**: unreferenced methods and attributes are removed
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Pipeline Orchestrator                    │
//! ├──────────────┬───────────────┬──────────────┬────────────────┤
//! │  Detectors   │  Refactorers  │ Verification │  I/O           │
//! │              │               │              │                │
//! │ • Analyzers  │ • one per     │ • syntax     │ • source tree  │
//! │ • Engine     │   smell kind  │ • tests      │ • reports      │
//! │ • Symbols    │ • idempotence │ • baseline   │                │
//! └──────────────┴───────────────┴──────────────┴────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use smellwright_rs::{CommandTestHarness, Pipeline, SmellwrightConfig, SourceTree};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SmellwrightConfig::default();
//!     let tree = SourceTree::open("./project", &config.io)?;
//!     let loaded = tree.load()?;
//!     let harness = CommandTestHarness::new(tree.root(), vec!["pytest".into(), "-q".into()]);
//!
//!     let mut pipeline = Pipeline::new(config)
//!         .with_harness(Arc::new(harness))
//!         .with_source_tree(tree);
//!     let outcome = pipeline.run(loaded.snapshot).await;
//!
//!     println!("{} fixes committed", outcome.report.committed.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "mimalloc")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

// Core data model, configuration and orchestration
pub mod core {
    //! Smell model, snapshots, parsing service and the pipeline orchestrator.

    pub mod ast_service;
    pub mod ast_utils;
    pub mod config;
    pub mod errors;
    pub mod file_utils;
    pub mod pipeline;
    pub mod smell;
    pub mod snapshot;
}

// One analyzer per smell kind plus the engine that runs them
pub mod detectors;

// One refactorer per smell kind
pub mod refactor;

// Syntactic and behavioral gates
pub mod verify;

// Project discovery, persistence and reporting
pub mod io {
    //! Source tree access and report serialization.

    pub mod reports;
    pub mod source_tree;
}

// Re-export primary types for convenience
pub use crate::core::config::SmellwrightConfig;
pub use crate::core::errors::{Result, SmellwrightError};
pub use crate::core::pipeline::{Pipeline, PipelineOutcome, PipelineReport, PipelineState};
pub use crate::core::smell::{AdditionalInfo, Occurrence, Severity, Smell, SmellKind};
pub use crate::core::snapshot::{FileEdit, ProjectSnapshot};
pub use crate::detectors::engine::{DetectorEngine, ScanOutcome};
pub use crate::io::source_tree::SourceTree;
pub use crate::refactor::RefactorResult;
pub use crate::verify::{CommandTestHarness, TestHarness, Verdict, VerificationOracle};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
