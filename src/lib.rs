//! stagehand - declarative stage pipeline orchestration engine
//!
//! Loads named pipeline definitions with dependency edges, resolves a safe
//! execution order, runs each stage as an external command with timeout and
//! retry semantics, and aggregates outcomes into an auditable execution
//! record.
//!
//! # Architecture
//!
//! - Definitions are JSON documents, one per pipeline, resolved by id
//! - Stages are grouped into parallel-safe levels; levels run strictly in
//!   sequence, stages within a level run concurrently
//! - Each stage is a real OS subprocess with its own timeout window and
//!   linear retry backoff
//! - Every run produces exactly one immutable execution record on disk
//!
//! # Modules
//!
//! - `adapters`: process spawning behind the `CommandRunner` seam
//! - `core`: resolver, condition evaluator, executor, orchestrator, recorder
//! - `domain`: execution records and per-stage results
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a pipeline for an experiment
//! stagehand run exp-042 ci
//!
//! # Preview the execution plan without spawning anything
//! stagehand run exp-042 ci --dry-run
//!
//! # List known pipelines / inspect one
//! stagehand list
//! stagehand show ci
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use crate::core::{Orchestrator, PipelineConfig, PipelineStage, PipelineStore, RunOptions};
pub use crate::domain::{ExecutionStatus, PipelineExecution, PipelineResult};
pub use crate::error::EngineError;
