//! Domain types for the stagehand engine.
//!
//! This module contains the core data structures:
//! - PipelineResult: per-stage outcome, one per stage per execution
//! - PipelineExecution: the auditable record of a whole run

pub mod execution;
pub mod result;

// Re-export commonly used types
pub use execution::{ExecutionStatus, PipelineExecution};
pub use result::PipelineResult;
