//! TabQA - decomposed question answering over tables

pub mod assemble;
pub mod decompose;
pub mod error;
pub mod executor;
pub mod fusion;
pub mod oracle;
pub mod pipeline;
pub mod retrieval;
pub mod strategy;
pub mod subtask;
pub mod table;
pub mod trace;
pub mod validate;

pub use assemble::{assemble, Answer};
pub use decompose::Decomposer;
pub use error::{FixSuggestion, TabQaError};
pub use executor::{
    ExecutionContext, ExecutionEngine, ExecutorConfig, RunReport, RunStatus, TaskRecord,
};
pub use fusion::{FusionConfig, FusionEngine};
pub use oracle::{HttpOracle, MockOracle, Oracle};
pub use pipeline::{QaOutcome, QaPipeline};
pub use retrieval::{Evidence, KeywordTool, OverlapTool, RetrievalTool, ToolKind, ToolRegistry};
pub use strategy::{classify, classify_heuristic, Strategy};
pub use subtask::{Subtask, SubtaskGraph, TaskOutcome, TaskStatus, TaskType};
pub use table::{Cell, CellRef, Question, Table};
pub use trace::init_tracing;
pub use validate::{validate, Severity, ValidationIssue, ValidationReport};
