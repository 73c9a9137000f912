//! Error types with fix suggestions

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum TabQaError {
    #[error("Table error: {0}")]
    Table(String),

    // ─────────────────────────────────────────────────────────────
    // Decomposition errors (TABQA-010 to TABQA-011)
    // ─────────────────────────────────────────────────────────────
    #[error("TABQA-010: Malformed decomposition: {details}")]
    GraphMalformed { details: String },

    #[error("TABQA-011: Graph failed validation with {} issue(s)", .issues.len())]
    GraphInvalid { issues: Vec<String> },

    // ─────────────────────────────────────────────────────────────
    // Execution errors (TABQA-020 to TABQA-021)
    // ─────────────────────────────────────────────────────────────
    #[error("TABQA-020: Subtask '{task_id}' failed: {details}")]
    SubtaskFailed { task_id: String, details: String },

    #[error("TABQA-021: Run cancelled: {reason}")]
    RunCancelled { reason: String },
}

impl FixSuggestion for TabQaError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TabQaError::Table(_) => {
                Some("Check column names are unique and every row matches the header width")
            }
            TabQaError::GraphMalformed { .. } => {
                Some("Retry decomposition or lower the oracle temperature; empty graphs cannot run")
            }
            TabQaError::GraphInvalid { .. } => Some(
                "Inspect the issue list; cycles and dangling dependencies need a fresh decomposition",
            ),
            TabQaError::SubtaskFailed { .. } => {
                Some("Dependents are skipped automatically; the run still returns partial results")
            }
            TabQaError::RunCancelled { .. } => {
                Some("Raise the failure threshold in ExecutorConfig or fix the failing subtasks")
            }
        }
    }
}
