//! # Execution Engine
//!
//! Schedules a validated subtask graph against a table. Tasks run in Kahn
//! rounds: every task in a round has all of its dependencies in earlier
//! rounds, so a round's tasks are spawned together on a [`JoinSet`] and
//! bounded by a semaphore-backed worker pool. Tasks joined by a dependency
//! edge are never in the same round and therefore never run concurrently.
//!
//! Failure is local: a failed task marks its transitive dependents skipped
//! without aborting the run. Between rounds the engine performs a cooperative
//! cancellation check against the configured failure threshold. Either way
//! the caller gets a [`RunReport`] with a terminal status on every task.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::error::TabQaError;
use crate::fusion::FusionEngine;
use crate::oracle::Oracle;
use crate::retrieval::Evidence;
use crate::subtask::{SubtaskGraph, TaskOutcome, TaskStatus};
use crate::table::Table;

// ============================================================================
// Configuration
// ============================================================================

/// Caller-supplied knobs for one engine instance
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Worker pool size for concurrently schedulable tasks
    pub max_concurrency: usize,
    /// Failed-task count above which the run is cancelled between rounds
    pub failure_threshold: usize,
    /// Evidence items requested per retrieval-needing task
    pub retrieval_top_k: usize,
    /// Tool identifiers handed to the fusion engine, in order
    pub retrieval_tools: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            failure_threshold: usize::MAX,
            retrieval_top_k: 5,
            retrieval_tools: vec!["keyword".to_string(), "overlap".to_string()],
        }
    }
}

// ============================================================================
// Execution context
// ============================================================================

/// Terminal state of one task within a run
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub status: TaskStatus,
    pub outcome: Option<TaskOutcome>,
}

impl TaskRecord {
    fn succeeded(outcome: TaskOutcome) -> Self {
        Self {
            status: TaskStatus::Succeeded,
            outcome: Some(outcome),
        }
    }

    fn failed() -> Self {
        Self {
            status: TaskStatus::Failed,
            outcome: None,
        }
    }

    fn skipped() -> Self {
        Self {
            status: TaskStatus::Skipped,
            outcome: None,
        }
    }
}

/// Append-only task id -> record mapping shared across a run
///
/// Each task writes its own entry exactly once; entries are immutable after
/// insertion, so concurrent readers of completed tasks never block.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    entries: DashMap<String, TaskRecord>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: &str, record: TaskRecord) {
        if self.entries.insert(id.to_string(), record).is_some() {
            warn!(task_id = %id, "Task result overwritten; context is meant to be append-only");
        }
    }

    pub fn get(&self, id: &str) -> Option<TaskRecord> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Result text of a succeeded task, if any
    pub fn result_text(&self, id: &str) -> Option<String> {
        self.entries
            .get(id)
            .and_then(|entry| entry.value().outcome.as_ref().map(|o| o.text.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Run report
// ============================================================================

/// Overall disposition of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every task succeeded
    Succeeded,
    /// At least one task failed or was skipped; the rest completed
    Partial,
    /// The failure threshold was exceeded and remaining tasks were skipped
    Cancelled,
}

/// What the engine hands back: per-task records plus the failure list
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub context: ExecutionContext,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    /// One [`TabQaError::SubtaskFailed`] per failed task, completion order
    pub failures: Vec<TabQaError>,
    /// Why the run was cancelled; `None` unless status is `Cancelled`
    pub reason: Option<String>,
    /// Task ids in completion order (round by round, declaration order within)
    pub completion_order: Vec<String>,
}

impl RunReport {
    pub fn record(&self, id: &str) -> Option<TaskRecord> {
        self.context.get(id)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Round-based DAG executor over one oracle and one fusion engine
pub struct ExecutionEngine {
    oracle: Arc<dyn Oracle>,
    fusion: FusionEngine,
    config: ExecutorConfig,
}

impl ExecutionEngine {
    pub fn new(oracle: Arc<dyn Oracle>, fusion: FusionEngine) -> Self {
        Self::with_config(oracle, fusion, ExecutorConfig::default())
    }

    pub fn with_config(
        oracle: Arc<dyn Oracle>,
        fusion: FusionEngine,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            oracle,
            fusion,
            config,
        }
    }

    /// Run every task in the graph to a terminal status
    ///
    /// The graph is updated in place (status and result per task); the
    /// returned report owns the context mapping and the failure list.
    #[instrument(skip(self, graph, table), fields(task_count = graph.len()))]
    pub async fn execute(
        &self,
        graph: &mut SubtaskGraph,
        table: &Table,
    ) -> Result<RunReport, TabQaError> {
        let rounds = graph.topological_rounds()?;
        let table = Arc::new(table.clone());
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let context = ExecutionContext::new();
        let mut failed: Vec<String> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();
        let mut failures: Vec<TabQaError> = Vec::new();
        let mut completion_order: Vec<String> = Vec::new();
        let mut cancel_reason: Option<String> = None;

        for (round_idx, round) in rounds.iter().enumerate() {
            if failed.len() > self.config.failure_threshold {
                let cancel = TabQaError::RunCancelled {
                    reason: format!(
                        "{} failed task(s) exceeded the threshold of {}",
                        failed.len(),
                        self.config.failure_threshold
                    ),
                };
                warn!(%cancel, "Cancelling remaining rounds");
                for id in rounds[round_idx..].iter().flatten() {
                    context.insert(id, TaskRecord::skipped());
                    graph.record_outcome(id, TaskStatus::Skipped, None);
                    skipped.push(id.clone());
                }
                cancel_reason = Some(cancel.to_string());
                break;
            }

            debug!(round = round_idx, tasks = round.len(), "Scheduling round");
            let mut join_set: JoinSet<(String, Result<TaskOutcome, TabQaError>)> = JoinSet::new();

            for id in round {
                // A task with a non-succeeded dependency is skipped unrun
                let blocked = graph
                    .dependencies_of(id)
                    .iter()
                    .any(|dep| match context.get(dep) {
                        Some(record) => record.status != TaskStatus::Succeeded,
                        None => true,
                    });
                if blocked {
                    debug!(task_id = %id, "Skipping task with failed or skipped dependency");
                    context.insert(id, TaskRecord::skipped());
                    graph.record_outcome(id, TaskStatus::Skipped, None);
                    skipped.push(id.clone());
                    continue;
                }

                let task = match graph.task(id) {
                    Some(task) => task.clone(),
                    None => continue,
                };
                graph.record_outcome(id, TaskStatus::Running, None);

                let dependency_results: Vec<(String, String)> = task
                    .dependencies
                    .iter()
                    .filter_map(|dep| context.result_text(dep).map(|text| (dep.clone(), text)))
                    .collect();

                let oracle = Arc::clone(&self.oracle);
                let fusion = self.fusion.clone();
                let table = Arc::clone(&table);
                let semaphore = Arc::clone(&semaphore);
                let tools = self.config.retrieval_tools.clone();
                let top_k = self.config.retrieval_top_k;
                let task_id = id.clone();

                join_set.spawn(async move {
                    let permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            let error = TabQaError::SubtaskFailed {
                                task_id: task_id.clone(),
                                details: format!("worker pool closed: {e}"),
                            };
                            return (task_id, Err(error));
                        }
                    };

                    let evidence = if task.needs_retrieval {
                        fusion.fuse(&task.description, &table, &tools, top_k)
                    } else {
                        Vec::new()
                    };

                    let prompt = build_prompt(&task.description, &task.expected_output,
                        &task.reasoning_steps, &dependency_results, &evidence, &table);

                    let outcome = match oracle.infer(&prompt).await {
                        Ok(response) if response.trim().is_empty() => {
                            Err(TabQaError::SubtaskFailed {
                                task_id: task_id.clone(),
                                details: "empty oracle response".to_string(),
                            })
                        }
                        Ok(response) => Ok(TaskOutcome::new(response.trim().to_string())
                            .with_evidence(evidence)),
                        Err(e) => Err(TabQaError::SubtaskFailed {
                            task_id: task_id.clone(),
                            details: e.to_string(),
                        }),
                    };

                    drop(permit);
                    (task_id, outcome)
                });
            }

            // Collect the round, then record in declaration order so reruns of
            // the same graph produce the same completion order.
            let mut round_results: HashMap<String, Result<TaskOutcome, TabQaError>> =
                HashMap::new();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((id, outcome)) => {
                        round_results.insert(id, outcome);
                    }
                    Err(e) => warn!(error = %e, "Worker task panicked or was aborted"),
                }
            }

            for id in round {
                let Some(outcome) = round_results.remove(id) else {
                    continue;
                };
                match outcome {
                    Ok(result) => {
                        debug!(task_id = %id, "Task succeeded");
                        context.insert(id, TaskRecord::succeeded(result.clone()));
                        graph.record_outcome(id, TaskStatus::Succeeded, Some(result));
                    }
                    Err(error) => {
                        warn!(task_id = %id, %error, "Task failed");
                        context.insert(id, TaskRecord::failed());
                        graph.record_outcome(id, TaskStatus::Failed, None);
                        failed.push(id.clone());
                        failures.push(error);
                    }
                }
                completion_order.push(id.clone());
            }
        }

        let status = if cancel_reason.is_some() {
            RunStatus::Cancelled
        } else if failed.is_empty() && skipped.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::Partial
        };

        info!(
            ?status,
            completed = completion_order.len(),
            failed = failed.len(),
            skipped = skipped.len(),
            "Run finished"
        );

        Ok(RunReport {
            status,
            context,
            failed,
            skipped,
            failures,
            reason: cancel_reason,
            completion_order,
        })
    }
}

/// Assemble the per-task inference prompt from description, dependency
/// results, and retrieval evidence
fn build_prompt(
    description: &str,
    expected_output: &str,
    reasoning_steps: &[String],
    dependency_results: &[(String, String)],
    evidence: &[Evidence],
    table: &Table,
) -> String {
    let mut prompt = format!("Table:\n{}\nTask: {}\n", table.to_prompt_block(), description);

    if !expected_output.is_empty() {
        prompt.push_str(&format!("Expected output: {}\n", expected_output));
    }

    if !reasoning_steps.is_empty() {
        prompt.push_str("Reasoning steps:\n");
        for step in reasoning_steps {
            prompt.push_str(&format!("- {}\n", step));
        }
    }

    if !dependency_results.is_empty() {
        prompt.push_str("Results from prerequisite steps:\n");
        for (dep_id, text) in dependency_results {
            prompt.push_str(&format!("- {}: {}\n", dep_id, text));
        }
    }

    if !evidence.is_empty() {
        prompt.push_str("Retrieved evidence:\n");
        for item in evidence {
            let column = table.column_name(item.locator.col).unwrap_or("?");
            prompt.push_str(&format!(
                "- {} ({}, row {}, score {:.3})\n",
                item.content, column, item.locator.row, item.score
            ));
        }
    }

    prompt.push_str("\nAnswer the task concisely. Reply with the answer only.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::MockOracle;
    use crate::retrieval::ToolRegistry;
    use crate::strategy::Strategy;
    use crate::subtask::{Subtask, TaskType};
    use crate::table::Cell;

    fn table() -> Table {
        Table::new(
            vec!["season".into(), "tropical cyclones".into()],
            vec![
                vec![Cell::from("1990"), Cell::from(9i64)],
                vec![Cell::from("1991"), Cell::from(11i64)],
            ],
        )
        .unwrap()
    }

    fn engine(oracle: Arc<MockOracle>) -> ExecutionEngine {
        let fusion = FusionEngine::new(Arc::new(ToolRegistry::with_default_tools()));
        ExecutionEngine::new(oracle, fusion)
    }

    fn chain_graph() -> SubtaskGraph {
        SubtaskGraph::new(
            Strategy::Aggregation,
            vec![
                Subtask::new("task_1", "extract cyclone counts", TaskType::Independent),
                Subtask::new("task_2", "average the counts", TaskType::Aggregate)
                    .with_dependencies(vec!["task_1".into()]),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn dependency_results_feed_the_next_prompt() {
        let oracle = Arc::new(MockOracle::with_responses(vec![
            "9, 11".to_string(),
            "10".to_string(),
        ]));
        let mut graph = chain_graph();
        let report = engine(Arc::clone(&oracle))
            .execute(&mut graph, &table())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.context.result_text("task_2").as_deref(), Some("10"));
        assert_eq!(report.completion_order, vec!["task_1", "task_2"]);

        let second_prompt = oracle.last_request().unwrap();
        assert!(second_prompt.contains("task_1: 9, 11"));
        assert_eq!(
            graph.task("task_2").unwrap().status,
            TaskStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn failed_task_skips_transitive_dependents() {
        let oracle = Arc::new(MockOracle::new());
        oracle.queue_failure("backend down");
        let mut graph = SubtaskGraph::new(
            Strategy::Sequential,
            vec![
                Subtask::new("task_1", "extract", TaskType::Independent),
                Subtask::new("task_2", "analyze", TaskType::Sequential)
                    .with_dependencies(vec!["task_1".into()]),
                Subtask::new("task_3", "summarize", TaskType::Sequential)
                    .with_dependencies(vec!["task_2".into()]),
            ],
        )
        .unwrap();

        let report = engine(oracle).execute(&mut graph, &table()).await.unwrap();

        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.failed, vec!["task_1"]);
        assert_eq!(report.skipped, vec!["task_2", "task_3"]);
        assert_eq!(graph.task("task_3").unwrap().status, TaskStatus::Skipped);
        assert!(matches!(
            &report.failures[0],
            TabQaError::SubtaskFailed { task_id, details }
                if task_id == "task_1" && details.contains("backend down")
        ));
    }

    #[tokio::test]
    async fn one_failing_branch_leaves_the_other_intact() {
        let oracle = Arc::new(MockOracle::new());
        oracle.queue_response("17900");
        oracle.queue_failure("timeout");
        let mut graph = SubtaskGraph::new(
            Strategy::Comparison,
            vec![
                Subtask::new("task_1", "left branch", TaskType::Independent),
                Subtask::new("task_2", "right branch", TaskType::Independent),
                Subtask::new("task_3", "compare", TaskType::Compare)
                    .with_dependencies(vec!["task_1".into(), "task_2".into()]),
            ],
        )
        .unwrap();

        let config = ExecutorConfig {
            max_concurrency: 1, // serialize so the scripted queue maps to declaration order
            ..ExecutorConfig::default()
        };
        let fusion = FusionEngine::new(Arc::new(ToolRegistry::with_default_tools()));
        let report = ExecutionEngine::with_config(oracle, fusion, config)
            .execute(&mut graph, &table())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(
            report.record("task_1").unwrap().status,
            TaskStatus::Succeeded
        );
        assert_eq!(report.record("task_2").unwrap().status, TaskStatus::Failed);
        assert_eq!(report.record("task_3").unwrap().status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn failure_threshold_cancels_between_rounds() {
        let oracle = Arc::new(MockOracle::new());
        oracle.queue_failure("down");
        let mut graph = SubtaskGraph::new(
            Strategy::Sequential,
            vec![
                Subtask::new("task_1", "a", TaskType::Independent),
                Subtask::new("task_2", "b", TaskType::Sequential)
                    .with_dependencies(vec!["task_1".into()]),
            ],
        )
        .unwrap();

        let config = ExecutorConfig {
            failure_threshold: 0,
            ..ExecutorConfig::default()
        };
        let fusion = FusionEngine::new(Arc::new(ToolRegistry::with_default_tools()));
        let report = ExecutionEngine::with_config(oracle, fusion, config)
            .execute(&mut graph, &table())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.skipped, vec!["task_2"]);
        // the cancellation reason reaches the caller, not just the log
        let reason = report.reason.as_deref().unwrap();
        assert!(reason.contains("TABQA-021"));
        assert!(reason.contains("threshold of 0"));
    }

    #[tokio::test]
    async fn retrieval_evidence_reaches_the_prompt() {
        let oracle = Arc::new(MockOracle::with_responses(vec!["11".to_string()]));
        let mut graph = SubtaskGraph::new(
            Strategy::Independent,
            vec![Subtask::new(
                "task_1",
                "cyclones in the 1991 season",
                TaskType::Independent,
            )],
        )
        .unwrap();

        engine(Arc::clone(&oracle))
            .execute(&mut graph, &table())
            .await
            .unwrap();

        let prompt = oracle.last_request().unwrap();
        assert!(prompt.contains("Retrieved evidence:"));
        // evidence lines name the source column
        assert!(prompt.contains("1991 (season, row 1"));
    }

    #[tokio::test]
    async fn empty_response_counts_as_failure() {
        let oracle = Arc::new(MockOracle::with_responses(vec!["   ".to_string()]));
        let mut graph = SubtaskGraph::new(
            Strategy::Independent,
            vec![Subtask::new("task_1", "extract", TaskType::Independent)],
        )
        .unwrap();

        let report = engine(oracle).execute(&mut graph, &table()).await.unwrap();
        assert_eq!(report.failed, vec!["task_1"]);
        assert_eq!(report.status, RunStatus::Partial);
        assert!(report.reason.is_none());
        assert!(report.failures[0].to_string().contains("empty oracle response"));
    }
}
