//! Answer assembly
//!
//! Turns an execution report back into the single text value downstream
//! scoring consumes. The graph's sink tasks (no other task depends on them)
//! carry the answer: exactly one succeeded sink is the normal case; several
//! sinks mean a malformed decomposition, so their results are concatenated in
//! completion order and the answer is flagged. The `<answer>...</answer>`
//! delimiter pair is a compatibility contract and is reproduced exactly.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::executor::RunReport;
use crate::subtask::SubtaskGraph;

/// Inner span of an already-wrapped oracle response, to avoid double tags
static ANSWER_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<answer>(.*?)</answer>").unwrap());

const NO_ANSWER: &str = "Unable to determine the answer";

/// The assembled final answer
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    /// Unwrapped answer text
    pub value: String,
    /// Set when the graph had more than one sink and results were concatenated
    pub multi_sink: bool,
}

impl Answer {
    /// The exact output envelope consumed downstream
    pub fn envelope(&self) -> String {
        format!("<answer>{}</answer>", self.value)
    }
}

/// Render the run's result into the output envelope
///
/// Falls back to the last succeeded task when no sink succeeded, and to a
/// fixed placeholder when nothing did; assembly itself never fails.
pub fn assemble(graph: &SubtaskGraph, report: &RunReport) -> Answer {
    let sinks = graph.sinks();

    // Succeeded sinks in completion order
    let mut sink_texts: Vec<String> = Vec::new();
    for id in &report.completion_order {
        if sinks.iter().any(|s| s == id) {
            if let Some(text) = report.context.result_text(id) {
                sink_texts.push(text);
            }
        }
    }

    let (value, multi_sink) = match sink_texts.len() {
        0 => (fallback_text(report), false),
        1 => (sink_texts.remove(0), false),
        _ => {
            warn!(
                sink_count = sink_texts.len(),
                "Multiple sink results, concatenating in completion order"
            );
            (sink_texts.join("; "), true)
        }
    };

    Answer {
        value: strip_answer_tags(&value),
        multi_sink,
    }
}

/// Last succeeded task's text, or the fixed placeholder
fn fallback_text(report: &RunReport) -> String {
    report
        .completion_order
        .iter()
        .rev()
        .find_map(|id| report.context.result_text(id))
        .unwrap_or_else(|| NO_ANSWER.to_string())
}

fn strip_answer_tags(text: &str) -> String {
    match ANSWER_SPAN.captures(text) {
        Some(caps) => caps[1].trim().to_string(),
        None => text.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutionEngine, ExecutorConfig, RunStatus};
    use crate::fusion::FusionEngine;
    use crate::oracle::MockOracle;
    use crate::retrieval::ToolRegistry;
    use crate::strategy::Strategy;
    use crate::subtask::{Subtask, TaskType};
    use crate::table::{Cell, Table};
    use std::sync::Arc;

    fn table() -> Table {
        Table::new(
            vec!["k".into(), "v".into()],
            vec![vec![Cell::from("a"), Cell::from(1i64)]],
        )
        .unwrap()
    }

    async fn run(
        graph: &mut SubtaskGraph,
        oracle: Arc<MockOracle>,
        max_concurrency: usize,
    ) -> RunReport {
        let fusion = FusionEngine::new(Arc::new(ToolRegistry::with_default_tools()));
        let config = ExecutorConfig {
            max_concurrency,
            ..ExecutorConfig::default()
        };
        ExecutionEngine::with_config(oracle, fusion, config)
            .execute(graph, &table())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn single_sink_round_trips_byte_for_byte() {
        let oracle = Arc::new(MockOracle::with_responses(vec![
            "9, 11".to_string(),
            "the average is 10".to_string(),
        ]));
        let mut graph = SubtaskGraph::new(
            Strategy::Aggregation,
            vec![
                Subtask::new("task_1", "extract", TaskType::Independent),
                Subtask::new("task_2", "average", TaskType::Aggregate)
                    .with_dependencies(vec!["task_1".into()]),
            ],
        )
        .unwrap();

        let report = run(&mut graph, oracle, 4).await;
        assert_eq!(report.status, RunStatus::Succeeded);

        let answer = assemble(&graph, &report);
        assert!(!answer.multi_sink);
        assert_eq!(answer.envelope(), "<answer>the average is 10</answer>");
    }

    #[tokio::test]
    async fn multiple_sinks_concatenate_and_flag() {
        let oracle = Arc::new(MockOracle::with_responses(vec![
            "first".to_string(),
            "second".to_string(),
        ]));
        let mut graph = SubtaskGraph::new(
            Strategy::Independent,
            vec![
                Subtask::new("task_1", "a", TaskType::Independent),
                Subtask::new("task_2", "b", TaskType::Independent),
            ],
        )
        .unwrap();

        let report = run(&mut graph, oracle, 1).await;
        let answer = assemble(&graph, &report);
        assert!(answer.multi_sink);
        assert_eq!(answer.envelope(), "<answer>first; second</answer>");
    }

    #[tokio::test]
    async fn failed_sink_falls_back_to_last_success() {
        let oracle = Arc::new(MockOracle::new());
        oracle.queue_response("partial result");
        oracle.queue_failure("down");
        let mut graph = SubtaskGraph::new(
            Strategy::Sequential,
            vec![
                Subtask::new("task_1", "extract", TaskType::Independent),
                Subtask::new("task_2", "analyze", TaskType::Sequential)
                    .with_dependencies(vec!["task_1".into()]),
            ],
        )
        .unwrap();

        let report = run(&mut graph, oracle, 1).await;
        let answer = assemble(&graph, &report);
        assert_eq!(answer.envelope(), "<answer>partial result</answer>");
    }

    #[tokio::test]
    async fn nothing_succeeded_yields_placeholder() {
        let oracle = Arc::new(MockOracle::new());
        oracle.queue_failure("down");
        let mut graph = SubtaskGraph::new(
            Strategy::Independent,
            vec![Subtask::new("task_1", "a", TaskType::Independent)],
        )
        .unwrap();

        let report = run(&mut graph, oracle, 1).await;
        let answer = assemble(&graph, &report);
        assert_eq!(
            answer.envelope(),
            "<answer>Unable to determine the answer</answer>"
        );
    }

    #[test]
    fn pre_wrapped_text_is_not_double_wrapped() {
        assert_eq!(
            strip_answer_tags("<answer>42</answer>"),
            "42".to_string()
        );
        assert_eq!(strip_answer_tags("  42  "), "42".to_string());
    }
}
