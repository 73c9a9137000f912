//! Task decomposition
//!
//! The oracle supplies the substance of a decomposition; this module owns the
//! structure. It assembles the strategy-specific prompt, digs the JSON object
//! out of whatever the oracle wrapped it in, and normalizes the result into a
//! [`SubtaskGraph`]: missing ids get positional ones, duplicates get suffixed,
//! unknown task types coerce to `independent`. An oracle that fails outright
//! still yields the strategy's canned fallback decomposition; hard structural
//! checks live in the validator, not here.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::TabQaError;
use crate::oracle::Oracle;
use crate::strategy::Strategy;
use crate::subtask::{Subtask, SubtaskGraph, TaskType};
use crate::table::{Question, Table};

/// Bare JSON object anywhere in the response
static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());
/// ```json fenced block
static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").unwrap());
/// Unlabeled fenced block
static BARE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```\s*(\{.*?\})\s*```").unwrap());

/// Decomposition as the oracle emits it: every field optional, nothing trusted
#[derive(Debug, Deserialize)]
struct RawDecomposition {
    #[serde(default)]
    #[allow(dead_code)] // The strategy was chosen before decomposition; the
    // oracle's echo of it is not authoritative.
    strategy: Option<String>,
    #[serde(default)]
    subtasks: Vec<RawSubtask>,
}

#[derive(Debug, Deserialize)]
struct RawSubtask {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    task_type: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    expected_output: String,
    #[serde(default)]
    reasoning_steps: Vec<String>,
}

/// Turns a question into a subtask graph via the oracle
pub struct Decomposer {
    oracle: Arc<dyn Oracle>,
}

impl Decomposer {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Decompose a question under the chosen strategy
    #[instrument(skip(self, question, table), fields(strategy = %strategy))]
    pub async fn decompose(
        &self,
        question: &Question,
        table: &Table,
        strategy: Strategy,
    ) -> Result<SubtaskGraph, TabQaError> {
        let prompt = build_prompt(question, table, strategy);

        let tasks = match self.oracle.infer(&prompt).await {
            Ok(response) => match extract_decomposition(&response) {
                Some(raw) if !raw.subtasks.is_empty() => normalize(raw),
                _ => {
                    warn!(
                        response_prefix = %response.chars().take(80).collect::<String>(),
                        "No parseable decomposition in oracle output, using fallback"
                    );
                    default_tasks(strategy)
                }
            },
            Err(e) => {
                warn!(error = %e, "Oracle decomposition failed, using fallback");
                default_tasks(strategy)
            }
        };

        if tasks.is_empty() {
            return Err(TabQaError::GraphMalformed {
                details: "decomposition produced no subtasks".to_string(),
            });
        }

        debug!(task_count = tasks.len(), "Decomposition complete");
        SubtaskGraph::new(strategy, tasks)
    }
}

/// Assemble the decomposition prompt for one strategy
fn build_prompt(question: &Question, table: &Table, strategy: Strategy) -> String {
    format!(
        "Table:\n{table}\nQuestion: {question}\n\n\
         You are a table question analysis expert.\n{guidance}\n\n\
         Split this question according to the rules above. Output strictly the \
         following JSON and nothing else:\n\n\
         ```json\n\
         {{\n\
         \x20 \"strategy\": \"{strategy}\",\n\
         \x20 \"subtasks\": [\n\
         \x20   {{\n\
         \x20     \"id\": \"task_1\",\n\
         \x20     \"description\": \"what to do\",\n\
         \x20     \"task_type\": \"independent\",\n\
         \x20     \"dependencies\": [],\n\
         \x20     \"expected_output\": \"what this step produces\",\n\
         \x20     \"reasoning_steps\": [\"step 1\", \"step 2\"]\n\
         \x20   }}\n\
         \x20 ]\n\
         }}\n\
         ```",
        table = table.to_prompt_block(),
        question = question,
        guidance = strategy.guidance(),
        strategy = strategy,
    )
}

/// Dig the decomposition JSON out of the response
///
/// Tries, in order: a bare JSON object, a ```json fence, an unlabeled fence.
fn extract_decomposition(response: &str) -> Option<RawDecomposition> {
    if let Some(m) = JSON_OBJECT.find(response) {
        if let Ok(raw) = serde_json::from_str(m.as_str()) {
            return Some(raw);
        }
    }
    if let Some(caps) = JSON_FENCE.captures(response) {
        if let Ok(raw) = serde_json::from_str(caps.get(1)?.as_str()) {
            return Some(raw);
        }
    }
    if let Some(caps) = BARE_FENCE.captures(response) {
        if let Ok(raw) = serde_json::from_str(caps.get(1)?.as_str()) {
            return Some(raw);
        }
    }
    None
}

/// Apply the repair rules: positional ids, suffix-deduplication, type coercion
fn normalize(raw: RawDecomposition) -> Vec<Subtask> {
    let mut used_ids: HashSet<String> = HashSet::new();
    let mut tasks = Vec::with_capacity(raw.subtasks.len());

    for (index, raw_task) in raw.subtasks.into_iter().enumerate() {
        let base_id = match raw_task.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => {
                let synthetic = format!("task_{}", index + 1);
                debug!(id = %synthetic, "Assigned synthetic subtask id");
                synthetic
            }
        };

        let mut id = base_id.clone();
        let mut suffix = 2;
        while used_ids.contains(&id) {
            id = format!("{}_{}", base_id, suffix);
            suffix += 1;
        }
        if id != base_id {
            warn!(original = %base_id, disambiguated = %id, "Duplicate subtask id");
        }
        used_ids.insert(id.clone());

        let task_type = raw_task
            .task_type
            .as_deref()
            .and_then(TaskType::from_label)
            .unwrap_or_else(|| {
                if let Some(label) = &raw_task.task_type {
                    warn!(%label, "Unknown task type, coercing to independent");
                }
                TaskType::Independent
            });

        tasks.push(
            Subtask::new(id, raw_task.description, task_type)
                .with_dependencies(raw_task.dependencies)
                .with_expected_output(raw_task.expected_output)
                .with_reasoning_steps(raw_task.reasoning_steps),
        );
    }

    tasks
}

/// Canned per-strategy decomposition used when the oracle's output is unusable
fn default_tasks(strategy: Strategy) -> Vec<Subtask> {
    match strategy {
        Strategy::Aggregation => vec![
            Subtask::new("task_1", "Extract the relevant data column", TaskType::Independent)
                .with_expected_output("data column")
                .with_reasoning_steps(vec![
                    "analyze the question".into(),
                    "identify the relevant column".into(),
                    "extract its values".into(),
                ]),
            Subtask::new("task_2", "Perform the aggregate computation", TaskType::Aggregate)
                .with_dependencies(vec!["task_1".into()])
                .with_expected_output("aggregate result")
                .with_reasoning_steps(vec![
                    "receive the values".into(),
                    "compute the aggregate".into(),
                ]),
        ],
        Strategy::Comparison => vec![
            Subtask::new("task_1", "Extract the first entity's value", TaskType::Independent)
                .with_expected_output("first entity value"),
            Subtask::new("task_2", "Extract the second entity's value", TaskType::Independent)
                .with_expected_output("second entity value"),
            Subtask::new("task_3", "Compare the two values", TaskType::Compare)
                .with_dependencies(vec!["task_1".into(), "task_2".into()])
                .with_expected_output("comparison result"),
        ],
        Strategy::Bridge => vec![
            Subtask::new("task_1", "Apply the filter condition", TaskType::Independent)
                .with_expected_output("filtered rows"),
            Subtask::new("task_2", "Compute over the filtered rows", TaskType::Bridge)
                .with_dependencies(vec!["task_1".into()])
                .with_expected_output("computed result"),
        ],
        Strategy::Sequential => vec![
            Subtask::new("task_1", "Extract the time series data", TaskType::Independent)
                .with_expected_output("ordered series"),
            Subtask::new("task_2", "Analyze the change over the series", TaskType::Sequential)
                .with_dependencies(vec!["task_1".into()])
                .with_expected_output("trend analysis"),
        ],
        Strategy::Independent => vec![Subtask::new(
            "task_1",
            "Extract all data relevant to the question",
            TaskType::Independent,
        )
        .with_expected_output("relevant data")],
    }
}
