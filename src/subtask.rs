//! Subtask graph model
//!
//! A `SubtaskGraph` is the contract between the decomposer and the
//! validator/executor: an ordered list of task ids (declaration order, used
//! for deterministic iteration and tie-breaking) plus the per-task dependency
//! sets. The graph is serializable; no pointers between task objects.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use crate::error::TabQaError;
use crate::retrieval::Evidence;
use crate::strategy::Strategy;

/// Kind of work one subtask performs (orthogonal to the graph's strategy)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Independent,
    Aggregate,
    Compare,
    Bridge,
    Sequential,
}

impl TaskType {
    /// Parse a free-text label; unknown labels are `None` (the decomposer
    /// coerces those to `Independent`)
    pub fn from_label(label: &str) -> Option<TaskType> {
        match label.trim().to_lowercase().as_str() {
            "independent" => Some(TaskType::Independent),
            "aggregate" => Some(TaskType::Aggregate),
            "compare" => Some(TaskType::Compare),
            "bridge" => Some(TaskType::Bridge),
            "sequential" => Some(TaskType::Sequential),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskType::Independent => "independent",
            TaskType::Aggregate => "aggregate",
            TaskType::Compare => "compare",
            TaskType::Bridge => "bridge",
            TaskType::Sequential => "sequential",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of one subtask within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Terminal statuses unblock dependents (succeeded) or skip them
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

/// Result of a succeeded subtask: produced text plus the evidence used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub text: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl TaskOutcome {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            evidence: vec![],
        }
    }

    pub fn with_evidence(mut self, evidence: Vec<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }
}

/// One unit of decomposed work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub expected_output: String,
    /// Free-text step hints carried into the execution prompt
    #[serde(default)]
    pub reasoning_steps: Vec<String>,
    /// Set by the decomposer when the description implies a table lookup
    #[serde(default)]
    pub needs_retrieval: bool,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutcome>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, description: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            task_type,
            dependencies: vec![],
            expected_output: String::new(),
            reasoning_steps: vec![],
            needs_retrieval: matches!(task_type, TaskType::Independent | TaskType::Bridge),
            status: TaskStatus::Pending,
            result: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_expected_output(mut self, expected_output: impl Into<String>) -> Self {
        self.expected_output = expected_output.into();
        self
    }

    pub fn with_reasoning_steps(mut self, steps: Vec<String>) -> Self {
        self.reasoning_steps = steps;
        self
    }
}

/// The dependency graph of subtasks for one question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskGraph {
    strategy: Strategy,
    /// Task ids in declaration order (deterministic iteration / tie-break)
    order: Vec<String>,
    tasks: HashMap<String, Subtask>,
}

impl SubtaskGraph {
    /// Build a graph from tasks in declaration order
    ///
    /// Duplicate ids are rejected here; the decomposer disambiguates them
    /// before construction.
    pub fn new(strategy: Strategy, tasks: Vec<Subtask>) -> Result<Self, TabQaError> {
        let mut order = Vec::with_capacity(tasks.len());
        let mut map = HashMap::with_capacity(tasks.len());
        for task in tasks {
            if map.contains_key(&task.id) {
                return Err(TabQaError::GraphMalformed {
                    details: format!("duplicate subtask id '{}'", task.id),
                });
            }
            order.push(task.id.clone());
            map.insert(task.id.clone(), task);
        }
        Ok(Self {
            strategy,
            order,
            tasks: map,
        })
    }

    #[inline]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Task ids in declaration order
    #[inline]
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn task(&self, id: &str) -> Option<&Subtask> {
        self.tasks.get(id)
    }

    /// Tasks in declaration order
    pub fn tasks(&self) -> impl Iterator<Item = &Subtask> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Direct dependencies of a task
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        static EMPTY: &[String] = &[];
        self.tasks
            .get(id)
            .map(|t| t.dependencies.as_slice())
            .unwrap_or(EMPTY)
    }

    /// Successor adjacency (task id -> ids that depend on it), declaration order
    pub fn successors(&self) -> HashMap<&str, Vec<&str>> {
        let mut adjacency: HashMap<&str, Vec<&str>> =
            self.order.iter().map(|id| (id.as_str(), vec![])).collect();
        for task in self.tasks() {
            for dep in &task.dependencies {
                if let Some(succ) = adjacency.get_mut(dep.as_str()) {
                    succ.push(task.id.as_str());
                }
            }
        }
        adjacency
    }

    /// Sink tasks: no other task depends on them (declaration order)
    pub fn sinks(&self) -> Vec<&str> {
        let mut depended_on: HashSet<&str> = HashSet::new();
        for task in self.tasks() {
            for dep in &task.dependencies {
                depended_on.insert(dep.as_str());
            }
        }
        self.order
            .iter()
            .map(|id| id.as_str())
            .filter(|id| !depended_on.contains(id))
            .collect()
    }

    /// Check if there's a dependency path from `from` to `to` (BFS over
    /// successor edges; `from == to` counts as a path)
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let adjacency = self.successors();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = adjacency.get(current) {
                for &neighbor in neighbors {
                    if neighbor == to {
                        return true;
                    }
                    if visited.insert(neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }
        false
    }

    /// Topological rounds (Kahn's algorithm)
    ///
    /// Each round holds the tasks whose dependencies were all emitted in
    /// earlier rounds, listed in declaration order; tasks within one round
    /// carry no edges between each other and may run concurrently. A cycle
    /// leaves tasks unemitted and is reported as an error.
    pub fn topological_rounds(&self) -> Result<Vec<Vec<String>>, TabQaError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(self.order.len());
        for task in self.tasks() {
            // Dangling dependencies are a validator concern; ignore them here
            // so ordering stays well-defined on the known nodes.
            let degree = task
                .dependencies
                .iter()
                .filter(|dep| self.tasks.contains_key(dep.as_str()))
                .count();
            in_degree.insert(task.id.as_str(), degree);
        }

        let adjacency = self.successors();
        let mut emitted: HashSet<&str> = HashSet::new();
        let mut rounds: Vec<Vec<String>> = Vec::new();

        while emitted.len() < self.order.len() {
            let ready: Vec<&str> = self
                .order
                .iter()
                .map(|id| id.as_str())
                .filter(|id| !emitted.contains(id) && in_degree[id] == 0)
                .collect();

            if ready.is_empty() {
                let stuck: Vec<String> = self
                    .order
                    .iter()
                    .filter(|id| !emitted.contains(id.as_str()))
                    .cloned()
                    .collect();
                return Err(TabQaError::GraphInvalid {
                    issues: vec![format!(
                        "dependency cycle among tasks: {}",
                        stuck.join(", ")
                    )],
                });
            }

            for &id in &ready {
                emitted.insert(id);
                if let Some(succ) = adjacency.get(id) {
                    for &next in succ {
                        if let Some(deg) = in_degree.get_mut(next) {
                            *deg = deg.saturating_sub(1);
                        }
                    }
                }
            }
            rounds.push(ready.into_iter().map(String::from).collect());
        }

        Ok(rounds)
    }

    /// Flat topological order (declaration-order tie-break within rounds)
    pub fn topological_order(&self) -> Result<Vec<String>, TabQaError> {
        Ok(self.topological_rounds()?.into_iter().flatten().collect())
    }

    /// Record a terminal status (and result, when succeeded) on one task
    ///
    /// Only the engine owning the run for this question calls this; the rest
    /// of the structure stays read-only after construction.
    pub fn record_outcome(&mut self, id: &str, status: TaskStatus, result: Option<TaskOutcome>) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.status = status;
            task.result = result;
        }
    }
}
