//! Independence validator
//!
//! Static checks over a decomposed graph, run before execution. Every check
//! accumulates its violations instead of stopping at the first one, so a bad
//! graph reports all of its problems in one pass:
//!
//! 1. Referential integrity - every dependency id exists, no self-reference
//! 2. Acyclicity - depth-first cycle detection, back-edges reported with the
//!    full cycle id sequence
//! 3. Independence honesty - `independent` tasks must have no dependencies
//! 4. Strategy conformance - shape checks per strategy, warning-class only
//!
//! Checks 1-3 are hard: any violation makes the graph invalid and no repair is
//! attempted (the caller decides whether to re-decompose). Check 4 never
//! blocks execution.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::strategy::Strategy;
use crate::subtask::{SubtaskGraph, TaskType};

/// Severity of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A single structural problem found in a subtask graph
#[derive(Debug, Error)]
pub enum ValidationIssue {
    #[error("Task '{task_id}' depends on unknown task '{dependency}'")]
    UnknownDependency { task_id: String, dependency: String },

    #[error("Task '{task_id}' depends on itself")]
    SelfDependency { task_id: String },

    #[error("Dependency cycle: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("Task '{task_id}' is marked independent but declares dependencies: {}", .dependencies.join(", "))]
    DependentIndependent {
        task_id: String,
        dependencies: Vec<String>,
    },

    #[error("A {strategy} graph should have exactly one compare/aggregate sink depending on at least two tasks; found {found}")]
    ComparisonShape { strategy: Strategy, found: String },

    #[error("A {strategy} graph should contain a task of type '{expected}'")]
    MissingStageTask {
        strategy: Strategy,
        expected: TaskType,
    },
}

impl ValidationIssue {
    pub fn severity(&self) -> Severity {
        match self {
            ValidationIssue::ComparisonShape { .. } => Severity::Warning,
            ValidationIssue::MissingStageTask { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// All issues found in one validation pass, in check order
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff no hard-class issue was found
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn add(&mut self, issue: ValidationIssue) {
        if issue.severity() == Severity::Warning {
            self.warnings.push(issue);
        } else {
            self.errors.push(issue);
        }
    }

    /// Every issue rendered as text, errors first
    pub fn messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .map(|issue| issue.to_string())
            .collect()
    }
}

/// Run every check over the graph and accumulate the findings
pub fn validate(graph: &SubtaskGraph) -> ValidationReport {
    let mut report = ValidationReport::new();

    check_references(graph, &mut report);
    check_acyclic(graph, &mut report);
    check_independence(graph, &mut report);
    check_strategy_shape(graph, &mut report);

    report
}

fn check_references(graph: &SubtaskGraph, report: &mut ValidationReport) {
    let known: HashSet<&str> = graph.ids().iter().map(String::as_str).collect();
    for id in graph.ids() {
        for dep in graph.dependencies_of(id) {
            if dep == id {
                report.add(ValidationIssue::SelfDependency {
                    task_id: id.clone(),
                });
            } else if !known.contains(dep.as_str()) {
                report.add(ValidationIssue::UnknownDependency {
                    task_id: id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

fn check_acyclic(graph: &SubtaskGraph, report: &mut ValidationReport) {
    let mut marks: HashMap<&str, Mark> = graph
        .ids()
        .iter()
        .map(|id| (id.as_str(), Mark::Unvisited))
        .collect();

    for id in graph.ids() {
        if marks[id.as_str()] == Mark::Unvisited {
            let mut path = Vec::new();
            visit(graph, id, &mut marks, &mut path, report);
        }
    }
}

/// Depth-first walk along dependency edges; a gray node on the path is a
/// back-edge and the path suffix from it is the cycle.
fn visit<'g>(
    graph: &'g SubtaskGraph,
    id: &'g str,
    marks: &mut HashMap<&'g str, Mark>,
    path: &mut Vec<&'g str>,
    report: &mut ValidationReport,
) {
    marks.insert(id, Mark::InProgress);
    path.push(id);

    for dep in graph.dependencies_of(id) {
        match marks.get(dep.as_str()).copied() {
            Some(Mark::Unvisited) => {
                // Dangling deps were already reported by check_references
                if let Some(pos) = graph.ids().iter().position(|i| i == dep) {
                    let dep = graph.ids()[pos].as_str();
                    visit(graph, dep, marks, path, report);
                }
            }
            Some(Mark::InProgress) => {
                let start = path.iter().position(|&p| p == dep.as_str()).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.clone());
                report.add(ValidationIssue::CycleDetected { cycle });
            }
            _ => {}
        }
    }

    path.pop();
    marks.insert(id, Mark::Done);
}

fn check_independence(graph: &SubtaskGraph, report: &mut ValidationReport) {
    for task in graph.tasks() {
        if task.task_type == TaskType::Independent && !task.dependencies.is_empty() {
            report.add(ValidationIssue::DependentIndependent {
                task_id: task.id.clone(),
                dependencies: task.dependencies.clone(),
            });
        }
    }
}

fn check_strategy_shape(graph: &SubtaskGraph, report: &mut ValidationReport) {
    match graph.strategy() {
        Strategy::Comparison => {
            // Leaves may feed the sink through intermediate tasks, so count
            // reachability rather than direct dependencies.
            let leaves: Vec<&str> = graph
                .tasks()
                .filter(|t| t.dependencies.is_empty())
                .map(|t| t.id.as_str())
                .collect();
            let conforming = graph
                .sinks()
                .into_iter()
                .filter_map(|id| graph.task(id))
                .filter(|t| matches!(t.task_type, TaskType::Compare | TaskType::Aggregate))
                .filter(|t| {
                    leaves
                        .iter()
                        .filter(|leaf| **leaf != t.id && graph.has_path(leaf, &t.id))
                        .count()
                        >= 2
                })
                .count();
            if conforming != 1 {
                report.add(ValidationIssue::ComparisonShape {
                    strategy: Strategy::Comparison,
                    found: format!("{conforming} such sinks"),
                });
            }
        }
        Strategy::Aggregation => require_stage(graph, TaskType::Aggregate, report),
        Strategy::Bridge => require_stage(graph, TaskType::Bridge, report),
        Strategy::Sequential => require_stage(graph, TaskType::Sequential, report),
        Strategy::Independent => {}
    }
}

fn require_stage(graph: &SubtaskGraph, expected: TaskType, report: &mut ValidationReport) {
    if !graph.tasks().any(|t| t.task_type == expected) {
        report.add(ValidationIssue::MissingStageTask {
            strategy: graph.strategy(),
            expected,
        });
    }
}
