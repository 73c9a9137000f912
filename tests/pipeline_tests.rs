//! # Pipeline Integration Tests
//!
//! End-to-end runs of the question-answering pipeline against a scripted
//! oracle:
//! - aggregation: extraction feeds the aggregate step, answer wraps the sink
//! - comparison with one failing branch: partial run, skipped sink
//! - deterministic scheduling across repeated runs
//! - fusion behavior when a requested tool is missing

use std::sync::Arc;

use tabqa::{
    Cell, ExecutorConfig, FusionEngine, MockOracle, Oracle, QaPipeline, Question, RunStatus,
    Table, TaskStatus, ToolRegistry,
};

// ============================================================================
// TEST HELPERS
// ============================================================================

fn cyclone_table() -> Table {
    Table::new(
        vec!["season".into(), "tropical cyclones".into()],
        vec![
            vec![Cell::from("1990"), Cell::from(9i64)],
            vec![Cell::from("1991"), Cell::from(11i64)],
            vec![Cell::from("1992"), Cell::from(7i64)],
        ],
    )
    .unwrap()
}

fn serial_pipeline(oracle: Arc<MockOracle>) -> QaPipeline {
    // One worker makes the scripted-response order follow declaration order
    QaPipeline::new(oracle).with_executor_config(ExecutorConfig {
        max_concurrency: 1,
        ..ExecutorConfig::default()
    })
}

const AGGREGATION_SPLIT: &str = r#"{"strategy": "aggregation", "subtasks": [
    {"id": "task_1", "description": "Extract the tropical cyclones column",
     "task_type": "independent", "dependencies": [], "expected_output": "counts"},
    {"id": "task_2", "description": "Average the extracted counts",
     "task_type": "aggregate", "dependencies": ["task_1"], "expected_output": "average"}
]}"#;

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn aggregation_question_threads_context_into_the_sink() {
    let oracle = Arc::new(MockOracle::with_responses(vec![
        AGGREGATION_SPLIT.to_string(),     // decomposition
        "9, 11, 7".to_string(),            // task_1
        "9".to_string(),                   // task_2
    ]));

    let pipeline = serial_pipeline(Arc::clone(&oracle));
    let question = Question::new("What is the average number of tropical cyclones per season?");
    let outcome = pipeline.answer(&question, &cyclone_table()).await.unwrap();

    assert_eq!(outcome.strategy.label(), "aggregation");
    assert_eq!(outcome.report.status, RunStatus::Succeeded);

    // task_1's result was consumed as an input to task_2's prompt
    let sink_prompt = oracle.last_request().unwrap();
    assert!(sink_prompt.contains("task_1: 9, 11, 7"));

    // and the final answer wraps task_2's result
    assert_eq!(outcome.answer.envelope(), "<answer>9</answer>");
    assert!(!outcome.answer.multi_sink);
}

#[tokio::test]
async fn comparison_with_one_failing_branch_yields_partial_context() {
    let oracle = Arc::new(MockOracle::with_responses(vec![
        // decomposition: two branches plus a compare sink
        r#"{"subtasks": [
            {"id": "branch_a", "description": "Cyclones in 1990", "task_type": "independent"},
            {"id": "branch_b", "description": "Cyclones in 1991", "task_type": "independent"},
            {"id": "verdict", "description": "Which season had more cyclones",
             "task_type": "compare", "dependencies": ["branch_a", "branch_b"]}
        ]}"#
        .to_string(),
        "9".to_string(), // branch_a
    ]));
    oracle.queue_failure("oracle timeout"); // branch_b

    let pipeline = serial_pipeline(oracle);
    let question = Question::new("Which season had more cyclones, 1990 or 1991?");
    let outcome = pipeline.answer(&question, &cyclone_table()).await.unwrap();

    assert_eq!(outcome.report.status, RunStatus::Partial);
    assert_eq!(
        outcome.report.record("branch_a").unwrap().status,
        TaskStatus::Succeeded
    );
    assert_eq!(
        outcome.report.record("branch_b").unwrap().status,
        TaskStatus::Failed
    );
    assert_eq!(
        outcome.report.record("verdict").unwrap().status,
        TaskStatus::Skipped
    );
    assert_eq!(outcome.report.failed, vec!["branch_b"]);

    // branch_a's result is still available in the partial context
    assert_eq!(
        outcome.report.context.result_text("branch_a").as_deref(),
        Some("9")
    );
}

#[tokio::test]
async fn completion_order_is_deterministic_across_runs() {
    let mut orders = Vec::new();
    for _ in 0..3 {
        let oracle = Arc::new(MockOracle::new().with_default("42"));
        // Queue the decomposition first; every execution prompt then gets "42"
        oracle.queue_response(
            r#"{"subtasks": [
                {"id": "left", "description": "a", "task_type": "independent"},
                {"id": "right", "description": "b", "task_type": "independent"},
                {"id": "join", "description": "c", "task_type": "aggregate",
                 "dependencies": ["left", "right"]}
            ]}"#,
        );
        let pipeline = QaPipeline::new(oracle);
        let question = Question::new("What is the total number of cyclones?");
        let outcome = pipeline.answer(&question, &cyclone_table()).await.unwrap();
        orders.push(outcome.report.completion_order.clone());
    }
    assert_eq!(orders[0], vec!["left", "right", "join"]);
    assert_eq!(orders[0], orders[1]);
    assert_eq!(orders[1], orders[2]);
}

#[tokio::test]
async fn unknown_retrieval_tool_degrades_to_the_remaining_one() {
    let oracle = Arc::new(MockOracle::new().with_default("11"));
    oracle.queue_response(
        r#"{"subtasks": [
            {"id": "task_1", "description": "cyclones in the 1991 season",
             "task_type": "independent"}
        ]}"#,
    );

    // "dense" is not registered; fusion must proceed on "keyword" alone
    let pipeline = QaPipeline::new(Arc::clone(&oracle) as Arc<dyn Oracle>).with_executor_config(ExecutorConfig {
        retrieval_tools: vec!["keyword".to_string(), "dense".to_string()],
        ..ExecutorConfig::default()
    });
    let question = Question::new("What is the total number of cyclones in 1991?");
    let outcome = pipeline.answer(&question, &cyclone_table()).await.unwrap();

    assert_eq!(outcome.report.status, RunStatus::Succeeded);
    let prompt = oracle.last_request().unwrap();
    assert!(prompt.contains("Retrieved evidence:"));
    assert_eq!(outcome.answer.envelope(), "<answer>11</answer>");
}

#[test]
fn fusion_with_one_tool_missing_equals_that_tool_scaled() {
    let registry = Arc::new(ToolRegistry::with_default_tools());
    let engine = FusionEngine::new(Arc::clone(&registry));
    let table = cyclone_table();

    let fused = engine.fuse(
        "cyclones in the 1991 season",
        &table,
        &["keyword".to_string(), "missing-dense".to_string()],
        5,
    );
    let keyword_only = engine.fuse(
        "cyclones in the 1991 season",
        &table,
        &["keyword".to_string()],
        5,
    );

    assert!(!fused.is_empty());
    assert_eq!(fused.len(), keyword_only.len());
    for (a, b) in fused.iter().zip(keyword_only.iter()) {
        assert_eq!(a.locator, b.locator);
        assert!((a.score - b.score).abs() < 1e-12);
    }
}
