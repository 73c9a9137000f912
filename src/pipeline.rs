//! Question-answering pipeline
//!
//! The front door: classify the question, decompose it into a subtask graph,
//! validate the graph, execute it against the table, and assemble the final
//! answer. Each stage is usable on its own; this module only fixes their
//! order and the handoff rules between them.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::assemble::{assemble, Answer};
use crate::decompose::Decomposer;
use crate::error::TabQaError;
use crate::executor::{ExecutionEngine, ExecutorConfig, RunReport};
use crate::fusion::{FusionConfig, FusionEngine};
use crate::oracle::Oracle;
use crate::retrieval::ToolRegistry;
use crate::strategy::{classify, Strategy};
use crate::subtask::SubtaskGraph;
use crate::table::{Question, Table};
use crate::validate::validate;

/// Everything one question-run produced
#[derive(Debug)]
pub struct QaOutcome {
    pub strategy: Strategy,
    pub graph: SubtaskGraph,
    pub report: RunReport,
    pub answer: Answer,
    /// Warning-class validation issues (never block execution)
    pub warnings: Vec<String>,
}

/// One configured pipeline instance, reusable across questions
///
/// The oracle and tool registry are shared; each call to [`Self::answer`]
/// owns its graph, context, and retrieval results.
pub struct QaPipeline {
    oracle: Arc<dyn Oracle>,
    registry: Arc<ToolRegistry>,
    fusion_config: FusionConfig,
    executor_config: ExecutorConfig,
}

impl QaPipeline {
    /// Pipeline with the built-in retrieval tools and default configuration
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            registry: Arc::new(ToolRegistry::with_default_tools()),
            fusion_config: FusionConfig::default(),
            executor_config: ExecutorConfig::default(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_fusion_config(mut self, config: FusionConfig) -> Self {
        self.fusion_config = config;
        self
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    /// Answer one question over one table
    ///
    /// A hard validation failure surfaces as [`TabQaError::GraphInvalid`]
    /// with every accumulated issue; the caller decides whether to retry
    /// decomposition. Subtask failures do not error out here, they degrade
    /// the report and the answer.
    #[instrument(skip(self, question, table), fields(question = %question))]
    pub async fn answer(
        &self,
        question: &Question,
        table: &Table,
    ) -> Result<QaOutcome, TabQaError> {
        let strategy = classify(&question.text, self.oracle.as_ref()).await;
        info!(%strategy, "Question classified");

        let decomposer = Decomposer::new(Arc::clone(&self.oracle));
        let mut graph = decomposer.decompose(question, table, strategy).await?;

        let report = validate(&graph);
        let warnings: Vec<String> = report.warnings.iter().map(|w| w.to_string()).collect();
        for warning in &warnings {
            warn!(%warning, "Graph shape warning");
        }
        if !report.is_valid() {
            return Err(TabQaError::GraphInvalid {
                issues: report.errors.iter().map(|e| e.to_string()).collect(),
            });
        }

        let fusion =
            FusionEngine::new(Arc::clone(&self.registry)).with_config(self.fusion_config);
        let engine = ExecutionEngine::with_config(
            Arc::clone(&self.oracle),
            fusion,
            self.executor_config.clone(),
        );
        let run = engine.execute(&mut graph, table).await?;

        let answer = assemble(&graph, &run);
        info!(status = ?run.status, "Answer assembled");

        Ok(QaOutcome {
            strategy,
            graph,
            report: run,
            answer,
            warnings,
        })
    }
}
