//! Retrieval fusion
//!
//! Combines the independently ranked output of several retrieval tools into
//! one evidence list per query. Tool-local scores are not comparable across
//! tools, so each tool's scores are min-max normalized to [0,1] first, then
//! weighted by the tool's kind (sparse 0.3, dense 0.7 by default) and summed
//! per distinct cell locator. Items seen by only one tool keep that tool's
//! weighted score alone; there is no boost for the missing signal.
//!
//! Evidence is advisory: a missing or failing tool degrades the result, it
//! never fails the requesting subtask.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::retrieval::{Evidence, ToolKind, ToolRegistry};
use crate::table::{CellRef, Table};

/// Fusion weights per tool kind
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    pub sparse_weight: f64,
    pub dense_weight: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            sparse_weight: 0.3,
            dense_weight: 0.7,
        }
    }
}

/// Accumulated per-locator signals before scoring
struct Partial {
    content: String,
    /// (normalized score, rank in that tool's list) per kind
    sparse: Option<(f64, usize)>,
    dense: Option<(f64, usize)>,
    /// Contributing tool names, encounter order
    tools: Vec<String>,
}

/// Combines ranked tool output into fused evidence
#[derive(Clone)]
pub struct FusionEngine {
    registry: Arc<ToolRegistry>,
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            config: FusionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FusionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Fuse the named tools' rankings for one query
    ///
    /// Unregistered or failing tools are skipped with a warning; if every
    /// tool drops out the result is simply empty.
    pub fn fuse(&self, query: &str, table: &Table, tools: &[String], top_k: usize) -> Vec<Evidence> {
        let mut partials: HashMap<CellRef, Partial> = HashMap::new();

        for tool_name in tools {
            let tool = match self.registry.get(tool_name) {
                Some(tool) => tool,
                None => {
                    warn!(tool = %tool_name, "Retrieval tool not registered, skipping");
                    continue;
                }
            };

            let ranked = match tool.search(query, table, top_k) {
                Ok(ranked) => ranked,
                Err(e) => {
                    warn!(tool = %tool_name, error = %e, "Retrieval tool failed, skipping");
                    continue;
                }
            };
            if ranked.is_empty() {
                continue;
            }

            // Min-max normalize within this tool's result set for this query.
            // A constant-score set normalizes to 1.0 throughout.
            let min = ranked.iter().map(|e| e.score).fold(f64::INFINITY, f64::min);
            let max = ranked
                .iter()
                .map(|e| e.score)
                .fold(f64::NEG_INFINITY, f64::max);
            let range = max - min;

            for (rank, item) in ranked.into_iter().enumerate() {
                let norm = if range > 0.0 {
                    (item.score - min) / range
                } else {
                    1.0
                };

                let partial = partials.entry(item.locator).or_insert_with(|| Partial {
                    content: item.content,
                    sparse: None,
                    dense: None,
                    tools: vec![],
                });
                let slot = match tool.kind() {
                    ToolKind::Sparse => &mut partial.sparse,
                    ToolKind::Dense => &mut partial.dense,
                };
                // First signal of a kind wins (dedup key is the locator)
                if slot.is_none() {
                    *slot = Some((norm, rank));
                }
                if !partial.tools.iter().any(|t| t == tool_name) {
                    partial.tools.push(tool_name.clone());
                }
            }
        }

        let FusionConfig {
            sparse_weight,
            dense_weight,
        } = self.config;
        let dense_is_primary = dense_weight >= sparse_weight;

        let mut fused: Vec<(f64, (usize, usize), Evidence)> = partials
            .into_iter()
            .map(|(locator, partial)| {
                let combined = sparse_weight * partial.sparse.map(|(n, _)| n).unwrap_or(0.0)
                    + dense_weight * partial.dense.map(|(n, _)| n).unwrap_or(0.0);

                // Ties break on the higher-weighted tool's return order;
                // items it never returned sort after those it did.
                let (primary, secondary) = if dense_is_primary {
                    (partial.dense, partial.sparse)
                } else {
                    (partial.sparse, partial.dense)
                };
                let tie = match (primary, secondary) {
                    (Some((_, rank)), _) => (0, rank),
                    (None, Some((_, rank))) => (1, rank),
                    (None, None) => (2, 0),
                };

                let evidence = Evidence {
                    source_tool: partial.tools.join("+"),
                    score: combined,
                    content: partial.content,
                    locator,
                };
                (combined, tie, evidence)
            })
            .collect();

        // total_cmp keeps the sort panic-free even if a third-party tool
        // leaks NaN scores through the trait boundary
        fused.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| {
                    (a.2.locator.row, a.2.locator.col).cmp(&(b.2.locator.row, b.2.locator.col))
                })
        });

        fused
            .into_iter()
            .take(top_k)
            .map(|(_, _, evidence)| evidence)
            .collect()
    }
}
