//! Token-overlap retrieval (dense-signal stand-in)
//!
//! Scores each cell by the fraction of query tokens it shares. This is the
//! degraded-mode ranking used when no embedding backend is wired in; a real
//! dense retriever plugs in behind the same [`RetrievalTool`] trait and
//! reports [`ToolKind::Dense`] so fusion weights it identically.

use anyhow::Result;
use std::collections::HashSet;

use super::{Evidence, RetrievalTool, ToolKind};
use crate::table::{CellRef, Table};

/// Minimum similarity for a cell to count as evidence
const SCORE_FLOOR: f64 = 0.2;

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Overlap-similarity retrieval tool (dense signal)
pub struct OverlapTool;

impl OverlapTool {
    pub fn new() -> Self {
        Self
    }

    fn overlap_score(query_tokens: &HashSet<String>, cell_text: &str) -> f64 {
        if query_tokens.is_empty() {
            return 0.0;
        }
        let cell_tokens = tokenize(cell_text);
        if cell_tokens.is_empty() {
            return 0.0;
        }
        let shared = query_tokens.intersection(&cell_tokens).count();
        shared as f64 / query_tokens.len() as f64
    }
}

impl Default for OverlapTool {
    fn default() -> Self {
        Self::new()
    }
}

impl RetrievalTool for OverlapTool {
    fn name(&self) -> &str {
        "overlap"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Dense
    }

    fn search(&self, query: &str, table: &Table, top_k: usize) -> Result<Vec<Evidence>> {
        let query_tokens = tokenize(query);

        let mut results = Vec::new();
        for (row_idx, row) in table.rows().iter().enumerate() {
            for (col_idx, cell) in row.iter().enumerate() {
                let cell_text = cell.to_string();
                let score = Self::overlap_score(&query_tokens, &cell_text);
                if score > SCORE_FLOOR {
                    results.push(Evidence {
                        source_tool: self.name().to_string(),
                        score,
                        content: cell_text,
                        locator: CellRef {
                            row: row_idx,
                            col: col_idx,
                        },
                    });
                }
            }
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }
}
