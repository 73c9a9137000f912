//! Sparse keyword retrieval
//!
//! Extracts stop-word-filtered keywords from the query and scores every cell
//! by the fraction of keywords it contains. Scores are tool-local; fusion
//! normalizes them before combining with other signals.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use super::{Evidence, RetrievalTool, ToolKind};
use crate::table::{CellRef, Table};

static WORD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").unwrap());

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "is", "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did",
        "will", "would", "could", "should",
    ]
    .into_iter()
    .collect()
});

/// Extract lowercase keywords, dropping stop words and short tokens
pub(crate) fn extract_keywords(query: &str) -> Vec<String> {
    WORD_PATTERN
        .find_iter(&query.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w.as_str()))
        .collect()
}

/// Keyword-match retrieval tool (sparse signal)
pub struct KeywordTool;

impl KeywordTool {
    pub fn new() -> Self {
        Self
    }

    fn keyword_score(keywords: &[String], cell_text: &str) -> f64 {
        if keywords.is_empty() {
            return 0.0;
        }
        let matches = keywords.iter().filter(|kw| cell_text.contains(*kw)).count();
        matches as f64 / keywords.len() as f64
    }
}

impl Default for KeywordTool {
    fn default() -> Self {
        Self::new()
    }
}

impl RetrievalTool for KeywordTool {
    fn name(&self) -> &str {
        "keyword"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Sparse
    }

    fn search(&self, query: &str, table: &Table, top_k: usize) -> Result<Vec<Evidence>> {
        let keywords = extract_keywords(query);

        let mut results = Vec::new();
        for (row_idx, row) in table.rows().iter().enumerate() {
            for (col_idx, cell) in row.iter().enumerate() {
                let cell_text = cell.to_string();
                let score = Self::keyword_score(&keywords, &cell_text.to_lowercase());
                if score > 0.0 {
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

        // Stable sort keeps row/column scan order among equal scores
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::cyclone_table;
    use super::*;

    #[test]
    fn stop_words_and_short_tokens_dropped() {
        let keywords = extract_keywords("What is the average of tropical cyclones?");
        assert!(keywords.contains(&"average".to_string()));
        assert!(keywords.contains(&"tropical".to_string()));
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"of".to_string()));
        assert!(!keywords.contains(&"is".to_string()));
    }

    #[test]
    fn matches_are_scored_by_keyword_fraction() {
        let table = cyclone_table();
        let tool = KeywordTool::new();
        let results = tool.search("season 1991", &table, 5).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].content, "1991");
        // one of two keywords matched
        assert!((results[0].score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn no_match_returns_empty() {
        let table = cyclone_table();
        let tool = KeywordTool::new();
        let results = tool.search("pelican", &table, 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn top_k_truncates() {
        let table = cyclone_table();
        let tool = KeywordTool::new();
        // "199" is not a standalone token; use the shared years prefix match
        let all = tool.search("1990 1991 1992", &table, 10).unwrap();
        let limited = tool.search("1990 1991 1992", &table, 2).unwrap();
        assert!(all.len() >= 3);
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].locator, all[0].locator);
    }
}
