//! Decomposition strategies and the question classifier
//!
//! The five strategies form a closed enum; each variant carries its prompt
//! guidance so that decomposer and validator branches stay exhaustive.
//! Classification is keyword-heuristic first, oracle-assisted second, and
//! never fails: an unrecognized label falls back to `Independent`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::oracle::Oracle;

/// Aggregate verbs and amounts ("average", "how many", ...)
const AGGREGATION_KEYWORDS: &[&str] = &[
    "average",
    "mean",
    "total",
    "sum",
    "count",
    "maximum",
    "minimum",
    "max",
    "min",
    "aggregate",
    "total number",
    "how many",
];

/// Comparative markers ("which", "higher", "versus", ...)
const COMPARISON_KEYWORDS: &[&str] = &[
    "compare",
    "which",
    "better",
    "higher",
    "lower",
    "greater",
    "less",
    "more than",
    "less than",
    "versus",
    "vs",
    "between",
];

/// Filter/condition markers that gate a later lookup
const BRIDGE_KEYWORDS: &[&str] = &[
    "with",
    "where",
    "that",
    "which have",
    "whose",
    "for",
    "of",
    "containing",
    "including",
    "filtered by",
];

/// Date/order markers
const SEQUENTIAL_KEYWORDS: &[&str] = &[
    "trend",
    "over time",
    "from",
    "to",
    "between",
    "during",
    "sequence",
    "order",
    "chronological",
];

/// Parallel-listing markers
const INDEPENDENT_KEYWORDS: &[&str] = &[
    "list",
    "top",
    "bottom",
    "all",
    "each",
    "separate",
    "individually",
    "respectively",
];

/// The decomposition pattern chosen for a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Aggregation,
    Comparison,
    Bridge,
    Sequential,
    Independent,
}

impl Strategy {
    /// All strategies in tie-break precedence order
    pub const ALL: [Strategy; 5] = [
        Strategy::Aggregation,
        Strategy::Comparison,
        Strategy::Bridge,
        Strategy::Sequential,
        Strategy::Independent,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Strategy::Aggregation => "aggregation",
            Strategy::Comparison => "comparison",
            Strategy::Bridge => "bridge",
            Strategy::Sequential => "sequential",
            Strategy::Independent => "independent",
        }
    }

    /// Parse a free-text label; anything unrecognized is `None`
    pub fn from_label(label: &str) -> Option<Strategy> {
        match label.trim().to_lowercase().as_str() {
            "aggregation" => Some(Strategy::Aggregation),
            "comparison" => Some(Strategy::Comparison),
            "bridge" => Some(Strategy::Bridge),
            "sequential" => Some(Strategy::Sequential),
            "independent" => Some(Strategy::Independent),
            _ => None,
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Strategy::Aggregation => AGGREGATION_KEYWORDS,
            Strategy::Comparison => COMPARISON_KEYWORDS,
            Strategy::Bridge => BRIDGE_KEYWORDS,
            Strategy::Sequential => SEQUENTIAL_KEYWORDS,
            Strategy::Independent => INDEPENDENT_KEYWORDS,
        }
    }

    /// Strategy-specific decomposition guidance fed to the oracle
    pub fn guidance(&self) -> &'static str {
        match self {
            Strategy::Aggregation => {
                "For aggregation questions:\n\
                 1. Identify the numeric column(s) to aggregate.\n\
                 2. Split complex aggregations into simple extraction steps.\n\
                 3. Each extraction subtask handles exactly one column.\n\
                 4. The final subtask performs the aggregate computation and \
                 depends on every extraction subtask.\n\
                 Example: \"What is the average number of cyclones per season?\" \
                 -> extract the cyclone column, then compute its average."
            }
            Strategy::Comparison => {
                "For comparison questions:\n\
                 1. Identify the two or more entities being compared.\n\
                 2. Create one independent subtask per entity computing its metric.\n\
                 3. The final compare subtask depends on all entity subtasks.\n\
                 Example: \"Which country has higher GDP, China or USA?\" \
                 -> compute China's GDP, compute USA's GDP, then compare."
            }
            Strategy::Bridge => {
                "For bridge questions:\n\
                 1. Identify the intermediate step whose output gates the next lookup.\n\
                 2. Chain subtasks so each one's output feeds the next.\n\
                 3. Keep the dependency chain complete: every later step depends \
                 on the one before it.\n\
                 Example: \"What is the total revenue of companies with profit > 1000?\" \
                 -> filter companies by profit, then total their revenue."
            }
            Strategy::Sequential => {
                "For sequential questions:\n\
                 1. Identify the time series or logical order in the question.\n\
                 2. Create subtasks in that order; later steps may depend on any \
                 earlier step.\n\
                 Example: \"What was the trend of sales from 2020 to 2023?\" \
                 -> extract each year's sales, then analyze the trend."
            }
            Strategy::Independent => {
                "For independent questions:\n\
                 1. Identify subtasks that can run in parallel with no dependencies.\n\
                 2. Each subtask stands alone; maximize parallelism.\n\
                 3. Add one final aggregate subtask that collects every result.\n\
                 Example: \"What are the top 3 countries by population and GDP?\" \
                 -> rank by population, rank by GDP, then merge both lists."
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Keyword-heuristic classification
///
/// Scores each strategy by the number of keyword hits; ties go to the earlier
/// strategy in [`Strategy::ALL`]. Returns `None` when nothing matches, which
/// is the signal to fall back to the oracle.
pub fn classify_heuristic(question: &str) -> Option<Strategy> {
    let question_lower = question.to_lowercase();

    let mut best: Option<(Strategy, usize)> = None;
    for strategy in Strategy::ALL {
        let score = strategy
            .keywords()
            .iter()
            .filter(|kw| question_lower.contains(*kw))
            .count();
        if score > 0 && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((strategy, score));
        }
    }

    best.map(|(strategy, score)| {
        debug!(%strategy, score, "Heuristic classification");
        strategy
    })
}

/// Classify a question, consulting the oracle when heuristics are inconclusive
///
/// This step is fail-soft: oracle errors and unrecognized labels both resolve
/// to [`Strategy::Independent`].
pub async fn classify(question: &str, oracle: &dyn Oracle) -> Strategy {
    if let Some(strategy) = classify_heuristic(question) {
        return strategy;
    }

    let prompt = format!(
        "Classify the following table question into exactly one category: \
         aggregation, comparison, bridge, sequential, or independent.\n\
         Reply with the category name only.\n\n\
         Question: {}",
        question
    );

    match oracle.infer(&prompt).await {
        Ok(response) => {
            let response_lower = response.to_lowercase();
            let matched = Strategy::ALL
                .into_iter()
                .find(|s| response_lower.contains(s.label()));
            match matched {
                Some(strategy) => {
                    debug!(%strategy, "Oracle-assisted classification");
                    strategy
                }
                None => {
                    warn!(response = %response.trim(), "Unrecognized strategy label, defaulting");
                    Strategy::Independent
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "Oracle classification failed, defaulting");
            Strategy::Independent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::MockOracle;

    #[test]
    fn aggregate_verbs_classify_as_aggregation() {
        assert_eq!(
            classify_heuristic("What is the average number of cyclones per season?"),
            Some(Strategy::Aggregation)
        );
    }

    #[test]
    fn comparative_markers_classify_as_comparison() {
        assert_eq!(
            classify_heuristic("Which team scored higher, A or B?"),
            Some(Strategy::Comparison)
        );
    }

    #[test]
    fn trend_questions_classify_as_sequential() {
        // "trend" + "over time" score two sequential hits, beating everything
        assert_eq!(
            classify_heuristic("Show the trend over time"),
            Some(Strategy::Sequential)
        );
    }

    #[test]
    fn no_keywords_is_inconclusive() {
        assert_eq!(classify_heuristic("Pelican?"), None);
    }

    #[test]
    fn heuristic_is_deterministic() {
        let q = "Which country has the higher total GDP, China or USA?";
        let first = classify_heuristic(q);
        for _ in 0..10 {
            assert_eq!(classify_heuristic(q), first);
        }
    }

    #[tokio::test]
    async fn oracle_fallback_maps_label() {
        let oracle = MockOracle::with_responses(vec!["The category is: bridge".into()]);
        assert_eq!(classify("Pelican?", &oracle).await, Strategy::Bridge);
    }

    #[tokio::test]
    async fn unrecognized_label_defaults_to_independent() {
        let oracle = MockOracle::with_responses(vec!["no idea".into()]);
        assert_eq!(classify("Pelican?", &oracle).await, Strategy::Independent);
    }

    #[tokio::test]
    async fn oracle_error_defaults_to_independent() {
        let oracle = MockOracle::new();
        oracle.queue_failure("down");
        assert_eq!(classify("Pelican?", &oracle).await, Strategy::Independent);
    }

    #[test]
    fn label_round_trip() {
        for strategy in Strategy::ALL {
            assert_eq!(Strategy::from_label(strategy.label()), Some(strategy));
        }
        assert_eq!(Strategy::from_label("nonsense"), None);
    }
}
