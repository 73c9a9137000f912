//! Tabular input model
//!
//! A `Table` is an ordered header plus ordered rows of cells. The engine only
//! reads it; ownership stays with the caller. `CellRef` is the locator used by
//! retrieval evidence.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::TabQaError;

/// Number of rows rendered into prompts before eliding the rest
const PROMPT_ROW_LIMIT: usize = 10;

/// A natural-language question over one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A single cell value (text or number)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

impl From<i64> for Cell {
    fn from(n: i64) -> Self {
        Cell::Number(n as f64)
    }
}

/// Locator for a cell inside a table (evidence deduplication key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row_{}_col_{}", self.row, self.col)
    }
}

/// An in-memory table: unique ordered columns plus aligned rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Build a table, rejecting duplicate columns and ragged rows
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self, TabQaError> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(columns.len());
        for col in &columns {
            if !seen.insert(col.as_str()) {
                return Err(TabQaError::Table(format!(
                    "duplicate column name: '{}'",
                    col
                )));
            }
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(TabQaError::Table(format!(
                    "row {} has {} cells, expected {}",
                    i,
                    row.len(),
                    columns.len()
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[inline]
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Cell at a locator, if in bounds
    pub fn cell(&self, locator: CellRef) -> Option<&Cell> {
        self.rows.get(locator.row)?.get(locator.col)
    }

    /// Column name for a locator's column, if in bounds
    pub fn column_name(&self, col: usize) -> Option<&str> {
        self.columns.get(col).map(|s| s.as_str())
    }

    /// Render the table for inclusion in a prompt
    ///
    /// Pipe-joined header, a dash rule, and at most the first ten rows with an
    /// elision marker for the remainder.
    pub fn to_prompt_block(&self) -> String {
        if self.columns.is_empty() {
            return "(empty table)".to_string();
        }

        let mut out = self.columns.join(" | ");
        out.push('\n');
        out.push_str(
            &self
                .columns
                .iter()
                .map(|c| "-".repeat(c.len().max(1)))
                .collect::<Vec<_>>()
                .join(" | "),
        );
        out.push('\n');

        for row in self.rows.iter().take(PROMPT_ROW_LIMIT) {
            let line = row
                .iter()
                .map(|cell| cell.to_string())
                .collect::<Vec<_>>()
                .join(" | ");
            out.push_str(&line);
            out.push('\n');
        }

        if self.rows.len() > PROMPT_ROW_LIMIT {
            out.push_str(&format!(
                "... ({} more rows)\n",
                self.rows.len() - PROMPT_ROW_LIMIT
            ));
        }

        out
    }
}
