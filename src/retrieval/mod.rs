//! # Retrieval Tools
//!
//! Pluggable search backends over a table. Each tool is a pure function
//! `query x table -> ranked evidence` registered under a string identifier;
//! the fusion engine only requires that at least one tool is registered.
//!
//! - [`KeywordTool`] - sparse keyword match (stop-word filtered)
//! - [`OverlapTool`] - token-overlap similarity, the dense-signal stand-in
//!   used when no embedding backend is wired in
//!
//! The registry is built once at startup and is read-only during runs, so
//! concurrent question-runs never coordinate around it.

mod keyword;
mod overlap;

pub use keyword::KeywordTool;
pub use overlap::OverlapTool;

use anyhow::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::table::{CellRef, Table};

/// Which fusion weight a tool's scores receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Sparse,
    Dense,
}

/// A scored, located piece of retrieved content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub source_tool: String,
    pub score: f64,
    pub content: String,
    pub locator: CellRef,
}

/// A search backend over one table
pub trait RetrievalTool: Send + Sync {
    /// Registry identifier (e.g. "keyword", "overlap")
    fn name(&self) -> &str;

    /// Sparse or dense, for fusion weighting
    fn kind(&self) -> ToolKind;

    /// Return up to `top_k` evidence items, best first, tool-local scores
    fn search(&self, query: &str, table: &Table, top_k: usize) -> Result<Vec<Evidence>>;
}

/// Registry mapping tool identifier to implementation
///
/// Registration happens once at startup, before any run begins; runs only
/// read from it.
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn RetrievalTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
        }
    }

    /// Registry preloaded with the built-in keyword and overlap tools
    pub fn with_default_tools() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(KeywordTool::new()));
        registry.register(Arc::new(OverlapTool::new()));
        registry
    }

    /// Register a tool under its own name (replaces any previous entry)
    pub fn register(&self, tool: Arc<dyn RetrievalTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RetrievalTool>> {
        self.tools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names (unordered)
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
