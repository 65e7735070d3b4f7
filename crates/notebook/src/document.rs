// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::output::Output;

/// Stable cell-metadata key for the provenance block written by the
/// finalizer: execution hash, timestamp, environment name, interpreter,
/// session UUID.
pub const PROVENANCE_KEY: &str = "inkpot";

/// Notebook source text: on disk either a single string or a list of lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceText {
    Single(String),
    Lines(Vec<String>),
}

impl SourceText {
    pub fn as_string(&self) -> String {
        match self {
            SourceText::Single(s) => s.clone(),
            SourceText::Lines(lines) => lines.concat(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SourceText::Single(s) => s.is_empty(),
            SourceText::Lines(lines) => lines.iter().all(|l| l.is_empty()),
        }
    }
}

impl From<&str> for SourceText {
    fn from(s: &str) -> Self {
        SourceText::Single(s.to_string())
    }
}

impl From<String> for SourceText {
    fn from(s: String) -> Self {
        SourceText::Single(s)
    }
}

impl Default for SourceText {
    fn default() -> Self {
        SourceText::Single(String::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: CellType,
    /// Stable cell id (required from nbformat 4.5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub source: SourceText,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Output>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<i32>,
}

impl Cell {
    pub fn code(source: impl Into<SourceText>) -> Self {
        Self {
            cell_type: CellType::Code,
            id: Some(Uuid::new_v4().to_string()),
            metadata: Value::Object(Default::default()),
            source: source.into(),
            outputs: Vec::new(),
            execution_count: None,
        }
    }

    pub fn markdown(source: impl Into<SourceText>) -> Self {
        Self {
            cell_type: CellType::Markdown,
            id: Some(Uuid::new_v4().to_string()),
            metadata: Value::Object(Default::default()),
            source: source.into(),
            outputs: Vec::new(),
            execution_count: None,
        }
    }

    /// The provenance block previously written by the finalizer, if any.
    pub fn provenance(&self) -> Option<&Value> {
        self.metadata.get(PROVENANCE_KEY)
    }

    /// The stored execution hash from the provenance block.
    pub fn stored_execution_hash(&self) -> Option<&str> {
        self.provenance()?.get("execution_hash")?.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub nbformat: u32,
    pub nbformat_minor: u32,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl Notebook {
    /// An empty Python notebook at nbformat 4.5.
    pub fn empty() -> Self {
        Self {
            nbformat: 4,
            nbformat_minor: 5,
            metadata: serde_json::json!({
                "kernelspec": {
                    "name": "python3",
                    "display_name": "Python 3",
                    "language": "python",
                },
                "language_info": { "name": "python" },
            }),
            cells: Vec::new(),
        }
    }

    /// Convenience for tests and fixtures: one code cell per source string.
    pub fn with_code_cells<S: AsRef<str>>(sources: &[S]) -> Self {
        let mut nb = Self::empty();
        nb.cells = sources.iter().map(|s| Cell::code(s.as_ref())).collect();
        nb
    }

    /// Assign fresh ids to cells lacking them and lift the document to
    /// nbformat 4.5. Returns true if anything changed.
    pub fn ensure_cell_ids(&mut self) -> bool {
        let mut changed = false;
        for cell in &mut self.cells {
            if cell.id.as_deref().is_none_or(str::is_empty) {
                cell.id = Some(Uuid::new_v4().to_string());
                changed = true;
            }
        }
        if self.nbformat == 4 && self.nbformat_minor < 5 {
            self.nbformat_minor = 5;
            changed = true;
        }
        changed
    }

    /// Indices and sources of code cells, in document order.
    pub fn code_cells(&self) -> impl Iterator<Item = (usize, &Cell)> {
        self.cells.iter().enumerate().filter(|(_, c)| c.cell_type == CellType::Code)
    }
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;
