// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::SourceText;

/// A cell output in the standard notebook shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    Stream {
        name: String,
        text: SourceText,
    },
    DisplayData {
        #[serde(default)]
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    ExecuteResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_count: Option<i32>,
        #[serde(default)]
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

impl Output {
    pub fn stream(name: &str, text: impl Into<SourceText>) -> Self {
        Output::Stream { name: name.to_string(), text: text.into() }
    }

    pub fn error(ename: &str, evalue: &str, traceback: Vec<String>) -> Self {
        Output::Error {
            ename: ename.to_string(),
            evalue: evalue.to_string(),
            traceback,
        }
    }

    /// The mime bundle, for output kinds that carry one.
    pub fn data(&self) -> Option<&Map<String, Value>> {
        match self {
            Output::DisplayData { data, .. } | Output::ExecuteResult { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn data_mut(&mut self) -> Option<&mut Map<String, Value>> {
        match self {
            Output::DisplayData { data, .. } | Output::ExecuteResult { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn metadata_mut(&mut self) -> Option<&mut Map<String, Value>> {
        match self {
            Output::DisplayData { metadata, .. } | Output::ExecuteResult { metadata, .. } => {
                Some(metadata)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
