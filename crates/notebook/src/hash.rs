// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use sha2::{Digest, Sha256};

/// SHA-256 of cell source with ALL whitespace removed.
///
/// Formatting-only edits (reformatters, indentation, trailing newlines) must
/// not read as content drift; any non-whitespace edit must.
pub fn execution_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    for chunk in source.split_whitespace() {
        hasher.update(chunk.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[path = "hash_tests.rs"]
mod tests;
