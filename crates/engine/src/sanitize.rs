// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output sanitization: binary asset offload, large-text offload, secret
//! redaction, traceback compression, HTML table conversion.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use ink_notebook::{Output, SourceText};
use regex::Regex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing::warn;

/// Inline limits before a text payload is offloaded to an asset file.
pub const MAX_INLINE_CHARS: usize = 2000;
pub const MAX_INLINE_LINES: usize = 50;

/// Preview bounds for offloaded text.
const MAX_PREVIEW_CHARS: usize = 1000;

/// HTML tables at or under this many rows are converted to Markdown;
/// larger ones are flagged for out-of-band inspection.
const MAX_TABLE_ROWS: usize = 20;

/// Binary mime types we offload, highest priority first.
const ASSET_PRIORITY: &[(&str, &str, bool)] = &[
    ("application/pdf", "pdf", true),
    ("image/svg+xml", "svg", false),
    ("image/png", "png", true),
    ("image/jpeg", "jpeg", true),
];

/// Result of sanitizing one task's outputs.
pub struct Sanitized {
    pub outputs: Vec<Output>,
    /// Asset files written during sanitization (need lease renewal).
    pub assets: Vec<PathBuf>,
}

/// Sanitize outputs for durable storage, writing offloaded payloads under
/// `assets_dir`.
pub fn sanitize_outputs(outputs: &[Output], assets_dir: &Path) -> std::io::Result<Sanitized> {
    std::fs::create_dir_all(assets_dir)?;

    let mut sanitized = Vec::with_capacity(outputs.len());
    let mut assets = Vec::new();

    for output in outputs {
        match output.clone() {
            Output::Stream { name, text } => {
                let text = crate::secrets::redact(&text.as_string());
                let text = offload_text(&text, assets_dir, &mut assets)?;
                sanitized.push(Output::Stream { name, text: SourceText::Single(text) });
            }
            Output::Error { ename, evalue, traceback } => {
                let traceback = compress_traceback(&traceback);
                let evalue = crate::secrets::redact(&evalue);
                sanitized.push(Output::Error { ename, evalue, traceback });
            }
            mut rich @ (Output::DisplayData { .. } | Output::ExecuteResult { .. }) => {
                offload_binary(&mut rich, assets_dir, &mut assets)?;
                sanitize_text_plain(&mut rich, assets_dir, &mut assets)?;
                convert_html_tables(&mut rich);
                sanitized.push(rich);
            }
        }
    }

    Ok(Sanitized { outputs: sanitized, assets })
}

/// Replace the highest-priority binary payload with a typed asset reference
/// and drop every other offloadable mime from the bundle.
fn offload_binary(
    output: &mut Output,
    assets_dir: &Path,
    assets: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    let Some(data) = output.data() else { return Ok(()) };

    let winner = ASSET_PRIORITY.iter().find(|(mime, _, _)| data.contains_key(*mime));
    let Some((mime, ext, is_binary)) = winner.copied() else {
        return Ok(());
    };

    let payload = data.get(mime).cloned().unwrap_or(Value::Null);
    let raw: Vec<u8> = if is_binary {
        let encoded = payload.as_str().unwrap_or_default().replace(['\n', '\r'], "");
        match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(mime, error = %e, "undecodable inline payload, leaving in place");
                return Ok(());
            }
        }
    } else {
        match payload {
            Value::String(s) => s.into_bytes(),
            // SVG sometimes arrives as a list of lines
            Value::Array(lines) => lines
                .iter()
                .filter_map(|l| l.as_str())
                .collect::<String>()
                .into_bytes(),
            _ => return Ok(()),
        }
    };

    let digest = hex::encode(Sha256::digest(&raw));
    let filename = format!("plot_{}.{ext}", &digest[..16]);
    let path = assets_dir.join(&filename);
    std::fs::write(&path, &raw)?;
    assets.push(path.clone());

    if let Some(data) = output.data_mut() {
        for (m, _, _) in ASSET_PRIORITY {
            data.remove(*m);
        }
        data.insert(
            "text/plain".to_string(),
            json!(format!("[{mime} offloaded to {filename}]")),
        );
    }
    if let Some(metadata) = output.metadata_mut() {
        metadata.insert(
            "asset".to_string(),
            json!({
                "path": path,
                "media_type": mime,
                "alt": format!("{mime} output"),
            }),
        );
    }
    Ok(())
}

/// Offload an over-limit `text/plain` payload in a rich output.
fn sanitize_text_plain(
    output: &mut Output,
    assets_dir: &Path,
    assets: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    let Some(data) = output.data_mut() else { return Ok(()) };
    let Some(text) = data.get("text/plain").and_then(text_value) else {
        return Ok(());
    };

    let redacted = crate::secrets::redact(&text);
    let (stub, asset) = offload_if_large(&redacted, assets_dir)?;
    data.insert("text/plain".to_string(), json!(stub));

    if let Some((path, size_bytes, line_count)) = asset {
        assets.push(path.clone());
        if let Some(metadata) = output.metadata_mut() {
            metadata.insert(
                "asset".to_string(),
                json!({ "path": path, "size_bytes": size_bytes, "line_count": line_count }),
            );
        }
    }
    Ok(())
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(lines) => {
            Some(lines.iter().filter_map(|l| l.as_str()).collect::<String>())
        }
        _ => None,
    }
}

/// Offload stream text when it exceeds the inline limits; the stub keeps a
/// head/tail preview plus a pointer at the asset file.
fn offload_text(
    text: &str,
    assets_dir: &Path,
    assets: &mut Vec<PathBuf>,
) -> std::io::Result<String> {
    let (stub, asset) = offload_if_large(text, assets_dir)?;
    if let Some((path, _, _)) = asset {
        assets.push(path);
    }
    Ok(stub)
}

/// Returns the inline text (possibly a preview stub) and, when offloaded,
/// the asset path with size and line count.
fn offload_if_large(
    text: &str,
    assets_dir: &Path,
) -> std::io::Result<(String, Option<(PathBuf, usize, usize)>)> {
    let line_count = text.split('\n').count();
    if text.len() <= MAX_INLINE_CHARS && line_count <= MAX_INLINE_LINES {
        return Ok((text.to_string(), None));
    }

    let digest = hex::encode(Sha256::digest(text.as_bytes()));
    let filename = format!("text_{}.txt", &digest[..32]);
    let path = assets_dir.join(&filename);
    std::fs::write(&path, text.as_bytes())?;

    let size_kb = text.len() as f64 / 1024.0;
    let stub = format!(
        "{}\n\n>>> FULL OUTPUT ({size_kb:.1}KB, {line_count} lines) SAVED TO: {filename} <<<",
        make_preview(text, MAX_INLINE_LINES)
    );

    Ok((stub, Some((path, text.len(), line_count))))
}

/// First/last lines of `text`, with an elision marker in the middle.
fn make_preview(text: &str, max_lines: usize) -> String {
    // A single enormous line gets truncated by characters instead.
    if text.len() > MAX_PREVIEW_CHARS * 2 && text.split('\n').count() <= 2 {
        let head: String = text.chars().take(MAX_PREVIEW_CHARS).collect();
        let tail_start = text.chars().count().saturating_sub(MAX_PREVIEW_CHARS);
        let tail: String = text.chars().skip(tail_start).collect();
        return format!("{head}\n... [long line truncated] ...\n{tail}");
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let keep = max_lines / 2;
    if lines.len() <= max_lines {
        return text.to_string();
    }
    let head = lines[..keep].join("\n");
    let tail = lines[lines.len() - keep..].join("\n");
    format!("{head}\n... [{} lines omitted] ...\n{tail}", lines.len() - max_lines)
}

/// Elide library-internal frames from a traceback, keeping the header, user
/// frames, and the final error line.
pub fn compress_traceback(traceback: &[String]) -> Vec<String> {
    if traceback.is_empty() {
        return Vec::new();
    }

    const LIBRARY_MARKERS: &[&str] =
        &["site-packages", "dist-packages", "lib/python", "<frozen", "importlib"];

    let mut compressed = vec![traceback[0].clone()];
    let mut inside_library_block = false;
    let mut skip_next_code_line = false;

    for line in &traceback[1..] {
        let stripped = line.trim_start();
        let is_file_line = stripped.starts_with("File ");
        let is_library = LIBRARY_MARKERS.iter().any(|marker| line.contains(marker));

        if is_file_line {
            if is_library {
                if !inside_library_block {
                    compressed.push("  ... [internal library frames] ...".to_string());
                    inside_library_block = true;
                }
                skip_next_code_line = true;
            } else {
                inside_library_block = false;
                skip_next_code_line = false;
                compressed.push(line.clone());
            }
        } else if skip_next_code_line && line.starts_with("    ") {
            skip_next_code_line = false;
        } else {
            inside_library_block = false;
            skip_next_code_line = false;
            compressed.push(line.clone());
        }
    }

    compressed
}

fn table_regexes() -> Option<(&'static Regex, &'static Regex, &'static Regex)> {
    static ROW: OnceLock<Option<Regex>> = OnceLock::new();
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    let row = ROW.get_or_init(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").ok()).as_ref()?;
    let cell = CELL.get_or_init(|| Regex::new(r"(?is)<t[hd][^>]*>(.*?)</t[hd]>").ok()).as_ref()?;
    let tag = TAG.get_or_init(|| Regex::new(r"(?s)<[^>]+>").ok()).as_ref()?;
    Some((row, cell, tag))
}

/// Convert small HTML tables to Markdown; flag big ones in metadata.
fn convert_html_tables(output: &mut Output) {
    let Some(data) = output.data() else { return };
    let Some(html) = data.get("text/html").and_then(text_value) else {
        return;
    };
    if !html.to_lowercase().contains("<table") {
        return;
    }

    let Some((row_re, cell_re, tag_re)) = table_regexes() else {
        return;
    };
    let rows: Vec<Vec<String>> = row_re
        .captures_iter(&html)
        .map(|row| {
            cell_re
                .captures_iter(&row[1])
                .map(|cell| tag_re.replace_all(cell[1].trim(), "").trim().to_string())
                .collect()
        })
        .collect();

    if rows.is_empty() {
        return;
    }

    if rows.len() > MAX_TABLE_ROWS {
        if let Some(metadata) = output.metadata_mut() {
            metadata.insert("large_table".to_string(), json!({ "rows": rows.len() }));
        }
        return;
    }

    let mut markdown = String::new();
    for (i, row) in rows.iter().enumerate() {
        markdown.push_str("| ");
        markdown.push_str(&row.join(" | "));
        markdown.push_str(" |\n");
        if i == 0 {
            markdown.push_str("| ");
            markdown.push_str(&vec!["---"; row.len()].join(" | "));
            markdown.push_str(" |\n");
        }
    }

    if let Some(data) = output.data_mut() {
        data.remove("text/html");
        data.insert("text/markdown".to_string(), json!(markdown));
    }
}

#[cfg(test)]
#[path = "sanitize_tests.rs"]
mod tests;
