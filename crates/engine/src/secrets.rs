// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secret redaction: fixed credential patterns plus Shannon-entropy
//! detection over candidate substrings.

use std::sync::OnceLock;

use regex::Regex;

/// Minimum candidate length for entropy analysis; shorter strings produce
/// too many false positives.
const MIN_CANDIDATE_LEN: usize = 20;

/// Entropy thresholds in bits per character, calibrated against randomly
/// generated keys: random hex sits near 3.8-4.0, base64/alphanumeric near
/// 4.2-5.0.
const HEX_THRESHOLD: f64 = 3.7;
const BASE64_THRESHOLD: f64 = 4.2;

struct Pattern {
    regex: Regex,
    kind: &'static str,
}

fn known_patterns() -> &'static Vec<Pattern> {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: &[(&str, &str)] = &[
            (r"sk-proj-[a-zA-Z0-9_-]{20,}", "openai_project_key"),
            (r"sk-[a-zA-Z0-9]{20,}", "openai_api_key"),
            (r"AKIA[0-9A-Z]{16}", "aws_access_key"),
            (
                r"(?:aws_secret_access_key|AWS_SECRET_ACCESS_KEY)\s*[:=]\s*[A-Za-z0-9/+=]{40}",
                "aws_secret_key",
            ),
            (r"AIza[0-9A-Za-z_-]{35}", "google_api_key"),
            (r"ghp_[0-9a-zA-Z]{36}", "github_pat"),
            (r"gho_[0-9a-zA-Z]{36}", "github_oauth"),
            (r"ghs_[0-9a-zA-Z]{36}", "github_server_token"),
            (r"sk_live_[0-9a-zA-Z]{24,}", "stripe_live_key"),
            (r"sk_test_[0-9a-zA-Z]{24,}", "stripe_test_key"),
            (r"xoxb-[0-9]{11}-[0-9]{11}-[0-9a-zA-Z]{24}", "slack_bot_token"),
            (r"xoxp-[0-9]{11}-[0-9]{11}-[0-9]{11}-[0-9a-zA-Z]{32}", "slack_user_token"),
            (r"\bSK[0-9a-fA-F]{32}\b", "twilio_api_key"),
        ];
        table
            .iter()
            .filter_map(|(pattern, kind)| {
                Regex::new(pattern).ok().map(|regex| Pattern { regex, kind })
            })
            .collect()
    })
}

fn candidate_regexes() -> &'static Vec<Regex> {
    static CANDIDATES: OnceLock<Vec<Regex>> = OnceLock::new();
    CANDIDATES.get_or_init(|| {
        [
            // Long token-shaped runs
            r"\b[a-zA-Z0-9_-]{20,}\b",
            // Base64-looking runs
            r"[A-Za-z0-9+/]{20,}={0,2}",
            // Long hex runs
            r"\b[a-fA-F0-9]{32,}\b",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Shannon entropy in bits per character.
pub fn shannon_entropy(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let mut counts: std::collections::HashMap<char, usize> = std::collections::HashMap::new();
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }
    let len = text.chars().count() as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn looks_hex(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_high_entropy(candidate: &str) -> bool {
    if candidate.len() < MIN_CANDIDATE_LEN {
        return false;
    }
    let entropy = shannon_entropy(candidate);
    if looks_hex(candidate) {
        entropy >= HEX_THRESHOLD
    } else {
        entropy >= BASE64_THRESHOLD
    }
}

/// Redact well-known credential shapes and high-entropy candidate strings.
pub fn redact(text: &str) -> String {
    let mut redacted = text.to_string();

    for pattern in known_patterns() {
        redacted = pattern
            .regex
            .replace_all(&redacted, format!("[REDACTED:{}]", pattern.kind))
            .into_owned();
    }

    // Entropy pass over what the fixed patterns did not claim.
    for regex in candidate_regexes() {
        let mut out = String::with_capacity(redacted.len());
        let mut cursor = 0;
        for found in regex.find_iter(&redacted) {
            out.push_str(&redacted[cursor..found.start()]);
            let candidate = found.as_str();
            if !candidate.contains("REDACTED") && is_high_entropy(candidate) {
                out.push_str("[REDACTED:high_entropy]");
            } else {
                out.push_str(candidate);
            }
            cursor = found.end();
        }
        out.push_str(&redacted[cursor..]);
        redacted = out;
    }

    redacted
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
