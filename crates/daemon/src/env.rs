// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.
//!
//! Leaf components never read the environment; everything funnels through
//! here into [`ink_engine::EngineConfig`] and the daemon settings.

use std::path::PathBuf;
use std::time::Duration;

use ink_engine::EngineConfig;

/// Resolve the data directory:
/// `DATA_DIR` > `$XDG_STATE_HOME/inkpot` > `~/.local/state/inkpot`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("inkpot");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local/state/inkpot")
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_u64(name).map(Duration::from_secs)
}

/// Engine configuration from the recognized environment variables.
pub fn engine_config(data_dir: PathBuf) -> EngineConfig {
    let defaults = EngineConfig::default();
    EngineConfig {
        data_dir,
        max_kernels: env_u64("MAX_CONCURRENT_KERNELS")
            .map(|n| n as usize)
            .unwrap_or(defaults.max_kernels),
        execution_timeout: env_secs("EXECUTION_TIMEOUT_SECONDS")
            .unwrap_or(defaults.execution_timeout),
        input_timeout: env_secs("INPUT_REQUEST_TIMEOUT_SECONDS")
            .unwrap_or(defaults.input_timeout),
        health_interval: env_secs("HEALTH_CHECK_INTERVAL_SECONDS")
            .unwrap_or(defaults.health_interval),
        asset_cap_bytes: env_u64("ASSET_STORAGE_CAP_BYTES").unwrap_or(defaults.asset_cap_bytes),
        lease_ttl: env_u64("ASSET_LEASE_TTL_HOURS")
            .map(|h| Duration::from_secs(h * 3600))
            .unwrap_or(defaults.lease_ttl),
        orphan_max: env_u64("ORPHAN_BUFFER_MAX")
            .map(|n| n as usize)
            .unwrap_or(defaults.orphan_max),
        ..defaults
    }
}

/// Bearer token required on WebSocket connections, when configured.
pub fn session_token() -> Option<String> {
    std::env::var("SESSION_TOKEN").ok().filter(|s| !s.is_empty())
}

/// Auto-exit after this long with no connected clients (WebSocket mode).
pub fn idle_timeout() -> Option<Duration> {
    env_secs("IDLE_TIMEOUT_SECONDS")
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
