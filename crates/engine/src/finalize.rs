// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Finalization: turn a terminal execution record into the durable,
//! externally-visible result.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ink_core::{Clock, TaskStatus};
use ink_notebook::{execution_hash, Output};
use serde_json::json;
use tracing::{debug, warn};

use crate::assets::{check_asset_limits, ensure_assets_ignored};
use crate::deps::Deps;
use crate::record::ExecutionRecord;
use crate::sanitize::sanitize_outputs;
use crate::session::Session;
use crate::EngineError;

pub(crate) struct Finalizer<C: Clock> {
    deps: Arc<Deps<C>>,
}

impl<C: Clock> Finalizer<C> {
    pub fn new(deps: Arc<Deps<C>>) -> Self {
        Self { deps }
    }

    /// Sanitize outputs, offload assets, and write the notebook atomically.
    ///
    /// Runs strictly after the scheduler committed the task's terminal
    /// status (enforced by the finalization latch in the multiplexer).
    pub async fn finalize(
        &self,
        session: &Arc<Session>,
        record: &Arc<ExecutionRecord>,
    ) -> Result<(), EngineError> {
        let notebook = session.notebook.clone();
        let assets_dir = assets_dir(&notebook);

        let outputs = record.outputs_snapshot();
        let sanitized = match sanitize_outputs(&outputs, &assets_dir) {
            Ok(sanitized) => sanitized,
            Err(e) => {
                warn!(error = %e, "output sanitization failed, keeping raw outputs");
                crate::sanitize::Sanitized { outputs, assets: Vec::new() }
            }
        };

        let now_ms = self.deps.clock.epoch_ms();
        for asset in &sanitized.assets {
            if let Err(e) =
                self.deps.store.renew_lease(asset, &notebook, self.deps.config.lease_ttl, now_ms)
            {
                warn!(asset = %asset.display(), error = %e, "failed to renew asset lease");
            }
        }
        if !sanitized.assets.is_empty() {
            if let Some(dir) = notebook.parent() {
                ensure_assets_ignored(dir);
            }
        }
        check_asset_limits(&assets_dir, self.deps.config.asset_cap_bytes);

        // Internal/maintenance executions are never written back.
        if record.cell_index < 0 {
            return Ok(());
        }

        // With subscribers connected, the streamed state is authoritative;
        // skip the disk write to avoid editor file-watch conflicts. The
        // cell is flushed when the last subscriber disconnects.
        if self.deps.notifier.subscriber_count() > 0 {
            debug!(
                notebook = %notebook.display(),
                cell = record.cell_index,
                "deferring notebook write while subscribers are connected"
            );
            session.dirty_cells.lock().insert(record.cell_index, record.task_id);
            return Ok(());
        }

        let (execution_count, status) = {
            let state = record.state.lock();
            (state.execution_count, state.status)
        };

        self.write_cell(
            session,
            record.task_id,
            record.cell_index,
            &sanitized.outputs,
            execution_count,
            status,
        )
    }

    /// Flush cells whose writes were deferred while subscribers were
    /// connected. Outputs come back out of the durable record.
    pub fn flush_dirty(&self, session: &Arc<Session>) {
        let dirty: Vec<(i32, ink_core::TaskId)> =
            session.dirty_cells.lock().drain().collect();

        for (cell_index, task_id) in dirty {
            let task = match self.deps.store.task(task_id) {
                Ok(Some(task)) => task,
                _ => continue,
            };
            let outputs: Vec<Output> = task
                .outputs
                .and_then(|blob| serde_json::from_value(blob).ok())
                .unwrap_or_default();
            let assets_dir = assets_dir(&session.notebook);
            let sanitized = match sanitize_outputs(&outputs, &assets_dir) {
                Ok(sanitized) => sanitized,
                Err(_) => continue,
            };
            if let Err(e) = self.write_cell(
                session,
                task_id,
                cell_index,
                &sanitized.outputs,
                task.execution_count,
                task.status,
            ) {
                warn!(cell = cell_index, error = %e, "deferred notebook write failed");
            }
        }
    }

    fn write_cell(
        &self,
        session: &Arc<Session>,
        task_id: ink_core::TaskId,
        cell_index: i32,
        outputs: &[Output],
        execution_count: Option<i32>,
        status: TaskStatus,
    ) -> Result<(), EngineError> {
        let notebook = &session.notebook;

        // Hash the cell source as it exists on disk; sync detection
        // compares against this.
        let provenance = match ink_notebook::read(notebook) {
            Ok((nb, _)) => usize::try_from(cell_index)
                .ok()
                .and_then(|i| nb.cells.get(i))
                .map(|cell| {
                    let timestamp = Utc
                        .timestamp_millis_opt(self.deps.clock.epoch_ms() as i64)
                        .single()
                        .unwrap_or_else(Utc::now)
                        .to_rfc3339();
                    json!({
                        "execution_hash": execution_hash(&cell.source.as_string()),
                        "execution_timestamp": timestamp,
                        "env_name": session.env.env_name,
                        "interpreter": session.env.interpreter,
                        "session_uuid": session.env.session_uuid,
                    })
                }),
            Err(e) => {
                warn!(notebook = %notebook.display(), error = %e, "could not read notebook for provenance");
                None
            }
        };

        let result = ink_notebook::save_cell_execution(
            notebook,
            cell_index,
            outputs,
            execution_count,
            provenance,
        );

        if let Err(e) = result {
            warn!(
                notebook = %notebook.display(),
                cell = cell_index,
                status = %status,
                error = %e,
                "notebook write failed"
            );
            if let Err(store_err) = self.deps.store.mark_save_failed(task_id, &e.to_string()) {
                warn!(task = %task_id, error = %store_err, "could not record failed_save");
            }
            return Err(e.into());
        }
        Ok(())
    }
}

fn assets_dir(notebook: &std::path::Path) -> PathBuf {
    notebook.parent().unwrap_or_else(|| std::path::Path::new(".")).join("assets")
}

#[cfg(test)]
#[path = "finalize_tests.rs"]
mod tests;
