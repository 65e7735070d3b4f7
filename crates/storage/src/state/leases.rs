// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event handlers for asset leases.

use ink_core::{AssetLease, Event};

use super::MaterializedState;

pub(super) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::LeaseRenewed { asset, notebook, last_seen_ms, lease_expires_ms } => {
            // Upsert: renewal extends expiry without touching created_at.
            let created_at_ms = state
                .leases
                .get(asset)
                .map(|l| l.created_at_ms)
                .unwrap_or(*last_seen_ms);
            state.leases.insert(
                asset.clone(),
                AssetLease {
                    asset_path: asset.clone(),
                    notebook: notebook.clone(),
                    last_seen_ms: *last_seen_ms,
                    lease_expires_ms: *lease_expires_ms,
                    created_at_ms,
                },
            );
        }

        Event::LeaseDropped { asset } => {
            state.leases.remove(asset);
        }

        _ => {}
    }
}
