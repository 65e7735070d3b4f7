// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Asset offload scenarios: large text paging, binary image extraction,
//! lease-gated garbage collection.

use super::prelude::*;
use base64::Engine as _;
use ink_core::TaskStatus;
use ink_kernel::{FakeTransport, MessageType};
use ink_notebook::Output;
use serde_json::json;

#[tokio::test]
async fn huge_print_output_is_paged_to_a_text_asset() {
    let world = World::new();
    let server = world.boot_manual();
    let nb = world.notebook("nb.ipynb", &["big"]);

    server.manager.start_session(&nb, Default::default()).await.unwrap();

    // ~5 MB of output, emitted by hand through the fake kernel
    let transport = server.launcher.transport_for(&nb).unwrap();
    let id = server.manager.submit(&nb, 0, "generate_big()", None, None).await.unwrap();

    // Wait for the execute_request so we can answer under its parent id
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    let parent = loop {
        if let Some(msg) = transport
            .sent_shell()
            .iter()
            .find(|m| matches!(m.msg_type(), MessageType::ExecuteRequest))
        {
            break msg.header.clone();
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    };

    let big: String = "0123456789abcdef".repeat(5 * 1024 * 1024 / 16);
    transport.push_iopub(FakeTransport::iopub_message(
        &parent,
        MessageType::Stream,
        json!({ "name": "stdout", "text": big }),
    ));
    transport.push_iopub(FakeTransport::iopub_message(
        &parent,
        MessageType::Status,
        json!({ "execution_state": "idle" }),
    ));

    assert_eq!(wait_terminal(&server.store, id).await, TaskStatus::Completed);

    let nb_doc = wait_notebook(&nb, |doc| !doc.cells[0].outputs.is_empty()).await;
    let stub = match &nb_doc.cells[0].outputs[0] {
        Output::Stream { text, .. } => text.as_string(),
        other => panic!("wrong output: {other:?}"),
    };
    assert!(stub.contains("SAVED TO: text_"), "cell keeps a preview + reference");
    assert!(stub.len() < 100_000);

    // The asset file holds the full payload
    let assets_dir = nb.parent().unwrap().join("assets");
    let asset = std::fs::read_dir(&assets_dir)
        .unwrap()
        .filter_map(Result::ok)
        .find(|e| e.file_name().to_string_lossy().starts_with("text_"))
        .expect("text asset written");
    assert_eq!(asset.metadata().unwrap().len(), 5 * 1024 * 1024);
}

#[tokio::test]
async fn png_display_data_is_offloaded_content_addressed() {
    let world = World::new();
    let server = world.boot_manual();
    let nb = world.notebook("nb.ipynb", &["plot"]);

    server.manager.start_session(&nb, Default::default()).await.unwrap();
    let transport = server.launcher.transport_for(&nb).unwrap();

    let id = server.manager.submit(&nb, 0, "plt.plot(x)", None, None).await.unwrap();

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    let parent = loop {
        if let Some(msg) = transport
            .sent_shell()
            .iter()
            .find(|m| matches!(m.msg_type(), MessageType::ExecuteRequest))
        {
            break msg.header.clone();
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    };

    let png = b"\x89PNG\r\n\x1a\n-not-really-a-plot";
    let encoded = base64::engine::general_purpose::STANDARD.encode(png);
    transport.push_iopub(FakeTransport::iopub_message(
        &parent,
        MessageType::DisplayData,
        json!({ "data": { "image/png": encoded, "text/plain": "<Figure>" }, "metadata": {} }),
    ));
    transport.push_iopub(FakeTransport::iopub_message(
        &parent,
        MessageType::Status,
        json!({ "execution_state": "idle" }),
    ));

    assert_eq!(wait_terminal(&server.store, id).await, TaskStatus::Completed);

    let nb_doc = wait_notebook(&nb, |doc| !doc.cells[0].outputs.is_empty()).await;
    let value = serde_json::to_value(&nb_doc.cells[0].outputs[0]).unwrap();

    // Inline base64 removed; typed reference in its place
    assert!(value["data"].get("image/png").is_none());
    assert_eq!(value["metadata"]["asset"]["media_type"], "image/png");

    // Content-addressed filename, file exists with the decoded bytes
    use sha2::Digest;
    let digest = hex_of(sha2::Sha256::digest(png).as_slice());
    let asset_path = std::path::PathBuf::from(
        value["metadata"]["asset"]["path"].as_str().unwrap(),
    );
    assert!(asset_path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .contains(&digest[..16]));
    assert_eq!(std::fs::read(&asset_path).unwrap(), png);
}

fn hex_of(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[tokio::test]
async fn asset_gc_respects_leases_and_references() {
    let world = World::new();
    let server = world.boot();
    let nb = world.notebook("nb.ipynb", &["x"]);

    server.manager.start_session(&nb, Default::default()).await.unwrap();

    // Two assets on disk with expired leases; the notebook references one
    let assets_dir = nb.parent().unwrap().join("assets");
    std::fs::create_dir_all(&assets_dir).unwrap();
    let kept = assets_dir.join("plot_keptkeptkept.png");
    let doomed = assets_dir.join("plot_doomeddoomed.png");
    std::fs::write(&kept, b"k").unwrap();
    std::fs::write(&doomed, b"d").unwrap();

    let ttl = std::time::Duration::from_millis(1);
    server.store.renew_lease(&kept, &nb, ttl, 0).unwrap();
    server.store.renew_lease(&doomed, &nb, ttl, 0).unwrap();

    // Reference the kept asset from the notebook on disk
    let (mut doc, _) = ink_notebook::read(&nb).unwrap();
    doc.cells[0].metadata = json!({ "note": "plot_keptkeptkept.png" });
    ink_notebook::save(&doc, &nb).unwrap();

    let removed = server.manager.collect_garbage(&nb).unwrap();
    assert_eq!(removed, 1);
    assert!(kept.exists(), "referenced assets survive even with expired leases");
    assert!(!doomed.exists());
}
