// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{bare_session, BareSession};
use ink_core::TaskId;
use ink_kernel::{FakeTransport, Header, KernelMessage, KernelTransport, MessageType};
use ink_notebook::{Notebook, Output};
use serde_json::json;
use tempfile::tempdir;

fn fixture(dir: &std::path::Path) -> (BareSession, Arc<Multiplexer<ink_core::SystemClock>>) {
    fixture_with(dir, |_| {})
}

fn fixture_with(
    dir: &std::path::Path,
    tweak: impl FnOnce(&mut crate::config::EngineConfig),
) -> (BareSession, Arc<Multiplexer<ink_core::SystemClock>>) {
    let notebook = dir.join("nb.ipynb");
    ink_notebook::save(&Notebook::with_code_cells(&["x = 1"]), &notebook).unwrap();
    let bare = bare_session(dir, notebook, tweak);
    let mux = Arc::new(Multiplexer::new(
        Arc::clone(&bare.session),
        Arc::clone(&bare.deps),
        Arc::clone(&bare.finalizer),
    ));
    (bare, mux)
}

fn parent_header(msg_id: &str) -> Header {
    let mut msg = KernelMessage::new(MessageType::ExecuteRequest, "sess", json!({}));
    msg.header.msg_id = msg_id.to_string();
    msg.header
}

fn stream_msg(parent: &str, text: &str) -> KernelMessage {
    FakeTransport::iopub_message(
        &parent_header(parent),
        MessageType::Stream,
        json!({ "name": "stdout", "text": text }),
    )
}

fn idle_msg(parent: &str) -> KernelMessage {
    FakeTransport::iopub_message(
        &parent_header(parent),
        MessageType::Status,
        json!({ "execution_state": "idle" }),
    )
}

/// Register a record the way the scheduler would, with the terminal commit
/// already done (finalization latch pre-set).
fn register(bare: &BareSession, parent: &str, cell_index: i32) -> Arc<ExecutionRecord> {
    let id = bare
        .deps
        .store
        .enqueue(&bare.session.notebook, cell_index, "x = 1", None, 1)
        .unwrap();
    bare.deps.store.mark_running(id, 2).unwrap();
    let record = Arc::new(ExecutionRecord::new(id, cell_index, 1, 0));
    bare.session.executions.lock().insert(parent.to_string(), Arc::clone(&record));
    record
}

fn commit_complete(bare: &BareSession, record: &Arc<ExecutionRecord>) {
    bare.deps.store.mark_complete(record.task_id, None, None, 3).unwrap();
    record.finalization.set();
}

#[tokio::test]
async fn test_outputs_append_in_emission_order() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture(dir.path());
    let record = register(&bare, "msg-1", 0);

    for i in 0..4 {
        mux.route(stream_msg("msg-1", &format!("line {i}\n"))).await;
    }

    let state = record.state.lock();
    assert_eq!(state.outputs.len(), 4);
    assert_eq!(state.output_count, 4);
    for (i, output) in state.outputs.iter().enumerate() {
        match output {
            Output::Stream { text, .. } => assert_eq!(text.as_string(), format!("line {i}\n")),
            other => panic!("wrong variant: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_orphans_buffered_then_flushed_in_order() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture(dir.path());

    // Messages arrive before the execution is registered
    for i in 0..5 {
        mux.route(stream_msg("msg-1", &format!("early {i}\n"))).await;
    }
    assert!(bare.session.executions.lock().is_empty());

    // Registration happens, then one live message triggers the flush
    let record = register(&bare, "msg-1", 0);
    commit_complete(&bare, &record);
    mux.route(idle_msg("msg-1")).await;

    let state = record.state.lock();
    assert_eq!(state.outputs.len(), 5);
    for (i, output) in state.outputs.iter().enumerate() {
        match output {
            Output::Stream { text, .. } => assert_eq!(text.as_string(), format!("early {i}\n")),
            other => panic!("wrong variant: {other:?}"),
        }
    }
    assert_eq!(state.status, ink_core::TaskStatus::Completed);
}

#[tokio::test]
async fn test_orphan_ring_drops_oldest_on_overflow() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture_with(dir.path(), |c| c.orphan_max = 3);

    // 5 messages into a ring of 3: the oldest two fall out
    for i in 0..5 {
        mux.route(stream_msg("msg-1", &format!("m{i}\n"))).await;
    }

    let record = register(&bare, "msg-1", 0);
    commit_complete(&bare, &record);
    mux.route(idle_msg("msg-1")).await;

    let state = record.state.lock();
    let texts: Vec<String> = state
        .outputs
        .iter()
        .map(|o| match o {
            Output::Stream { text, .. } => text.as_string(),
            other => panic!("wrong variant: {other:?}"),
        })
        .collect();
    assert_eq!(texts, vec!["m2\n", "m3\n", "m4\n"]);
}

#[tokio::test]
async fn test_flush_registered_without_live_message() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture(dir.path());

    mux.route(stream_msg("msg-1", "buffered\n")).await;
    let record = register(&bare, "msg-1", 0);

    // The listener calls this after every message; it alone must deliver
    // buffered orphans once registration shows up.
    mux.flush_registered().await;

    assert_eq!(record.state.lock().outputs.len(), 1);
}

#[tokio::test]
async fn test_idle_completes_and_emits_status_notification() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture(dir.path());
    let record = register(&bare, "msg-1", 0);
    commit_complete(&bare, &record);

    mux.route(idle_msg("msg-1")).await;

    assert!(record.completion.is_set());
    let statuses = bare.notifier.with_method("notebook/status");
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0]["status"], "completed");
    // Finalized records leave the in-flight table
    assert!(bare.session.executions.lock().is_empty());
    // Executed index recorded
    assert!(bare.session.executed_indices.lock().contains(&0));
}

#[tokio::test]
async fn test_error_message_sets_failed_status() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture(dir.path());
    let record = register(&bare, "msg-1", 0);

    mux.route(FakeTransport::iopub_message(
        &parent_header("msg-1"),
        MessageType::Error,
        json!({ "ename": "ValueError", "evalue": "e", "traceback": ["ValueError: e"] }),
    ))
    .await;

    assert_eq!(record.status(), ink_core::TaskStatus::Failed);
    assert_eq!(record.state.lock().error.as_deref(), Some("ValueError: e"));

    // Idle afterwards must not flip it back to completed
    bare.deps.store.mark_failed(record.task_id, "ValueError: e", 3).unwrap();
    record.finalization.set();
    mux.route(idle_msg("msg-1")).await;
    let statuses = bare.notifier.with_method("notebook/status");
    assert_eq!(statuses[0]["status"], "failed");
}

#[tokio::test]
async fn test_clear_output_resets_list_not_cumulative_count() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture(dir.path());
    let record = register(&bare, "msg-1", 0);

    mux.route(stream_msg("msg-1", "progress 10%\n")).await;
    mux.route(stream_msg("msg-1", "progress 20%\n")).await;
    mux.route(FakeTransport::iopub_message(
        &parent_header("msg-1"),
        MessageType::ClearOutput,
        json!({ "wait": false }),
    ))
    .await;
    mux.route(stream_msg("msg-1", "progress 30%\n")).await;

    let state = record.state.lock();
    assert_eq!(state.outputs.len(), 1);
    assert_eq!(state.output_count, 3, "cumulative count survives clear_output");
}

#[tokio::test]
async fn test_clear_output_with_wait_is_deferred() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture(dir.path());
    let record = register(&bare, "msg-1", 0);

    mux.route(stream_msg("msg-1", "kept\n")).await;
    mux.route(FakeTransport::iopub_message(
        &parent_header("msg-1"),
        MessageType::ClearOutput,
        json!({ "wait": true }),
    ))
    .await;

    assert_eq!(record.state.lock().outputs.len(), 1);
}

#[tokio::test]
async fn test_execute_result_records_kernel_count() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture(dir.path());
    let record = register(&bare, "msg-1", 0);

    mux.route(FakeTransport::iopub_message(
        &parent_header("msg-1"),
        MessageType::ExecuteResult,
        json!({ "execution_count": 42, "data": { "text/plain": "3" }, "metadata": {} }),
    ))
    .await;

    assert_eq!(record.state.lock().execution_count, Some(42));
}

#[tokio::test]
async fn test_message_without_parent_dropped() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture(dir.path());
    let record = register(&bare, "msg-1", 0);

    let msg = KernelMessage::new(
        MessageType::Stream,
        "sess",
        json!({ "name": "stdout", "text": "startup banner\n" }),
    );
    mux.route(msg).await;

    assert_eq!(record.state.lock().outputs.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_stops_listener() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture(dir.path());

    // A closed transport makes every recv fail immediately
    bare.transport.close();

    let listener = tokio::spawn(Arc::clone(&mux).listen_iopub());
    listener.await.unwrap();

    assert!(!bare.session.listener_healthy.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_input_request_timeout_sends_empty_reply() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture_with(dir.path(), |c| {
        c.input_timeout = std::time::Duration::from_secs(2);
    });

    let request = FakeTransport::iopub_message(
        &parent_header("msg-1"),
        MessageType::InputRequest,
        json!({ "prompt": "who?", "password": false }),
    );
    bare.transport.push_stdin(request);

    let listener = tokio::spawn(Arc::clone(&mux).listen_stdin());

    // Give the notification time to land, then let the watchdog expire
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;

    let requests = bare.notifier.with_method("notebook/input_request");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["prompt"], "who?");

    // The watchdog unblocked the kernel with an empty string
    let sent = bare.transport.sent_stdin();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content["value"], "");
    assert!(!bare.session.waiting_for_input.load(std::sync::atomic::Ordering::SeqCst));

    bare.session.cancel.cancel();
    let _ = listener.await;
}

#[tokio::test]
async fn test_input_answered_before_timeout() {
    let dir = tempdir().unwrap();
    let (bare, mux) = fixture(dir.path());

    let request = FakeTransport::iopub_message(
        &parent_header("msg-1"),
        MessageType::InputRequest,
        json!({ "prompt": "", "password": false }),
    );
    bare.transport.push_stdin(request);

    let listener = tokio::spawn(Arc::clone(&mux).listen_stdin());

    // Wait until the flag is up, then answer like submit_input would
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while !bare.session.waiting_for_input.load(std::sync::atomic::Ordering::SeqCst) {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    bare.session.waiting_for_input.store(false, std::sync::atomic::Ordering::SeqCst);
    bare.session.client.input_reply("ada").await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let sent = bare.transport.sent_stdin();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content["value"], "ada");

    bare.session.cancel.cancel();
    let _ = listener.await;
}
