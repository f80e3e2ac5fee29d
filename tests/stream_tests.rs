//! Integration tests for streaming sessions

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use codebox::stream::{ControlMessage, SessionError, SessionHub, StreamEvent, StreamingSession};

use common::{
    agent_config, harness, harness_on, settled, stream_config, ExecReply, FakeRuntime, Harness, ScriptedProvider, Turn,
};

fn session(h: &Harness, id: &str) -> StreamingSession {
    StreamingSession::new(id, "python", h.executor.clone(), &stream_config())
}

async fn until_terminal(rx: &mut UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a terminal event")
            .expect("stream closed before a terminal event");
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

fn chunk_text(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn terminal_count(events: &[StreamEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

/// Test chunks add up to the answer
#[tokio::test]
async fn test_chunks_add_up_to_the_answer() {
    let answer = "Here is a fairly long answer, streamed three characters at a time so that \
                  the coalescer has plenty of deltas to merge before each flush.";
    let h = harness(ScriptedProvider::new(vec![Turn::text(answer)]), agent_config());
    let session = session(&h, "s1");
    let (_, mut rx) = session.attach().await;

    session.submit("say something long").await.unwrap();
    let events = until_terminal(&mut rx).await;

    assert_eq!(events.first(), Some(&StreamEvent::Start));
    assert_eq!(events.last(), Some(&StreamEvent::End));
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(chunk_text(&events), answer);

    // Coalescing merged at least some of the deltas
    let chunks = events.iter().filter(|e| matches!(e, StreamEvent::Chunk { .. })).count();
    assert!(chunks < answer.chars().count().div_ceil(3));
}

/// Test text before an action is flushed first
#[tokio::test]
async fn test_text_before_an_action_is_flushed_first() {
    let h = harness(
        ScriptedProvider::new(vec![
            Turn::thought_then_tool("Checking the directory.", "bash", json!({"command": "ls"})),
            Turn::text("All good."),
        ]),
        agent_config(),
    );
    let session = session(&h, "s1");
    let (_, mut rx) = session.attach().await;

    session.submit("check").await.unwrap();
    let events = until_terminal(&mut rx).await;

    let first_chunk = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Chunk { .. }))
        .unwrap();
    let first_immediate = events
        .iter()
        .position(|e| matches!(e, StreamEvent::ActionStreaming { .. } | StreamEvent::Action { .. }))
        .unwrap();
    assert!(first_chunk < first_immediate);
    assert_eq!(chunk_text(&events), "Checking the directory.All good.");
    assert!(events.contains(&StreamEvent::Thought {
        content: "Checking the directory.".to_string(),
        step: 1,
    }));
}

/// Test action precedes observation across concurrent sessions
#[tokio::test]
async fn test_action_precedes_observation_across_concurrent_sessions() {
    let mut turns = Vec::new();
    for _ in 0..6 {
        turns.push(Turn::tool("bash", json!({"command": "ls"})));
        turns.push(Turn::tool("think", json!({"thought": "next"})));
        turns.push(Turn::text("finished"));
    }
    let h = harness(ScriptedProvider::new(turns), agent_config());
    let hub = Arc::new(SessionHub::new(h.executor.clone(), stream_config()));

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let hub = hub.clone();
            tokio::spawn(async move {
                let session = hub.get_or_create(&format!("s{}", i), "python").await;
                let (_, mut rx) = session.attach().await;
                session.submit("go").await.unwrap();
                until_terminal(&mut rx).await
            })
        })
        .collect();

    for task in tasks {
        let events = task.await.unwrap();
        assert_eq!(terminal_count(&events), 1);
        for (i, event) in events.iter().enumerate() {
            if let StreamEvent::Observation { step, .. } = event {
                let action = events[..i]
                    .iter()
                    .rposition(|e| matches!(e, StreamEvent::Action { step: s, .. } if s == step));
                assert!(action.is_some(), "observation for step {} without a prior action", step);
            }
            if let StreamEvent::Action { step, .. } = event {
                let early = events[..i]
                    .iter()
                    .any(|e| matches!(e, StreamEvent::Observation { step: s, .. } if s == step));
                assert!(!early, "observation for step {} arrived before its action", step);
            }
        }
    }
}

/// Test that cancelling mid-tool emits exactly one cancelled event
#[tokio::test]
async fn test_cancel_mid_tool_emits_one_cancelled_event() {
    let h = harness(
        ScriptedProvider::new(vec![Turn::thought_then_tool(
            "Running the long job.",
            "bash",
            json!({"command": "sleep 100"}),
        )]),
        agent_config(),
    );
    h.runtime.on_exec("sleep 100", ExecReply::Hang);
    let session = session(&h, "s1");
    let (_, mut rx) = session.attach().await;

    session.submit("run the job").await.unwrap();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        if matches!(event, StreamEvent::Action { .. }) {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(session.cancel().await);

    let after = until_terminal(&mut rx).await;
    assert_eq!(after.last(), Some(&StreamEvent::Cancelled));
    assert_eq!(terminal_count(&after), 1);
    assert!(after
        .iter()
        .all(|e| !matches!(e, StreamEvent::Chunk { .. } | StreamEvent::Action { .. } | StreamEvent::Observation { .. })));

    // A second cancel after termination does nothing
    session.wait().await;
    assert!(!session.cancel().await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());
    assert!(h.runtime.kills() >= 1);
}

/// Test cancel while acquiring a container
#[tokio::test]
async fn test_cancel_while_acquiring_a_container() {
    let h = harness_on(
        FakeRuntime::with_create_delay(Duration::from_millis(300)),
        ScriptedProvider::new(vec![Turn::tool("bash", json!({"command": "ls"}))]),
        agent_config(),
    );
    let session = session(&h, "s1");
    let (_, mut rx) = session.attach().await;

    session.submit("list").await.unwrap();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        if matches!(event, StreamEvent::Action { .. }) {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(session.cancel().await);

    let after = until_terminal(&mut rx).await;
    assert_eq!(after.last(), Some(&StreamEvent::Cancelled));
    assert_eq!(terminal_count(&after), 1);
    assert!(!after.iter().any(|e| matches!(e, StreamEvent::Observation { .. })));
    session.wait().await;

    // The late container is bound to the session and counted against capacity
    let handle = settled(&h.pool, "s1").await;
    let containers = h.runtime.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id, handle.container_id);
    let stats = h.pool.stats().await;
    assert_eq!((stats.active_count, stats.available), (1, 3));
    assert!(rx.try_recv().is_err());
}

/// Test provider failure ends with error event
#[tokio::test]
async fn test_provider_failure_ends_with_error_event() {
    let h = harness(
        ScriptedProvider::new(vec![Turn::Fail(codebox::llm::ProviderError::Status {
            status: 400,
            body: "model not found".to_string(),
        })]),
        agent_config(),
    );
    let session = session(&h, "s1");
    let (_, mut rx) = session.attach().await;

    session.submit("hi").await.unwrap();
    let events = until_terminal(&mut rx).await;
    assert_eq!(terminal_count(&events), 1);
    match events.last().unwrap() {
        StreamEvent::Error { content } => assert_eq!(content, "provider returned HTTP 400: model not found"),
        other => panic!("expected an error event, got {:?}", other),
    }
}

/// Test re-attaching replays the tail and replaces the sink
#[tokio::test]
async fn test_reattach_replays_tail_and_replaces_sink() {
    let h = harness(ScriptedProvider::new(vec![Turn::text("replay me")]), agent_config());
    let session = session(&h, "s1");
    let (_, mut first) = session.attach().await;

    session.submit("hi").await.unwrap();
    let live = until_terminal(&mut first).await;
    session.wait().await;

    let (resync, _second) = session.attach().await;
    assert!(!resync.running);
    assert_eq!(resync.accumulated_text, "replay me");
    assert_eq!(resync.tail, live);

    // The first consumer was replaced, not forked
    assert!(first.recv().await.is_none());
}

/// Test re-attaching mid-run reports a running session
#[tokio::test]
async fn test_reattach_mid_run_sees_running_state() {
    let h = harness(ScriptedProvider::new(vec![Turn::Hang]), agent_config());
    let session = session(&h, "s1");

    session.submit("hi").await.unwrap();
    let (resync, mut rx) = session.attach().await;
    assert!(resync.running);
    assert_eq!(resync.tail.first(), Some(&StreamEvent::Start));

    session.cancel().await;
    let events = until_terminal(&mut rx).await;
    assert_eq!(events.last(), Some(&StreamEvent::Cancelled));
}

/// Test second submit while running is rejected
#[tokio::test]
async fn test_second_submit_while_running_is_rejected() {
    let h = harness(ScriptedProvider::new(vec![Turn::Hang]), agent_config());
    let session = session(&h, "s1");

    session.submit("first").await.unwrap();
    assert!(matches!(session.submit("second").await, Err(SessionError::Busy(_))));
    assert!(matches!(session.submit("   ").await, Err(SessionError::EmptyMessage)));

    session.handle_control(ControlMessage::Cancel).await.unwrap();
    session.wait().await;
    assert!(!session.is_running().await);
}

/// Test history carries across turns
#[tokio::test]
async fn test_history_carries_across_turns() {
    let h = harness(
        ScriptedProvider::new(vec![Turn::text("first answer"), Turn::text("second answer")]),
        agent_config(),
    );
    let session = session(&h, "s1");

    session
        .handle_control(ControlMessage::Message {
            content: "first question".to_string(),
        })
        .await
        .unwrap();
    session.wait().await;
    session.submit("second question").await.unwrap();
    session.wait().await;

    let second_request = &h.provider.requests()[1];
    assert!(second_request.iter().any(|m| m.content == "first answer"));
    assert_eq!(session.history().await.len(), 4);
}

/// Test hub close tears down the container
#[tokio::test]
async fn test_hub_close_tears_down_the_container() {
    let h = harness(
        ScriptedProvider::new(vec![Turn::tool("bash", json!({"command": "ls"})), Turn::text("done")]),
        agent_config(),
    );
    let hub = SessionHub::new(h.executor.clone(), stream_config());

    let session = hub.get_or_create("s1", "python").await;
    assert!(Arc::ptr_eq(&session, &hub.get_or_create("s1", "python").await));
    session.submit("list").await.unwrap();
    session.wait().await;
    assert_eq!(h.runtime.containers().len(), 1);
    drop(session);

    hub.close("s1").await.unwrap();
    assert!(h.runtime.containers().is_empty());
    assert!(hub.is_empty().await);
}

/// Test hub prunes dormant sessions
#[tokio::test]
async fn test_hub_prunes_dormant_sessions() {
    let h = harness(ScriptedProvider::new(Vec::new()), agent_config());
    let hub = SessionHub::new(h.executor.clone(), stream_config());

    let kept = hub.get_or_create("held", "python").await;
    let _ = hub.get_or_create("dropped", "python").await;

    assert_eq!(hub.prune().await, 1);
    assert!(hub.get("held").await.is_some());
    assert!(hub.get("dropped").await.is_none());
    drop(kept);
}
