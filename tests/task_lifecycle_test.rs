//! Streaming output and terminal outcomes of whole tasks.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use common::{inbound, peer_calls, Harness, HarnessBuilder};
use weft::domain::errors::RuntimeError;
use weft::domain::models::config::ArtifactHandlingMode;
use weft::domain::models::{ContentPart, GenerationEvent, LogicalTask, SessionBehavior};
use weft::domain::ports::{ArtifactScope, ArtifactStore, SessionStore};
use weft::services::{GenerationInterceptor, InterceptDecision};

#[tokio::test]
async fn test_embed_split_across_chunks_is_never_emitted_half_resolved() {
    let h = HarnessBuilder::new().build();
    h.runtime.push_run(vec![
        Ok(GenerationEvent::partial_text("inv-1", "Hello ")),
        Ok(GenerationEvent::partial_text("inv-1", "wor")),
        Ok(GenerationEvent::partial_text("inv-1", "ld. [[ARTIFACT:")),
        Ok(GenerationEvent::partial_text("inv-1", "report.csv:2]]")),
        Ok(GenerationEvent::final_text("inv-1", "Hello world. [[ARTIFACT:report.csv:2]]")),
    ]);
    let msg = inbound();

    h.host.handle_request(Harness::request("t1", msg.clone())).await.unwrap();

    let texts: Vec<String> = h
        .statuses("t1")
        .iter()
        .filter_map(|m| {
            m.payload["result"]["status"]["message"]["parts"][0]["text"]
                .as_str()
                .map(str::to_string)
        })
        .collect();
    assert_eq!(texts, vec!["Hello ", "wor", "ld. "]);
    assert!(!h.streamed_text("t1").contains("[["));
    assert_eq!(h.streamed_text("t1"), "Hello world. ");

    let reply = &h.replies("t1")[0].payload["result"];
    assert_eq!(
        reply["metadata"]["produced_artifacts"],
        json!([{ "filename": "report.csv", "version": 2 }])
    );
    assert_eq!(msg.acks(), 1);
}

#[tokio::test]
async fn test_task_without_delegation_completes_with_final_text() {
    let h = HarnessBuilder::new().build();
    h.runtime
        .push_run(vec![Ok(GenerationEvent::final_text("inv-1", "Done"))]);
    let msg = inbound();

    h.host.handle_request(Harness::request("t1", msg.clone())).await.unwrap();

    let replies = h.replies("t1");
    assert_eq!(replies.len(), 1);
    let payload = &replies[0].payload;
    assert_eq!(payload["jsonrpc"], "2.0");
    assert_eq!(payload["id"], "rpc-t1");
    assert_eq!(payload["result"]["id"], "t1");
    assert_eq!(payload["result"]["sessionId"], "session-1");
    assert_eq!(payload["result"]["status"]["state"], "completed");
    assert_eq!(payload["result"]["status"]["message"]["role"], "agent");
    assert_eq!(payload["result"]["status"]["message"]["parts"][0]["text"], "Done");
    assert_eq!(payload["result"]["metadata"]["agent_name"], "Orchestrator");
    assert_eq!(msg.acks(), 1);
    assert_eq!(msg.nacks(), 0);
    assert!(h.host.registry().is_empty().await);
}

#[tokio::test]
async fn test_reply_falls_back_to_client_topic() {
    let h = HarnessBuilder::new().build();
    h.runtime
        .push_run(vec![Ok(GenerationEvent::final_text("inv-1", "Done"))]);
    let request = weft::InboundRequest::new(
        "t1",
        "user-1",
        "session-1",
        weft::domain::models::a2a::Message::user_text("go"),
        inbound(),
    )
    .with_client("web");

    h.host.handle_request(request).await.unwrap();

    assert_eq!(h.transport.published_to("test/a2a/v1/client/response/web").len(), 1);
}

#[tokio::test]
async fn test_persistent_streaming_strips_text_from_final_event() {
    let h = HarnessBuilder::new().build();
    let final_event = GenerationEvent::new(
        "inv-1",
        false,
        vec![
            ContentPart::text("Hello"),
            ContentPart::Data {
                data: json!({ "rows": 3 }),
            },
        ],
    );
    h.runtime.push_run(vec![
        Ok(GenerationEvent::partial_text("inv-1", "Hel")),
        Ok(GenerationEvent::partial_text("inv-1", "lo")),
        Ok(final_event),
    ]);

    h.host.handle_request(Harness::request("t1", inbound())).await.unwrap();

    assert_eq!(h.streamed_text("t1"), "Hello");
    let last_status = h.statuses("t1").pop().unwrap();
    let parts = last_status.payload["result"]["status"]["message"]["parts"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0]["type"], "data");
    assert_eq!(last_status.payload["result"]["metadata"]["invocation_id"], "inv-1");
}

#[tokio::test]
async fn test_completed_reply_carries_tool_results() {
    let h = HarnessBuilder::new().build();
    h.runtime.push_run(vec![Ok(GenerationEvent::new(
        "inv-1",
        false,
        vec![
            ContentPart::text("Here you go"),
            ContentPart::FunctionResponse {
                id: "fc-1".to_string(),
                name: "lookup".to_string(),
                response: json!({ "rows": 3 }),
            },
        ],
    ))]);
    let msg = inbound();

    h.host.handle_request(Harness::request("t1", msg.clone())).await.unwrap();

    let parts = h.replies("t1")[0].payload["result"]["status"]["message"]["parts"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0]["text"], "Here you go");
    assert_eq!(parts[1]["type"], "data");
    assert_eq!(parts[1]["data"]["rows"], 3);
    assert_eq!(parts[1]["metadata"]["tool_name"], "lookup");
    assert_eq!(msg.acks(), 1);
}

#[tokio::test]
async fn test_final_only_turn_streams_its_text_once() {
    let h = HarnessBuilder::new().build();
    h.runtime
        .push_run(vec![Ok(GenerationEvent::final_text("inv-1", "All at once"))]);

    h.host.handle_request(Harness::request("t1", inbound())).await.unwrap();

    assert_eq!(h.streamed_text("t1"), "All at once");
}

#[tokio::test]
async fn test_status_signal_follows_preceding_text() {
    let h = HarnessBuilder::new().build();
    h.runtime.push_run(vec![
        Ok(GenerationEvent::partial_text(
            "inv-1",
            "Working. [[STATUS:Crunching numbers]]Next.",
        )),
        Ok(GenerationEvent::final_text("inv-1", "ignored")),
    ]);

    h.host.handle_request(Harness::request("t1", inbound())).await.unwrap();

    let statuses = h.statuses("t1");
    let first = &statuses[0].payload["result"]["status"]["message"]["parts"][0];
    let second = &statuses[1].payload["result"]["status"]["message"]["parts"][0];
    assert_eq!(first["text"], "Working. Next.");
    assert_eq!(second["type"], "data");
    assert_eq!(second["data"]["a2a_signal_type"], "agent_status_message");
    assert_eq!(second["data"]["text"], "Crunching numbers");
}

#[tokio::test]
async fn test_run_based_task_aggregates_and_deletes_session() {
    let h = HarnessBuilder::new().build();
    h.runtime.push_run(vec![
        Ok(GenerationEvent::partial_text("inv-1", "Part one. ")),
        Ok(GenerationEvent::partial_text("inv-1", "Part two.")),
        Ok(GenerationEvent::final_text("inv-1", "Part one. Part two.")),
    ]);
    let request = Harness::request("t1", inbound()).with_session_behavior(SessionBehavior::RunBased);

    h.host.handle_request(request).await.unwrap();

    let runs = h.runtime.run_calls();
    assert_eq!(runs[0].session.session_id, "session-1");
    assert_eq!(runs[0].session.effective_session_id, "session-1:t1:run");
    assert_eq!(h.streamed_text("t1"), "");
    let reply = &h.replies("t1")[0].payload["result"];
    assert_eq!(reply["status"]["message"]["parts"][0]["text"], "Part one. Part two.");
    assert_eq!(h.sessions.session_count().await, 0);
}

#[tokio::test]
async fn test_limit_reached_publishes_error_envelope() {
    let h = HarnessBuilder::new().build();
    h.runtime.push_run(vec![
        Ok(GenerationEvent::partial_text("inv-1", "Let me think")),
        Err(RuntimeError::LimitExceeded { max_calls: 20 }),
    ]);
    let msg = inbound();

    h.host.handle_request(Harness::request("t1", msg.clone())).await.unwrap();

    let reply = &h.replies("t1")[0].payload;
    assert!(reply.get("result").is_none());
    assert_eq!(reply["error"]["code"], -32603);
    assert!(reply["error"]["message"].as_str().unwrap().contains("continue"));
    assert_eq!(reply["error"]["data"]["taskId"], "t1");
    assert_eq!(reply["error"]["data"]["reason"], "llm_call_limit_reached");
    assert_eq!(msg.acks(), 1);
}

#[tokio::test]
async fn test_failure_repairs_dangling_calls_and_nacks() {
    let h = HarnessBuilder::new().build();
    h.sessions.ensure_session("user-1", "session-1").await.unwrap();
    h.sessions
        .append_event(
            "user-1",
            "session-1",
            GenerationEvent::new(
                "inv-0",
                false,
                vec![ContentPart::function_call("fc-9", "search", json!({}))],
            ),
        )
        .await
        .unwrap();
    h.runtime
        .push_run(vec![Err(RuntimeError::ToolFailure("search crashed".into()))]);
    let msg = inbound();

    h.host.handle_request(Harness::request("t1", msg.clone())).await.unwrap();

    assert_eq!(msg.nacks(), 1);
    assert_eq!(msg.acks(), 0);
    assert_eq!(h.replies("t1")[0].payload["result"]["status"]["state"], "failed");
    let signal = h
        .statuses("t1")
        .into_iter()
        .find(|m| {
            m.payload["result"]["status"]["message"]["parts"][0]["data"]["a2a_signal_type"]
                == "tool_failure"
        });
    assert!(signal.is_some());

    let repaired = h
        .sessions
        .last_event("user-1", "session-1")
        .await
        .unwrap()
        .unwrap();
    assert!(repaired.function_calls().is_empty());
    match &repaired.content_parts[0] {
        ContentPart::FunctionResponse { id, response, .. } => {
            assert_eq!(id, "fc-9");
            assert_eq!(response["status"], "error");
        }
        other => panic!("expected function response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_paused_task_cancels_peers_and_acks_once() {
    let h = HarnessBuilder::new().build();
    h.runtime
        .push_run(vec![Ok(peer_calls("inv-1", &[("fc-1", "P1"), ("fc-2", "P2")]))]);
    let msg = inbound();
    h.host.handle_request(Harness::request("t1", msg.clone())).await.unwrap();

    assert!(h.host.cancel_task("t1").await);

    assert_eq!(h.cancels_sent_to("P1"), h.delegated_sub_tasks("P1"));
    assert_eq!(h.cancels_sent_to("P2"), h.delegated_sub_tasks("P2"));
    let reply = &h.replies("t1")[0].payload["result"];
    assert_eq!(reply["status"]["state"], "canceled");
    assert_eq!(msg.acks(), 1);
    assert!(h.cache.is_empty());

    // a second cancel and any later finalization are no-ops
    assert!(!h.host.cancel_task("t1").await);
    assert_eq!(msg.settlements(), 1);
    assert!(h.runtime.resume_calls().is_empty());
}

#[tokio::test]
async fn test_duplicate_request_is_nacked_without_disturbing_first() {
    let h = HarnessBuilder::new().build();
    h.runtime.push_run(vec![Ok(peer_calls("inv-1", &[("fc-1", "P1")]))]);
    let first = inbound();
    h.host.handle_request(Harness::request("t1", first.clone())).await.unwrap();

    let duplicate = inbound();
    assert!(h
        .host
        .handle_request(Harness::request("t1", duplicate.clone()))
        .await
        .is_err());
    assert_eq!(duplicate.nacks(), 1);
    assert_eq!(first.settlements(), 0);
    assert_eq!(h.runtime.run_calls().len(), 1);
}

#[tokio::test]
async fn test_delivery_failure_nacks() {
    let h = HarnessBuilder::new().build();
    h.runtime
        .push_run(vec![Ok(GenerationEvent::final_text("inv-1", "Done"))]);
    h.transport.fail_topics_containing("test/reply/");
    let msg = inbound();

    h.host.handle_request(Harness::request("t1", msg.clone())).await.unwrap();

    assert_eq!(msg.nacks(), 1);
    assert_eq!(msg.acks(), 0);
    assert!(h.host.registry().is_empty().await);
}

#[tokio::test]
async fn test_returned_artifact_published_by_reference() {
    let h = HarnessBuilder::new()
        .configure(|c| c.artifact_handling_mode = ArtifactHandlingMode::Reference)
        .build();
    let scope = ArtifactScope::new("Orchestrator", "user-1", "session-1");
    for body in ["a", "b", "c"] {
        h.artifacts
            .save(&scope, "report.csv", body.as_bytes().to_vec(), "text/csv")
            .await
            .unwrap();
    }
    h.runtime.push_run(vec![
        Ok(GenerationEvent::partial_text("inv-1", "See [[ARTIFACT:report.csv:2]]")),
        Ok(GenerationEvent::final_text("inv-1", "See")),
    ]);

    h.host.handle_request(Harness::request("t1", inbound())).await.unwrap();

    let artifact_update = h
        .statuses("t1")
        .into_iter()
        .find(|m| m.payload["result"].get("artifact").is_some())
        .expect("artifact update published");
    let file = &artifact_update.payload["result"]["artifact"]["parts"][0]["file"];
    assert_eq!(file["name"], "report.csv");
    assert_eq!(file["mimeType"], "text/csv");
    assert_eq!(
        file["uri"],
        "artifact://Orchestrator/user-1/session-1/report.csv?version=2"
    );
}

struct DropSecrets {
    seen_after: AtomicUsize,
}

impl GenerationInterceptor for DropSecrets {
    fn name(&self) -> &'static str {
        "drop_secrets"
    }

    fn before(&self, _task: &LogicalTask, event: GenerationEvent) -> InterceptDecision {
        if event.texts().any(|t| t.contains("secret")) {
            InterceptDecision::Skip
        } else {
            InterceptDecision::Continue(event)
        }
    }

    fn after(&self, _task: &LogicalTask, _event: &GenerationEvent) {
        self.seen_after.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_custom_interceptor_skips_events() {
    let interceptor = Arc::new(DropSecrets {
        seen_after: AtomicUsize::new(0),
    });
    let h = HarnessBuilder::new().interceptor(interceptor.clone()).build();
    h.runtime.push_run(vec![
        Ok(GenerationEvent::partial_text("inv-1", "public ")),
        Ok(GenerationEvent::partial_text("inv-1", "secret")),
        Ok(GenerationEvent::final_text("inv-1", "public")),
    ]);

    h.host.handle_request(Harness::request("t1", inbound())).await.unwrap();

    assert_eq!(h.streamed_text("t1"), "public ");
    assert_eq!(interceptor.seen_after.load(Ordering::SeqCst), 2);
}
