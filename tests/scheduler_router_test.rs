//! Transport callbacks routed through the scheduler thread.

mod common;

use std::sync::Arc;

use futures::future::join_all;

use common::{inbound, peer_calls, peer_completed, response_topic, Harness, HarnessBuilder};
use weft::domain::models::GenerationEvent;
use weft::{InboundRouter, Scheduler};

#[tokio::test]
async fn test_delegation_round_trip_through_scheduler() {
    let h = HarnessBuilder::new().build();
    h.runtime.push_run(vec![Ok(peer_calls("inv-1", &[("fc-1", "P1")]))]);
    h.runtime
        .push_resume(vec![Ok(GenerationEvent::final_text("inv-2", "Merged"))]);
    let scheduler = Scheduler::start("weft-router-test").unwrap();
    let router = InboundRouter::new(Arc::clone(&h.host), scheduler.dispatcher());

    let request_msg = inbound();
    router
        .on_request(Harness::request("t1", request_msg.clone()))
        .expect("dispatched")
        .await
        .unwrap();
    assert_eq!(request_msg.settlements(), 0);

    let sub_task_id = h.delegated_sub_tasks("P1").remove(0);
    let reply_msg = inbound();
    router
        .on_peer_message(
            &response_topic(&sub_task_id),
            peer_completed(&sub_task_id, "forty-two"),
            reply_msg.clone(),
        )
        .expect("dispatched")
        .await
        .unwrap();

    assert_eq!(reply_msg.acks(), 1);
    assert_eq!(request_msg.acks(), 1);
    assert_eq!(h.runtime.resume_calls().len(), 1);
    assert_eq!(
        h.replies("t1")[0].payload["result"]["status"]["message"]["parts"][0]["text"],
        "Merged"
    );

    scheduler.shutdown();
}

#[tokio::test]
async fn test_duplicate_request_error_reaches_ticket() {
    let h = HarnessBuilder::new().build();
    h.runtime.push_run(vec![Ok(peer_calls("inv-1", &[("fc-1", "P1")]))]);
    let scheduler = Scheduler::start("weft-router-dup").unwrap();
    let router = InboundRouter::new(Arc::clone(&h.host), scheduler.dispatcher());

    router
        .on_request(Harness::request("t1", inbound()))
        .expect("dispatched")
        .await
        .unwrap();
    let duplicate = inbound();
    let result = router
        .on_request(Harness::request("t1", duplicate.clone()))
        .expect("dispatched")
        .await;

    assert!(result.is_err());
    assert_eq!(duplicate.nacks(), 1);
}

#[tokio::test]
async fn test_cancel_routed_through_scheduler() {
    let h = HarnessBuilder::new().build();
    h.runtime.push_run(vec![Ok(peer_calls("inv-1", &[("fc-1", "P1")]))]);
    let scheduler = Scheduler::start("weft-router-cancel").unwrap();
    let router = InboundRouter::new(Arc::clone(&h.host), scheduler.dispatcher());
    let request_msg = inbound();
    router
        .on_request(Harness::request("t1", request_msg.clone()))
        .expect("dispatched")
        .await
        .unwrap();

    let cancel_msg = inbound();
    router
        .on_cancel("t1", cancel_msg.clone())
        .expect("dispatched")
        .await
        .unwrap();

    assert_eq!(cancel_msg.acks(), 1);
    assert_eq!(request_msg.acks(), 1);
    assert_eq!(h.replies("t1")[0].payload["result"]["status"]["state"], "canceled");
    assert_eq!(h.cancels_sent_to("P1"), h.delegated_sub_tasks("P1"));
}

#[tokio::test]
async fn test_concurrent_tasks_each_settle_once() {
    let h = HarnessBuilder::new().build();
    for i in 0..8 {
        h.runtime
            .push_run(vec![Ok(GenerationEvent::final_text("inv", format!("done {i}")))]);
    }
    let scheduler = Scheduler::start("weft-router-many").unwrap();
    let router = InboundRouter::new(Arc::clone(&h.host), scheduler.dispatcher());

    let messages: Vec<_> = (0..8).map(|_| inbound()).collect();
    let tickets: Vec<_> = messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            router
                .on_request(Harness::request(&format!("t{i}"), msg.clone()))
                .expect("dispatched")
        })
        .collect();
    let results = join_all(tickets).await;

    assert!(results.iter().all(Result::is_ok));
    assert!(messages.iter().all(|m| m.acks() == 1 && m.settlements() == 1));
    assert!(h.host.registry().is_empty().await);
}

#[tokio::test]
async fn test_work_after_shutdown_is_rejected_and_nacked() {
    let h = HarnessBuilder::new().build();
    let scheduler = Scheduler::start("weft-router-down").unwrap();
    let router = InboundRouter::new(Arc::clone(&h.host), scheduler.dispatcher());
    scheduler.shutdown();

    let request_msg = inbound();
    assert!(router
        .on_request(Harness::request("t1", request_msg.clone()))
        .is_none());
    assert_eq!(request_msg.nacks(), 1);

    let peer_msg = inbound();
    assert!(router
        .on_peer_message(&response_topic("sub-x"), serde_json::json!({}), peer_msg.clone())
        .is_none());
    assert_eq!(peer_msg.nacks(), 1);
    assert!(h.runtime.run_calls().is_empty());
}
