//! Pub/sub topic builders.
//!
//! Every topic lives under `{namespace}/a2a/v1/`.

fn base(namespace: &str) -> String {
    format!("{}/a2a/v1", namespace.trim_end_matches('/'))
}

/// Topic a peer agent listens on for delegated requests.
pub fn agent_request_topic(namespace: &str, agent_name: &str) -> String {
    format!("{}/agent/request/{agent_name}", base(namespace))
}

/// Topic a peer publishes its terminal response to.
pub fn peer_response_topic(namespace: &str, delegating_agent: &str, sub_task_id: &str) -> String {
    format!(
        "{}/agent/response/{delegating_agent}/{sub_task_id}",
        base(namespace)
    )
}

/// Topic a peer publishes intermediate status to.
pub fn peer_status_topic(namespace: &str, delegating_agent: &str, sub_task_id: &str) -> String {
    format!(
        "{}/agent/status/{delegating_agent}/{sub_task_id}",
        base(namespace)
    )
}

/// Fallback reply topic for a client.
pub fn client_response_topic(namespace: &str, client_id: &str) -> String {
    format!("{}/client/response/{client_id}", base(namespace))
}

/// Fallback status topic for a task.
pub fn gateway_status_topic(namespace: &str, gateway_id: &str, task_id: &str) -> String {
    format!("{}/gateway/status/{gateway_id}/{task_id}", base(namespace))
}

/// Sub-task id carried as the last segment of a peer response or status topic.
pub fn sub_task_id_from_topic(topic: &str) -> Option<&str> {
    topic
        .rsplit('/')
        .next()
        .filter(|segment| super::delegation::is_sub_task_id(segment))
}
