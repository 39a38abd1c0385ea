//! Mock document server helpers for integration tests
//!
//! Wraps a `wiremock` server speaking the REST layout of the HTTP
//! document store.

use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Server answering the probe and returning empty data for `user_id`
pub async fn empty_document_server(user_id: &str) -> MockServer {
    let server = MockServer::start().await;
    mount_empty_user(&server, user_id).await;
    server
}

/// Probe, empty collection lists and missing single documents
pub async fn mount_empty_user(server: &MockServer, user_id: &str) {
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(server)
        .await;

    for collection in ["profile", "savings", "history", "goals"] {
        Mock::given(method("GET"))
            .and(path(format!("/users/{}/{}", user_id, collection)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path_regex(format!("^/users/{}/(profile|savings)/[^/]+$", user_id)))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

/// Accept writes to `collection` but answer only after `delay`
pub async fn mount_slow_writes(server: &MockServer, user_id: &str, collection: &str, delay: Duration) {
    Mock::given(method("PUT"))
        .and(path_regex(format!("^/users/{}/{}/[^/]+$", user_id, collection)))
        .respond_with(ResponseTemplate::new(200).set_delay(delay))
        .mount(server)
        .await;
}

/// Answer every write to `collection` with `status`
pub async fn mount_writes(server: &MockServer, user_id: &str, collection: &str, status: u16) {
    Mock::given(method("PUT"))
        .and(path_regex(format!("^/users/{}/{}/[^/]+$", user_id, collection)))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}
