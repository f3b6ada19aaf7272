//! Backend client and live-call feed against a mock HTTP server

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use switchboard_client_core::livecalls::{BusinessIdentity, LiveCallFetcher};
use switchboard_client_core::{
    BackendClient, BackendConfig, CallDirection, ClientEvent, EventEmitter, LiveCallFeed, PollError,
};

fn client(server: &MockServer) -> BackendClient {
    BackendClient::new(BackendConfig::new(server.uri()).with_api_token("tok-123")).unwrap()
}

#[tokio::test]
async fn test_business_id_from_nested_user_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/details"))
        .and(header("authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "user": { "name": "Sam", "business": { "_id": "biz-42" } } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(client(&server).business_id().await.unwrap(), "biz-42");
}

#[tokio::test]
async fn test_user_record_without_business_is_identity_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/details"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "Sam" })))
        .mount(&server)
        .await;

    let result = client(&server).business_id().await;
    assert!(matches!(result, Err(PollError::IdentityUnavailable(_))));
}

#[tokio::test]
async fn test_fetch_normalizes_live_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/asterisk/livecalls/biz-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "liveCalls": [
                { "channel": "PJSIP/205-0000001a", "status": "Up", "agent": "205",
                  "raw": "PJSIP/205-0000001a from-queue +15551234567" },
                "not a call",
                { "channel": "PJSIP/trunk-00000002", "agent": { "name": "Ana", "extension": "207" },
                  "raw": "outbound dial 5f1c2a9e-8b7d-4c3e-9a1f-0e2d3c4b5a69" }
            ],
            "logicalCalls": "oops"
        })))
        .mount(&server)
        .await;

    let snapshot = client(&server).fetch("biz-42").await.unwrap();

    assert_eq!(snapshot.live_calls.len(), 2);
    assert!(snapshot.logical_calls.is_empty());
    assert_eq!(snapshot.live_calls[0].direction(), CallDirection::Outgoing);
    // A UUID token outranks the outbound wording
    assert_eq!(snapshot.live_calls[1].direction(), CallDirection::Inbound);
}

#[tokio::test]
async fn test_http_failure_maps_to_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/asterisk/livecalls/biz-42"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = client(&server).fetch("biz-42").await;
    assert_eq!(result.unwrap_err(), PollError::Status { status: 503 });
}

#[tokio::test]
async fn test_feed_resolves_identity_once_and_publishes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/details"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "businessId": "biz-7" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/asterisk/livecalls/biz-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "liveCalls": [{ "channel": "PJSIP/300-00000003", "agent": 300, "raw": "inbound queue call" }],
            "logicalCalls": []
        })))
        .expect(2)
        .mount(&server)
        .await;

    let backend = Arc::new(client(&server));
    let events = EventEmitter::default();
    let mut rx = events.subscribe();
    let feed = LiveCallFeed::new(backend.clone(), events);

    feed.refresh(backend.as_ref()).await.unwrap();
    feed.refresh(backend.as_ref()).await.unwrap();

    assert_eq!(feed.cached_business_id().await.as_deref(), Some("biz-7"));
    assert_eq!(feed.live_calls().len(), 1);
    assert!(feed.find("PJSIP/300-00000003").is_some());
    assert!(feed.last_error().is_none());
    assert!(matches!(rx.recv().await.unwrap(), ClientEvent::LiveCallsUpdated { .. }));
}
