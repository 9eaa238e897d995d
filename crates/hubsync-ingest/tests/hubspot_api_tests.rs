//! Connector tests against a mock HubSpot API
//!
//! These tests exercise the real HTTP transport through wiremock:
//! - Cursor pagination and termination
//! - Retry of transient failures
//! - Authentication and rejection handling

use futures::TryStreamExt;
use hubsync_ingest::config::RetrySettings;
use hubsync_ingest::{Connector, ConnectorConfig, ConnectorError, StreamOptions};
use hubsync_common::RawRecord;
use serde_json::json;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

/// Helper to build a connector pointed at the mock server
fn connector(server: &MockServer) -> Connector {
    let config = ConnectorConfig::new("pat-test")
        .with_base_url(server.uri())
        .with_page_size(2)
        .with_retry(RetrySettings {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        });
    Connector::initialize(config).expect("valid config")
}

/// Helper to create a list response page
fn page(ids: &[&str], next: Option<&str>) -> serde_json::Value {
    let results: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "properties": {
                    "dealname": format!("Deal {}", id),
                    "amount": "1500.50",
                    "dealstage": "closedwon",
                    "hs_object_id": id,
                    "closedate": null
                },
                "createdAt": "2024-01-01T00:00:00.000Z",
                "updatedAt": "2024-01-02T00:00:00.000Z",
                "archived": false
            })
        })
        .collect();

    match next {
        Some(after) => json!({
            "results": results,
            "paging": { "next": { "after": after, "link": "https://api.hubapi.com/next" } }
        }),
        None => json!({ "results": results }),
    }
}

async fn mount_ping(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[], None)))
        .mount(server)
        .await;
}

async fn deal_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/crm/v3/objects/deals")
        .count()
}

#[tokio::test]
async fn test_three_pages_then_stop() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals"))
        .and(query_param("after", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["3", "4"], Some("p3"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals"))
        .and(query_param("after", "p3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["5"], None)))
        .expect(1)
        .mount(&server)
        .await;
    // First page: no cursor yet
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals"))
        .and(header("authorization", "Bearer pat-test"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["1", "2"], Some("p2"))))
        .with_priority(10)
        .expect(1)
        .mount(&server)
        .await;

    let connector = connector(&server);
    connector.connect().await.expect("connect");

    let records: Vec<RawRecord> = connector
        .stream_deals(StreamOptions::new())
        .expect("stream")
        .try_collect()
        .await
        .expect("all pages");

    let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
    assert_eq!(deal_requests(&server).await, 3);

    // Null properties decode as absent
    assert_eq!(records[0].properties.get("closedate"), None);
    assert_eq!(records[0].properties.get("amount"), Some("1500.50"));
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals"))
        .respond_with(ResponseTemplate::new(503).set_body_string("service unavailable"))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["1"], None)))
        .with_priority(2)
        .mount(&server)
        .await;

    let connector = connector(&server);
    connector.connect().await.expect("connect");

    let records: Vec<RawRecord> = connector
        .stream_deals(StreamOptions::new())
        .expect("stream")
        .try_collect()
        .await
        .expect("page fetched after retries");

    assert_eq!(records.len(), 1);
    assert_eq!(deal_requests(&server).await, 3);
}

#[tokio::test]
async fn test_rate_limit_exhaustion_is_remote_unavailable() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let connector = connector(&server);
    connector.connect().await.expect("connect");

    let err = connector
        .stream_deals(StreamOptions::new())
        .expect("stream")
        .try_collect::<Vec<RawRecord>>()
        .await
        .expect_err("retries exhausted");

    assert!(matches!(err, ConnectorError::RemoteUnavailable { attempts: 3, .. }));
    assert_eq!(deal_requests(&server).await, 3);
}

#[tokio::test]
async fn test_rejected_token_fails_connect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status": "error",
            "message": "Authentication credentials not found",
            "category": "INVALID_AUTHENTICATION"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let connector = connector(&server);
    let err = connector.connect().await.expect_err("token rejected");

    assert!(matches!(err, ConnectorError::AuthFailure(_)));
    assert!(!connector.is_connected());
}

#[tokio::test]
async fn test_bad_request_is_not_retried() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals"))
        .respond_with(ResponseTemplate::new(400).set_body_string("unknown property"))
        .mount(&server)
        .await;

    let connector = connector(&server);
    connector.connect().await.expect("connect");

    let err = connector
        .stream_deals(StreamOptions::new().properties(["not_a_property"]))
        .expect("stream")
        .try_collect::<Vec<RawRecord>>()
        .await
        .expect_err("rejected");

    assert!(matches!(err, ConnectorError::Rejected(_)));
    assert_eq!(deal_requests(&server).await, 1);
}

#[tokio::test]
async fn test_requested_properties_are_sent() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals"))
        .and(query_param("properties", "dealname,amount"))
        .and(query_param("archived", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["1"], None)))
        .expect(1)
        .mount(&server)
        .await;

    let connector = connector(&server);
    connector.connect().await.expect("connect");

    let records: Vec<RawRecord> = connector
        .stream_deals(StreamOptions::new().properties(["dealname", "amount"]).archived(true))
        .expect("stream")
        .try_collect()
        .await
        .expect("page");

    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn test_loose_record_fields_do_not_fail_the_page() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "id": "1", "properties": { "dealname": "Kept" }, "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z" },
                { "id": null, "properties": { "dealname": "No id" }, "createdAt": null, "updatedAt": null, "archived": null },
                { "id": 42, "properties": null },
                { "properties": { "dealname": "Omitted id" } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let connector = connector(&server);
    connector.connect().await.expect("connect");

    let records: Vec<RawRecord> = connector
        .stream_deals(StreamOptions::new())
        .expect("stream")
        .try_collect()
        .await
        .expect("page decodes");

    let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "", "42", ""]);
    assert!(!records[0].missing_timestamps());
    assert!(records[1].missing_timestamps());
    assert!(!records[1].archived);
}
