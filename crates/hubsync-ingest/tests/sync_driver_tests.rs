//! End-to-end sync tests
//!
//! Runs the trigger, driver, connector and HTTP transport together against a
//! mock HubSpot API and checks what lands in the sinks:
//! - Records without a usable id are dead-lettered, the rest are forwarded
//! - Every object kind of the full sync is visited
//! - Auth failures fail the run without forwarding anything

use hubsync_common::ObjectKind;
use hubsync_ingest::config::RetrySettings;
use hubsync_ingest::error::Result;
use hubsync_ingest::{
    Connector, ConnectorConfig, DeadLetterSink, IngestionSink, JsonLinesSink, MemoryDeadLetterSink, MemorySink,
    SyncDriver, SyncState, SyncTrigger, TriggerStatus,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path, path_regex},
    Mock, MockServer, ResponseTemplate,
};

fn config(server: &MockServer) -> ConnectorConfig {
    ConnectorConfig::new("pat-test")
        .with_base_url(server.uri())
        .with_retry(RetrySettings {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        })
}

fn deal(id: serde_json::Value, n: u32) -> serde_json::Value {
    json!({
        "id": id,
        "properties": {
            "dealname": format!("Deal {}", n),
            "amount": "250",
            "dealstage": "appointmentscheduled",
            "pipeline": "default"
        },
        "createdAt": "2024-03-01T10:00:00.000Z",
        "updatedAt": "2024-03-02T10:00:00.000Z",
        "archived": false
    })
}

/// Ten good deals plus three without a usable id: empty, null and omitted
fn deals_page() -> serde_json::Value {
    let mut results: Vec<_> = (1..=10).map(|n| deal(json!(n.to_string()), n)).collect();
    results.push(deal(json!(""), 11));
    results.push(deal(serde_json::Value::Null, 12));
    results.push(json!({
        "properties": { "dealname": "Deal 13", "amount": null },
        "createdAt": null,
        "updatedAt": null,
        "archived": null
    }));
    json!({ "results": results })
}

/// Deals get a real page; every other object type is empty
async fn mount_crm(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/deals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(deals_page()))
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/crm/v3/objects/[a-z]+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .with_priority(5)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_records_without_id_are_dead_lettered() {
    let server = MockServer::start().await;
    mount_crm(&server).await;

    let sink = Arc::new(MemorySink::new());
    let dead = Arc::new(MemoryDeadLetterSink::new());
    let connector = Connector::initialize(config(&server)).expect("valid config");
    let driver = SyncDriver::new(connector, sink.clone(), dead.clone());

    let report = driver.run(&[ObjectKind::Deals]).await;

    assert_eq!(report.state, SyncState::Completed);
    assert!(report.is_success());
    assert!(report.error.is_none());
    assert_eq!(sink.len(), 10);
    assert_eq!(dead.len(), 3);

    let deals = report.kind(ObjectKind::Deals).expect("deals summary");
    assert_eq!(deals.total, 13);
    assert_eq!(deals.succeeded, 10);
    assert_eq!(deals.dead_lettered, 3);
    assert_eq!(report.dead_letters.written, 3);

    let mut names: Vec<String> = dead
        .entries()
        .iter()
        .filter_map(|e| e.original_record.properties.get("dealname").map(str::to_string))
        .collect();
    names.sort();
    assert_eq!(names, vec!["Deal 11", "Deal 12", "Deal 13"]);
    assert!(dead.entries().iter().all(|e| e.object_kind == ObjectKind::Deals));
    assert!(!driver.connector().is_connected());
}

#[tokio::test]
async fn test_full_sync_visits_every_object_type() {
    let server = MockServer::start().await;
    mount_crm(&server).await;

    let sink = Arc::new(MemorySink::new());
    let dead = Arc::new(MemoryDeadLetterSink::new());
    let config = config(&server);
    let (sink_dyn, dead_dyn): (Arc<dyn IngestionSink>, Arc<dyn DeadLetterSink>) = (sink.clone(), dead.clone());
    let trigger = SyncTrigger::new(Arc::new(move || -> Result<SyncDriver> {
        let connector = Connector::initialize(config.clone())?;
        Ok(SyncDriver::new(connector, sink_dyn.clone(), dead_dyn.clone()))
    }));

    let response = trigger.run_sync(None, false).await;

    assert!(response.success);
    assert_eq!(response.status, TriggerStatus::Completed);
    assert_eq!(response.workflow, "full-sync");
    assert!(response.completed_at.is_some());
    assert!(!trigger.is_running("full-sync"));

    let report = response.report.expect("report");
    assert_eq!(report.total(), 13);
    assert_eq!(report.kinds.len(), 5);
    assert_eq!(sink.len(), 10);

    let requested: Vec<String> = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    for object_type in ["contacts", "companies", "deals", "tickets", "calls", "emails", "meetings", "notes", "tasks"] {
        let expected = format!("/crm/v3/objects/{}", object_type);
        assert!(requested.contains(&expected), "{} was never fetched", object_type);
    }
}

#[tokio::test]
async fn test_records_written_as_json_lines() {
    let server = MockServer::start().await;
    mount_crm(&server).await;

    let temp = TempDir::new().expect("temp dir");
    let output = temp.path().join("out").join("deals.jsonl");
    let sink = Arc::new(JsonLinesSink::open(&output).await.expect("open sink"));
    let dead = Arc::new(MemoryDeadLetterSink::new());
    let connector = Connector::initialize(config(&server)).expect("valid config");

    let report = SyncDriver::new(connector, sink, dead).run(&[ObjectKind::Deals]).await;
    assert!(report.is_success());

    let contents = std::fs::read_to_string(&output).expect("read output");
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json"))
        .collect();

    assert_eq!(lines.len(), 10);
    assert_eq!(lines[0]["kind"], "deals");
    assert_eq!(lines[0]["normalized"]["kind"], "deal");
    assert!(lines.iter().all(|line| line["key"]["id"] != ""));
}

#[tokio::test]
async fn test_auth_failure_fails_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/crm/v3/objects/[a-z]+$"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired token"))
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    let dead = Arc::new(MemoryDeadLetterSink::new());
    let connector = Connector::initialize(config(&server)).expect("valid config");
    let driver = SyncDriver::new(connector, sink.clone(), dead.clone());

    let report = driver.run(&[ObjectKind::Contacts, ObjectKind::Deals]).await;

    assert_eq!(report.state, SyncState::Failed);
    assert!(!report.is_success());
    assert!(report.error.is_some());
    assert!(sink.is_empty());
    assert!(dead.is_empty());
}
