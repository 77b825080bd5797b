//! Doris stream load against a mock HTTP server
#![allow(clippy::unwrap_used, clippy::expect_used)]

use sluice_common::{ComponentConfig, Record, Value};
use sluice_components::datasources::DorisDatasource;
use sluice_components::sinks::DorisSink;
use sluice_engine::component::{Datasource, Sink};
use sluice_engine::{RunId, SchemaMapping};
use wiremock::matchers::{basic_auth, body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn open_sink(server: &MockServer) -> DorisSink {
    let address = server.address();
    let mut ds = DorisDatasource::new();
    ds.init(&ComponentConfig::from_pairs([
        ("host", address.ip().to_string()),
        ("port", address.port().to_string()),
        ("user", "loader".to_string()),
        ("password", "secret".to_string()),
        ("database", "dw".to_string()),
    ]))
    .await
    .unwrap();

    let mut schema = SchemaMapping::new();
    schema.insert("id", "event_id");
    schema.insert("kind", "event_kind");

    let mut sink = DorisSink::new();
    sink.open(
        &ComponentConfig::from_pairs([("table", "events")]),
        schema.freeze(),
        Some(Box::new(ds) as Box<dyn Datasource>),
    )
    .await
    .unwrap();
    sink
}

fn event(id: i64) -> Record {
    [("id", Value::Int(id))].into_iter().collect()
}

#[tokio::test]
async fn test_stream_load_success() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/dw/events/_stream_load"))
        .and(basic_auth("loader", "secret"))
        .and(header("format", "json"))
        .and(header("strip_outer_array", "true"))
        .and(header_exists("label"))
        .and(body_json(serde_json::json!([
            {"event_id": 1, "event_kind": null},
            {"event_id": 2, "event_kind": null}
        ])))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Status": "Success",
            "Message": "OK",
            "NumberLoadedRows": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut sink = open_sink(&server).await;
    sink.write(&RunId::new("nightly"), &[event(1), event(2)])
        .await
        .unwrap();
    sink.write(&RunId::new("nightly"), &[]).await.unwrap();
    sink.close().await.unwrap();
}

#[tokio::test]
async fn test_stream_load_failure_status() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Status": "Fail",
            "Message": "too many filtered rows"
        })))
        .mount(&server)
        .await;

    let mut sink = open_sink(&server).await;
    let err = sink
        .write(&RunId::new("r"), &[event(1)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("too many filtered rows"), "{}", err);
}

#[tokio::test]
async fn test_stream_load_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let mut sink = open_sink(&server).await;
    let err = sink
        .write(&RunId::new("r"), &[event(1)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("status 500"), "{}", err);
}

#[tokio::test]
async fn test_labels_are_unique_per_batch() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"Status": "Success"})),
        )
        .mount(&server)
        .await;

    let mut sink = open_sink(&server).await;
    let run = RunId::new("r");
    sink.write(&run, &[event(1)]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    sink.write(&run, &[event(2)]).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let labels: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get("label").unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(labels.len(), 2);
    assert!(labels.iter().all(|l| l.starts_with("r_")));
    assert_ne!(labels[0], labels[1]);
}
