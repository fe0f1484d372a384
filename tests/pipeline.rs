use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue};
use flate2::read::GzDecoder;
use graphql_usage::client::{CLIENT_NAME_HEADER, CLIENT_VERSION_HEADER};
use graphql_usage::{
    operation_hash, operation_signature, Configuration, FieldInfo, FieldObservation,
    HeaderExtractor, OperationKind, OperationObservation, Phase, Schema, Submission,
    UsageExtension,
};
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const SCHEMA: &str = r#"
    type User { id: ID! name: String }
    type Query { user(id: ID!): User }
"#;

const QUERY: &str = r#"
    query GetUser { user(id: "42") { ...UserFields } }
    query Other { user(id: "1") { id } }
    fragment UserFields on User { id name }
    fragment Unused on User { id }
"#;

async fn collector() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn config(server: &MockServer) -> Configuration {
    let mut config = Configuration::new("integration-key")
        .with_endpoint("http", server.address().to_string())
        .with_server_version("S1");
    config.flush_interval = Duration::from_secs(3600);
    config.stop_timeout = Duration::from_secs(5);
    config
}

fn extension(config: &Configuration) -> UsageExtension<HeaderMap> {
    let schema = Arc::new(Schema::parse(SCHEMA).unwrap());
    UsageExtension::new(config, schema)
        .unwrap()
        .with_extractor(HeaderExtractor::default())
}

fn headers(name: &'static str, version: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CLIENT_NAME_HEADER, HeaderValue::from_static(name));
    headers.insert(CLIENT_VERSION_HEADER, HeaderValue::from_static(version));
    headers
}

fn bodies(requests: &[Request], endpoint: &str) -> Vec<Value> {
    requests
        .iter()
        .filter(|r| r.url.path() == endpoint)
        .map(|r| {
            assert_eq!(r.headers.get("content-encoding").unwrap(), "gzip");
            assert_eq!(r.headers.get("x-api-key").unwrap(), "integration-key");
            let mut json = String::new();
            GzDecoder::new(r.body.as_slice()).read_to_string(&mut json).unwrap();
            serde_json::from_str(&json).unwrap()
        })
        .collect()
}

#[tokio::test]
async fn test_field_sample_reaches_collector() {
    let server = collector().await;
    let extension = extension(&config(&server));
    extension.start().unwrap();

    let submission = extension.record_field(
        &headers("A", "1.0"),
        FieldObservation {
            field: FieldInfo::new("Query", "user", "User"),
            error: None,
            duration: Duration::from_millis(5),
        },
    );
    assert_eq!(submission, Submission::Queued);
    extension.close().await.unwrap();
    assert_eq!(extension.phase(), Phase::Stopped);

    let requests = server.received_requests().await.unwrap();
    let metrics = bodies(&requests, "/reporting/metrics");
    assert_eq!(metrics.len(), 1);
    assert!(bodies(&requests, "/reporting/definitions").is_empty());

    let contexts = metrics[0]["contexts"].as_array().unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(
        contexts[0]["context"],
        serde_json::json!({"clientName": "A", "clientVersion": "1.0", "serverVersion": "S1"})
    );

    let user = &contexts[0]["types"]["Query"]["user"];
    assert_eq!(user["count"], 1);
    assert_eq!(user["errorCount"], 0);
    assert_eq!(user["returnType"], "User");
    assert_eq!(user["histogram"]["counts"], serde_json::json!([1]));
}

#[tokio::test]
async fn test_operations_and_definitions_reach_collector() {
    let server = collector().await;
    let extension = extension(&config(&server));
    extension.start().unwrap();

    let ctx = headers("web", "2.0");
    for literal in ["42", "43"] {
        let query = QUERY.replace("\"42\"", &format!("\"{literal}\""));
        let observation = OperationObservation {
            name: "GetUser".into(),
            kind: OperationKind::Query,
            query,
            has_errors: false,
            duration: Duration::from_millis(20),
        };
        assert_eq!(extension.record_operation(&ctx, observation).unwrap(), Submission::Queued);
    }
    extension
        .record_operation(
            &ctx,
            OperationObservation {
                name: "Other".into(),
                kind: OperationKind::Query,
                query: QUERY.into(),
                has_errors: true,
                duration: Duration::from_millis(3),
            },
        )
        .unwrap();
    extension.close().await.unwrap();

    let schema = Schema::parse(SCHEMA).unwrap();
    let get_user = operation_signature(&schema, QUERY, "GetUser").unwrap();
    let get_user_hash = operation_hash(&get_user);
    let other_hash = operation_hash(&operation_signature(&schema, QUERY, "Other").unwrap());
    assert!(get_user.contains("fragment UserFields"));
    assert!(!get_user.contains("Unused"));

    let requests = server.received_requests().await.unwrap();

    let definitions = bodies(&requests, "/reporting/definitions");
    assert_eq!(definitions.len(), 1);
    let operations = definitions[0]["operations"].as_array().unwrap();
    assert_eq!(operations.len(), 2);
    assert_eq!(operations[0]["name"], "GetUser");
    assert_eq!(operations[0]["hash"], get_user_hash.as_str());
    assert_eq!(operations[0]["signature"], get_user.as_str());
    assert_eq!(operations[1]["hash"], other_hash.as_str());

    let metrics = bodies(&requests, "/reporting/metrics");
    assert_eq!(metrics.len(), 1);
    let recorded = &metrics[0]["contexts"][0]["operations"];
    assert_eq!(recorded[&get_user_hash]["count"], 2);
    assert_eq!(recorded[&get_user_hash]["errorCount"], 0);
    assert_eq!(recorded[&other_hash]["count"], 1);
    assert_eq!(recorded[&other_hash]["errorCount"], 1);
}

#[tokio::test]
async fn test_idle_pipeline_sends_nothing() {
    let server = collector().await;
    let extension = extension(&config(&server));
    extension.start().unwrap();
    extension.close().await.unwrap();

    assert!(server.received_requests().await.unwrap().is_empty());
}
