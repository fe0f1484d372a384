use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use tower_http::decompression::RequestDecompressionLayer;

/// Running totals of everything the local collector received.
#[derive(Debug, Default)]
pub struct CollectorStats {
    pub metrics_snapshots: AtomicU64,
    pub definitions_snapshots: AtomicU64,
    pub field_samples: AtomicU64,
    pub operation_samples: AtomicU64,
    pub definitions: AtomicU64,
}

/// Builds the collector `Router`: the two reporting endpoints behind gzip
/// request decompression.
pub fn create_router(stats: Arc<CollectorStats>) -> Router {
    Router::new()
        .route("/reporting/metrics", post(receive_metrics))
        .route("/reporting/definitions", post(receive_definitions))
        .with_state(stats)
        .layer(RequestDecompressionLayer::new())
}

async fn receive_metrics(
    State(stats): State<Arc<CollectorStats>>,
    Json(snapshot): Json<Value>,
) -> StatusCode {
    let contexts = snapshot["contexts"].as_array().map(Vec::as_slice).unwrap_or_default();

    let mut fields = 0u64;
    let mut operations = 0u64;
    for context in contexts {
        for type_fields in objects(&context["types"]) {
            for field in objects(type_fields) {
                fields += field["count"].as_u64().unwrap_or(0);
            }
        }
        for operation in objects(&context["operations"]) {
            operations += operation["count"].as_u64().unwrap_or(0);
        }
    }

    stats.metrics_snapshots.fetch_add(1, Ordering::Relaxed);
    stats.field_samples.fetch_add(fields, Ordering::Relaxed);
    stats.operation_samples.fetch_add(operations, Ordering::Relaxed);

    println!(
        "📥 metrics      @ {}  contexts={:<3} field samples={:<6} operation samples={}",
        snapshot["timestamp"].as_str().unwrap_or("?"),
        contexts.len(),
        fields,
        operations,
    );
    StatusCode::OK
}

async fn receive_definitions(
    State(stats): State<Arc<CollectorStats>>,
    Json(snapshot): Json<Value>,
) -> StatusCode {
    let operations = snapshot["operations"].as_array().map(Vec::as_slice).unwrap_or_default();

    stats.definitions_snapshots.fetch_add(1, Ordering::Relaxed);
    stats.definitions.fetch_add(operations.len() as u64, Ordering::Relaxed);

    println!(
        "📥 definitions  @ {}  new operations={}",
        snapshot["timestamp"].as_str().unwrap_or("?"),
        operations.len(),
    );
    for operation in operations {
        let hash = operation["hash"].as_str().unwrap_or_default();
        println!(
            "     {:<14} {}…",
            operation["name"].as_str().unwrap_or_default(),
            hash.get(..12).unwrap_or(hash),
        );
    }
    StatusCode::OK
}

fn objects(value: &Value) -> impl Iterator<Item = &Value> {
    value.as_object().into_iter().flat_map(|map| map.values())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use axum::body::Body;
    use axum::http::{header, Request};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tower::ServiceExt;

    use super::*;

    fn gzip(json: &Value) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.to_string().as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn request(uri: &str, json: &Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Body::from(gzip(json)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_receive_gzip_metrics() {
        let stats = Arc::new(CollectorStats::default());
        let snapshot = serde_json::json!({
            "timestamp": "2024-01-01T00:00:00Z",
            "contexts": [{
                "context": {"clientName": "web", "clientVersion": "1", "serverVersion": "S1"},
                "types": {"Query": {"user": {"returnType": "User", "count": 4, "errorCount": 0,
                    "histogram": {"indexes": [10], "counts": [4]}}}},
                "operations": {"h1": {"count": 2, "errorCount": 1,
                    "histogram": {"indexes": [12], "counts": [2]}}}
            }]
        });

        let response = create_router(Arc::clone(&stats))
            .oneshot(request("/reporting/metrics", &snapshot))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stats.metrics_snapshots.load(Ordering::Relaxed), 1);
        assert_eq!(stats.field_samples.load(Ordering::Relaxed), 4);
        assert_eq!(stats.operation_samples.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_receive_gzip_definitions() {
        let stats = Arc::new(CollectorStats::default());
        let snapshot = serde_json::json!({
            "timestamp": "2024-01-01T00:00:00Z",
            "operations": [{"name": "GetUser", "hash": "abcdef0123456789", "signature": "query GetUser { user }"}]
        });

        let response = create_router(Arc::clone(&stats))
            .oneshot(request("/reporting/definitions", &snapshot))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stats.definitions.load(Ordering::Relaxed), 1);
    }
}
