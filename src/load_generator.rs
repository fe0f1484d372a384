use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue};
use graphql_usage::client::{CLIENT_NAME_HEADER, CLIENT_VERSION_HEADER};
use graphql_usage::{FieldInfo, OperationKind, OperationObservation, Submission, UsageExtension};
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use tokio::time::Instant;

pub const SCHEMA: &str = r#"
type User {
    id: ID!
    name: String
    posts(first: Int): [Post!]!
}

type Post {
    id: ID!
    title: String
}

input UserFilter {
    name: String
}

type Query {
    user(id: ID!): User
    users(first: Int, filter: UserFilter): [User!]!
    post(id: ID!): Post
}

type Mutation {
    createPost(title: String!): Post
}
"#;

// ─── Scenarios ───────────────────────────────────────────────────

struct Scenario {
    name: &'static str,
    kind: OperationKind,
    /// Builds the query text with a fresh literal, so every request looks
    /// different while sharing one signature.
    query: fn(u32) -> String,
    /// (parent type, field, return type) resolved by the request.
    fields: &'static [(&'static str, &'static str, &'static str)],
}

fn get_user(id: u32) -> String {
    format!(r#"query GetUser {{ user(id: "usr_{id}") {{ id name }} }}"#)
}

fn user_posts(n: u32) -> String {
    format!(
        r#"query UserPosts {{ user(id: "usr_{n}") {{ ...Author posts(first: {first}) {{ id title }} }} }}
           fragment Author on User {{ id name }}"#,
        first = n % 20 + 1,
    )
}

fn search_users(n: u32) -> String {
    format!(r#"query SearchUsers {{ users(first: {n}, filter: {{name: "bench"}}) {{ id }} }}"#)
}

fn create_post(n: u32) -> String {
    format!(r#"mutation CreatePost {{ createPost(title: "post {n}") {{ id }} }}"#)
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "GetUser",
        kind: OperationKind::Query,
        query: get_user,
        fields: &[("Query", "user", "User"), ("User", "id", "ID"), ("User", "name", "String")],
    },
    Scenario {
        name: "UserPosts",
        kind: OperationKind::Query,
        query: user_posts,
        fields: &[
            ("Query", "user", "User"),
            ("User", "id", "ID"),
            ("User", "name", "String"),
            ("User", "posts", "Post"),
            ("Post", "id", "ID"),
            ("Post", "title", "String"),
        ],
    },
    Scenario {
        name: "SearchUsers",
        kind: OperationKind::Query,
        query: search_users,
        fields: &[("Query", "users", "User"), ("User", "id", "ID")],
    },
    Scenario {
        name: "CreatePost",
        kind: OperationKind::Mutation,
        query: create_post,
        fields: &[("Mutation", "createPost", "Post"), ("Post", "id", "ID")],
    },
];

const CLIENTS: &[(&str, &str)] = &[("web", "3.2.0"), ("ios", "1.14.2"), ("android", "1.13.0"), ("", "")];

// ─── Report ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct LoadReport {
    pub operations: AtomicU64,
    pub fields: AtomicU64,
    pub dropped: AtomicU64,
    pub signature_errors: AtomicU64,
}

impl LoadReport {
    fn count(&self, submission: Submission) {
        if matches!(submission, Submission::Dropped | Submission::Closed) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `concurrency` Tokio tasks that issue synthetic requests through
/// `extension` until `duration` has elapsed.
pub async fn run(
    extension: Arc<UsageExtension<HeaderMap>>,
    concurrency: u32,
    duration: Duration,
) -> Arc<LoadReport> {
    let deadline = Instant::now() + duration;
    let report = Arc::new(LoadReport::default());

    let mut handles = Vec::with_capacity(concurrency as usize);
    for worker_id in 0..concurrency {
        let extension = Arc::clone(&extension);
        let report = Arc::clone(&report);
        handles.push(tokio::spawn(async move {
            worker(worker_id, extension, report, deadline).await;
        }));
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "load generator worker failed");
        }
    }
    report
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(
    id: u32,
    extension: Arc<UsageExtension<HeaderMap>>,
    report: Arc<LoadReport>,
    deadline: Instant,
) {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);

    while Instant::now() < deadline {
        let scenario = &SCENARIOS[rng.gen_range(0..SCENARIOS.len())];
        let (client_name, client_version) = CLIENTS[rng.gen_range(0..CLIENTS.len())];
        let ctx = client_headers(client_name, client_version);

        let t0 = Instant::now();
        let mut has_errors = false;

        for (type_name, field_name, return_type) in scenario.fields {
            let latency = Duration::from_micros(rng.gen_range(50..3_000));
            let fails = rng.gen_bool(0.02);

            let result: Result<(), String> = extension
                .time_field(&ctx, FieldInfo::new(*type_name, *field_name, *return_type), async move {
                    tokio::time::sleep(latency).await;
                    if fails {
                        Err(format!("{type_name}.{field_name} failed"))
                    } else {
                        Ok(())
                    }
                })
                .await;

            has_errors |= result.is_err();
            report.fields.fetch_add(1, Ordering::Relaxed);
        }

        let observation = OperationObservation {
            name: scenario.name.to_owned(),
            kind: scenario.kind,
            query: (scenario.query)(rng.gen_range(1..=10_000)),
            has_errors,
            duration: t0.elapsed(),
        };
        match extension.record_operation(&ctx, observation) {
            Ok(submission) => report.count(submission),
            Err(_) => {
                report.signature_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        report.operations.fetch_add(1, Ordering::Relaxed);
    }
}

fn client_headers(name: &'static str, version: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if !name.is_empty() {
        headers.insert(CLIENT_NAME_HEADER, HeaderValue::from_static(name));
        headers.insert(CLIENT_VERSION_HEADER, HeaderValue::from_static(version));
    }
    headers
}
