use std::error::Error;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use graphql_usage::logging::init_tracing;
use graphql_usage::{Configuration, HeaderExtractor, Schema, UsageExtension};
use tokio::sync::oneshot;

mod load_generator;
mod server;

const COLLECTOR_ADDR: &str = "127.0.0.1:4040";
const CONCURRENCY: u32 = 8;
const DEFAULT_DURATION_SECS: u64 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // First argument: how long to generate load, in seconds.
    let duration_secs = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_DURATION_SECS);

    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║   🔬  GRAPHQL USAGE REPORTING LOAD GENERATOR     ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    init_tracing(false);

    // ── 1. Start the local collector ─────────────────────────────
    let stats = Arc::new(server::CollectorStats::default());
    let app = server::create_router(Arc::clone(&stats));
    let listener = tokio::net::TcpListener::bind(COLLECTOR_ADDR).await?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let collector = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });
    println!("📡 Collector listening on http://{COLLECTOR_ADDR}/reporting");

    // ── 2. Configure the pipeline ────────────────────────────────
    let mut config = Configuration::new("loadgen-demo-key")
        .with_endpoint("http", COLLECTOR_ADDR)
        .with_server_version("loadgen");
    config.flush_interval = Duration::from_secs(2);
    config.validate()?;

    let schema = Arc::new(Schema::parse(load_generator::SCHEMA)?);
    let extension: Arc<UsageExtension<HeaderMap>> = Arc::new(
        UsageExtension::new(&config, schema)?.with_extractor(HeaderExtractor::default()),
    );
    extension.start()?;

    // ── 3. Generate load ─────────────────────────────────────────
    println!("🚀 Running {CONCURRENCY} workers for {duration_secs}s (flush every 2s)");
    println!();
    let report =
        load_generator::run(Arc::clone(&extension), CONCURRENCY, Duration::from_secs(duration_secs))
            .await;

    // ── 4. Drain, flush, wait for deliveries ─────────────────────
    extension.close().await?;
    let _ = shutdown_tx.send(());
    collector.await??;

    println!();
    println!("── Load ──────────────────────────────────────────────");
    println!("   operations       {}", report.operations.load(Ordering::Relaxed));
    println!("   field samples    {}", report.fields.load(Ordering::Relaxed));
    println!("   dropped          {}", report.dropped.load(Ordering::Relaxed));
    println!("   signature errors {}", report.signature_errors.load(Ordering::Relaxed));
    println!("── Collector ─────────────────────────────────────────");
    println!("   metrics snapshots     {}", stats.metrics_snapshots.load(Ordering::Relaxed));
    println!("   definition snapshots  {}", stats.definitions_snapshots.load(Ordering::Relaxed));
    println!("   field samples         {}", stats.field_samples.load(Ordering::Relaxed));
    println!("   operation samples     {}", stats.operation_samples.load(Ordering::Relaxed));
    println!("   definitions           {}", stats.definitions.load(Ordering::Relaxed));
    println!();

    Ok(())
}
