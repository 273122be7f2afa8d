mod error;
mod executor;
mod grader;
mod handlers;
mod languages;
mod runner;
mod store;
mod system_monitor;
#[cfg(test)]
mod testing;
mod types;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use config::Config;
use dotenvy::dotenv;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::{
    executor::ExecutorRegistry,
    grader::GradingService,
    store::{MemoryStore, RedisStore, Store, load_problems},
    types::{AppConfig, AppState, StorageBackend},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let settings = Config::builder()
        .add_source(config::File::with_name("Settings").required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()
        .context("failed to load settings")?;

    let app_config: AppConfig = settings
        .try_deserialize()
        .context("invalid settings")?;

    let level: tracing::Level = app_config
        .log_level
        .parse()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus recorder")?;

    describe_counter!("requests_total", "Total number of submit requests");
    describe_counter!("submissions_total", "Graded submissions by verdict");
    describe_counter!("executions_total", "Sandboxed executions by outcome");
    describe_histogram!("execution_time_ms", "Wall time of one sandboxed execution");
    describe_histogram!(
        "grading_duration_ms",
        "Total grading time including persistence"
    );
    describe_gauge!("active_executions", "Number of sandboxed executions running");
    describe_gauge!("host_memory_used_bytes", "Used host memory in bytes");
    describe_gauge!("host_memory_total_bytes", "Total host memory in bytes");
    describe_gauge!("host_cpu_usage_percent", "Host CPU usage in percent");
    describe_gauge!("workspace_disk_free_bytes", "Free space on the workspace disk");
    describe_gauge!("workspace_disk_total_bytes", "Size of the workspace disk");

    std::fs::create_dir_all(&app_config.base_code_path)
        .with_context(|| format!("failed to create {}", app_config.base_code_path))?;
    system_monitor::start_system_monitor(
        PathBuf::from(&app_config.base_code_path),
        Duration::from_secs(app_config.monitor_interval_secs.max(1)),
    );

    let store: Arc<dyn Store> = match app_config.storage {
        StorageBackend::Redis => {
            let client = redis::Client::open(app_config.redis_url.as_str())
                .context("invalid redis url")?;
            let con = client
                .get_multiplexed_async_connection()
                .await
                .context("failed to connect to redis")?;
            Arc::new(RedisStore::new(con))
        }
        StorageBackend::Memory => {
            let path = app_config
                .problems_path
                .as_deref()
                .context("storage = \"memory\" needs problems_path")?;
            let problems = load_problems(Path::new(path))
                .with_context(|| format!("failed to load problems from {}", path))?;
            tracing::warn!(
                problems = problems.len(),
                "using in-memory store, nothing will be persisted"
            );
            Arc::new(MemoryStore::with_problems(problems))
        }
    };

    let executors = ExecutorRegistry::sandboxed(&app_config.sandbox, &app_config.base_code_path);
    tracing::info!(languages = ?executors.languages(), "executors registered");

    let grader = GradingService::new(
        store,
        Arc::new(executors),
        &app_config.sandbox,
        app_config.grading.clone(),
    );

    let app = handlers::router(AppState {
        grader: Arc::new(grader),
        prometheus_handle: handle,
    });

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", app_config.port))
        .await
        .with_context(|| format!("failed to bind port {}", app_config.port))?;

    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
