use anyhow::{Context as _, Result};
use git_gateway::api::server::run_api;
use git_gateway::config::{Config, RepoRoot};
use git_gateway::logging::init_tracing;
use git_gateway::metrics_exporter::init_metrics;
use git_gateway::state::build_state;
use git_gateway::supervisor::Supervisor;
use tracing::info;

fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    init_metrics()?;
    let root = RepoRoot::prepare(&config)?;
    let state = build_state(&config, root.path());
    info!(
        git_bin = %config.git_bin.display(),
        workers = config.workers,
        max_concurrency = config.git_max_concurrency,
        timeout_ms = config.git_timeout.as_millis() as u64,
        "starting git gateway"
    );

    let mut supervisor = Supervisor::new();
    let host = config.host.clone();
    let port = config.port;
    supervisor.spawn("api", move |shutdown| async move {
        run_api(state, &host, port, shutdown).await
    });
    let result = supervisor.run().await;

    if root.is_temporary() {
        info!(root = %root.path().display(), "removing temporary repository root");
    }
    drop(root);
    result
}
