use anyhow::Context;
use relwatch_core::source::GitHubReleaseSource;
use relwatch_core::store::FileConfigStore;
use relwatch_core::WatchScheduler;
use relwatch_server::cluster::KubeController;
use relwatch_server::AppState;
use std::path::Path;
use std::sync::Arc;

pub fn run(config: &Path, host: &str, port: u16) -> anyhow::Result<()> {
    let store = FileConfigStore::open(config)
        .with_context(|| format!("failed to read config {}", config.display()))?;
    let settings = store.settings().clone();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let controller = KubeController::connect()
            .await
            .context("failed to connect to Kubernetes")?;
        let source = GitHubReleaseSource::new(settings.release_api_url.clone());
        let scheduler = Arc::new(WatchScheduler::new(
            Arc::new(store),
            Arc::new(source),
            Arc::new(controller),
            settings,
        )?);

        let resumed = scheduler.recover().await;
        tracing::info!(count = resumed.len(), "resumed monitoring");

        let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
        let addr = listener.local_addr()?;
        println!(
            "relwatch → http://{addr}  (config {}, {} watching)",
            config.display(),
            resumed.len()
        );

        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        };
        let result = relwatch_server::serve_on(listener, AppState::new(scheduler.clone()), shutdown)
            .await;

        // Desired state stays in the config so the next start resumes these.
        scheduler.shutdown().await;
        result
    })
}
