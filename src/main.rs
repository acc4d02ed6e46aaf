use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use services::{
    download_service::DownloadBroker, pipeline_service::PipelineService,
    session_store::SessionStore, worker_service::ProcessWorker,
    workspace_service::WorkspaceManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting taxdoc-gateway with config: {:?}", cfg);

    // --- Ensure upload directory exists ---
    if !cfg.upload_dir.exists() {
        fs::create_dir_all(&cfg.upload_dir)
            .with_context(|| format!("creating {}", cfg.upload_dir.display()))?;
        tracing::info!("Created upload directory at {}", cfg.upload_dir.display());
    }

    // --- Initialize core services ---
    let workspaces = WorkspaceManager::new(&cfg.upload_dir);
    let broker = DownloadBroker::new(SessionStore::new(), workspaces.clone(), &cfg.upload_dir)
        .with_context(|| format!("resolving {}", cfg.upload_dir.display()))?;
    let worker = ProcessWorker::new(
        cfg.worker_interpreter.clone(),
        cfg.scripts_dir.clone(),
        cfg.worker_timeout,
    );
    tracing::debug!(
        "worker: {} with scripts from {}",
        worker.interpreter(),
        cfg.scripts_dir.display()
    );
    let pipeline = PipelineService::new(cfg.limits, workspaces, Arc::new(worker), broker);

    // --- Defensive sweep ---
    let sweeper = pipeline.clone();
    let (session_ttl, orphan_max_age) = (cfg.session_ttl, cfg.orphan_max_age);
    let mut interval = tokio::time::interval(cfg.sweep_interval.max(Duration::from_secs(1)));
    tokio::spawn(async move {
        loop {
            interval.tick().await;
            sweeper.run_sweep(session_ttl, orphan_max_age).await;
        }
    });

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_body_bytes).with_state(pipeline);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
