use crate::config::Config;
use crate::jobs::JobStore;
use crate::processor::VideoProcessor;
use crate::server::{HttpServer, SharedState};
use crate::telemetry::Metrics;

use std::{error::Error, sync::Arc, time::Duration};
use tennis_annotator::VideoAnnotator;
use tokio::{
    signal,
    sync::broadcast::{self, Receiver},
    task::JoinHandle,
};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let annotator = match VideoAnnotator::from_config(&config.get_annotator_config()) {
        Ok(annotator) => annotator,
        Err(e) => {
            tracing::error!("Failed to initialize video annotator: {:?}", e);
            return Err(Box::new(e));
        }
    };
    let processor: Arc<dyn VideoProcessor> = Arc::new(annotator);

    let metrics = Arc::new(Metrics::new()?);
    let jobs = Arc::new(JobStore::new());
    let state = SharedState::new(processor, jobs.clone(), config.jobs.clone(), metrics);

    let server = HttpServer::new(state, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();
    let sweeper_shutdown_rx = shutdown_tx.subscribe();

    let sweeper_handle = start_sweeping(
        jobs.clone(),
        config.jobs.get_job_ttl(),
        config.jobs.get_sweep_interval(),
        sweeper_shutdown_rx,
    );

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;
    let _ = sweeper_handle.await;

    let removed = jobs.clear();
    tracing::info!("Removed {} job(s) on shutdown", removed);

    Ok(())
}

/// Periodically deletes finished jobs older than `ttl` until shutdown.
fn start_sweeping(
    jobs: Arc<JobStore>,
    ttl: Duration,
    interval: Duration,
    mut shutdown_rx: Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = jobs.sweep(ttl);
                    if removed > 0 {
                        tracing::info!("Swept {} expired job(s)", removed);
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
