use crate::{
    config::{Config, JobsConfig},
    jobs::JobStore,
    processor::VideoProcessor,
    routes::api_routes,
    telemetry::Metrics,
    worker::JobRunner,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Clone)]
pub struct SharedState {
    pub jobs: Arc<JobStore>,
    pub runner: JobRunner,
    pub jobs_config: JobsConfig,
    pub metrics: Arc<Metrics>,
}

impl SharedState {
    pub fn new(
        processor: Arc<dyn VideoProcessor>,
        jobs: Arc<JobStore>,
        jobs_config: JobsConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let runner = JobRunner::new(
            processor,
            jobs.clone(),
            jobs_config.get_max_concurrent_jobs(),
            metrics.clone(),
        );
        Self {
            jobs,
            runner,
            jobs_config,
            metrics,
        }
    }
}

pub fn build_router(state: SharedState, max_upload_bytes: usize) -> Router {
    let metrics_layer = HttpMetricsLayerBuilder::new().build();

    Router::new()
        .merge(api_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(metrics_layer)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, config: &Config) -> anyhow::Result<Self> {
        let addr = config.server.get_address();
        let router = build_router(state, config.server.max_upload_bytes());
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}
