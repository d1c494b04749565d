use crate::{
    jobs::{JobStore, NewJob},
    processor::VideoProcessor,
    telemetry::Metrics,
};
use std::{sync::Arc, time::Instant};
use tennis_annotator::ProcessReport;
use tokio::{sync::Semaphore, task::JoinHandle};

/// Runs uploaded jobs in the background, at most `max_concurrent_jobs` at a time.
#[derive(Clone)]
pub struct JobRunner {
    processor: Arc<dyn VideoProcessor>,
    jobs: Arc<JobStore>,
    permits: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl JobRunner {
    pub fn new(
        processor: Arc<dyn VideoProcessor>,
        jobs: Arc<JobStore>,
        max_concurrent_jobs: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            processor,
            jobs,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            metrics,
        }
    }

    pub fn spawn(&self, job: NewJob) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(job).await })
    }

    async fn run(self, job: NewJob) {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!("Job {} could not be scheduled: {}", job.id, e);
                self.complete(&job.id, Err("Job queue is closed".to_string()), 0);
                return;
            }
        };

        if let Err(e) = self.jobs.start(&job.id) {
            tracing::warn!("{}", e);
            return;
        }
        tracing::info!("Processing job {}", job.id);

        let started = Instant::now();
        let processor = self.processor.clone();
        let updates = job.updates.clone();
        let (input_path, output_path) = (job.input_path.clone(), job.output_path.clone());

        let result = tokio::task::spawn_blocking(move || {
            let observer = move |fraction: f64| {
                updates.send_modify(|snapshot| snapshot.progress = Some(fraction));
            };
            processor.process(&input_path, &output_path, &observer)
        })
        .await;

        let outcome = match result {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => {
                tracing::error!("Job {} failed: {}", job.id, e);
                Err(e.to_string())
            }
            Err(e) => {
                tracing::error!("Job {} panicked or was cancelled: {}", job.id, e);
                Err("Processing task did not finish".to_string())
            }
        };

        self.complete(&job.id, outcome, started.elapsed().as_millis() as u64);
    }

    fn complete(&self, id: &str, outcome: Result<ProcessReport, String>, duration_ms: u64) {
        match self.jobs.finish(id, outcome) {
            Ok(snapshot) => {
                self.metrics
                    .record_job(snapshot.status, snapshot.frames_written, duration_ms);
                tracing::info!(
                    frames_written = snapshot.frames_written,
                    expected_frames = snapshot.expected_frames,
                    duration_ms,
                    "Job {} finished with status {}",
                    id,
                    snapshot.status.as_str()
                );
            }
            Err(e) => tracing::warn!("{}", e),
        }
    }
}
