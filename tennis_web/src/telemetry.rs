use crate::jobs::JobStatus;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Failed to build prometheus exporter: {0}")]
    Exporter(String),
}

pub struct Metrics {
    request_counter: Counter<u64>,
    job_counter: Counter<u64>,
    frame_counter: Counter<u64>,
    processing_duration: Histogram<u64>,
    processing_fps: Gauge<f64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| MetricsError::Exporter(e.to_string()))?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("tennis_web");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let job_counter = meter
            .u64_counter("jobs_total")
            .with_description("Finished processing jobs by status")
            .build();

        let frame_counter = meter
            .u64_counter("frames_processed_total")
            .with_description("Annotated frames written to output videos")
            .build();

        let boundaries = generate_boundaries(
            (1_000, 10_000, 60_000, 300_000, 1_800_000),
            (3_000, 10_000, 60_000, 300_000),
        );

        let processing_duration = meter
            .u64_histogram("processing_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of video processing jobs in milliseconds")
            .build();

        let processing_fps = meter
            .f64_gauge("processing_fps")
            .with_description("Frames annotated per second by the last finished job")
            .build();

        Ok(Metrics {
            request_counter,
            job_counter,
            frame_counter,
            processing_duration,
            processing_fps,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_job(&self, status: JobStatus, frames_written: usize, duration_ms: u64) {
        let attributes = vec![KeyValue::new("status", status.as_str())];
        self.job_counter.add(1, &attributes);
        self.frame_counter.add(frames_written as u64, &[]);
        self.processing_duration.record(duration_ms, &attributes);

        if frames_written > 0 && duration_ms > 0 {
            let fps = frames_written as f64 / (duration_ms as f64 / 1000.0);
            self.processing_fps.record(fps, &[]);
        }
    }
}

/// Histogram boundaries that get coarser as durations grow: each `(start, end)` segment of
/// `parts` is walked with the matching entry of `steps`.
fn generate_boundaries(
    parts: (u64, u64, u64, u64, u64),
    steps: (usize, usize, usize, usize),
) -> Vec<f64> {
    let first_part = (parts.0..=parts.1).step_by(steps.0);
    let middle_part = (parts.1..=parts.2).step_by(steps.1);
    let end_part = (parts.2..=parts.3).step_by(steps.2);
    let tail_part = (parts.3..=parts.4).step_by(steps.3);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
