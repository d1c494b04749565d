use crate::{
    config::Config,
    cv_utils::CvRenderer,
    labels::{LabelMap, LabelsError},
    model_provider::{ModelError, ModelProvider},
    model_service::Detector,
    ort_service::OrtDetector,
    pipeline::{FramePipeline, ProcessReport, StopReason},
    progress::ProgressObserver,
    video::{CvVideoSink, CvVideoSource, FrameSource},
};
use opencv::core::Mat;
use std::{path::Path, time::Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnnotatorError {
    #[error("Failed to load labels: {0}")]
    Labels(#[from] LabelsError),
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

/// Owns the lazily loaded model and turns input videos into annotated copies.
pub struct VideoAnnotator<M = OrtDetector> {
    provider: ModelProvider<M>,
    renderer: CvRenderer,
    fourcc: [char; 4],
}

impl VideoAnnotator<OrtDetector> {
    pub fn from_config(config: &Config) -> Result<Self, AnnotatorError> {
        let labels = LabelMap::from_config(&config.labels)?;
        let fourcc = config
            .pipeline
            .fourcc_chars()
            .map_err(AnnotatorError::InvalidConfig)?;

        Ok(Self::new(
            ModelProvider::from_config(&config.model),
            CvRenderer::new(labels),
            fourcc,
        ))
    }
}

impl<M> VideoAnnotator<M>
where
    M: Detector<Mat>,
{
    pub fn new(provider: ModelProvider<M>, renderer: CvRenderer, fourcc: [char; 4]) -> Self {
        Self {
            provider,
            renderer,
            fourcc,
        }
    }

    pub fn provider(&self) -> &ModelProvider<M> {
        &self.provider
    }

    /// Annotates `input_path` into `output_path`.
    ///
    /// Only a model that cannot be loaded is an error. Every other failure is folded into the
    /// report, whose `is_success` tells whether an output file was produced.
    pub fn process(
        &self,
        input_path: &Path,
        output_path: &Path,
        observer: &dyn ProgressObserver,
    ) -> Result<ProcessReport, ModelError> {
        let model = self.provider.get_model()?;
        let started = Instant::now();

        let mut source = match CvVideoSource::open(input_path) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!("{}", e);
                return Ok(ProcessReport::unavailable(
                    StopReason::InputUnavailable,
                    output_path.is_file(),
                ));
            }
        };
        let metadata = source.metadata();

        let mut sink = match CvVideoSink::create(output_path, &metadata, self.fourcc) {
            Ok(sink) => sink,
            Err(e) => {
                tracing::warn!("{}", e);
                if let Err(e) = source.release() {
                    tracing::warn!("Failed to release input stream: {}", e);
                }
                return Ok(ProcessReport::unavailable(
                    StopReason::OutputUnavailable,
                    output_path.is_file(),
                ));
            }
        };

        let summary = FramePipeline::new(model.as_ref(), &self.renderer).run(
            &mut source,
            &mut sink,
            observer,
        );

        let report = ProcessReport {
            metadata: Some(metadata),
            expected_frames: metadata.frame_count,
            frames_written: summary.frames_written,
            output_exists: output_path.is_file(),
            stop: summary.stop,
        };

        let elapsed = started.elapsed();
        tracing::info!(
            frames_written = report.frames_written,
            expected_frames = report.expected_frames,
            elapsed_ms = elapsed.as_millis() as u64,
            "Processed {:?} with status {:?}",
            input_path,
            report.status()
        );

        Ok(report)
    }
}
