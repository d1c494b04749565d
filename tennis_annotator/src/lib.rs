mod cv_utils;
mod ort_service;

pub mod annotator;
pub mod config;
pub mod labels;
pub mod model_provider;
pub mod model_service;
pub mod pipeline;
pub mod progress;
pub mod video;

pub use annotator::{AnnotatorError, VideoAnnotator};
pub use cv_utils::{CvRenderer, FrameRenderer, RenderError};
pub use model_provider::{ModelError, ModelProvider};
pub use model_service::{Detection, DetectionError, Detector};
pub use ort_service::{non_max_suppression, OrtDetector};
pub use pipeline::{FramePipeline, ProcessReport, ProcessStatus, StopReason};
pub use progress::{NoProgress, ProgressLogger, ProgressObserver};
