use std::path::Path;
use tennis_annotator::{ModelError, ProcessReport, ProgressObserver, VideoAnnotator};

/// Turns an uploaded video into its annotated copy.
pub trait VideoProcessor: Send + Sync + 'static {
    fn process(
        &self,
        input_path: &Path,
        output_path: &Path,
        observer: &dyn ProgressObserver,
    ) -> Result<ProcessReport, ModelError>;
}

impl VideoProcessor for VideoAnnotator {
    fn process(
        &self,
        input_path: &Path,
        output_path: &Path,
        observer: &dyn ProgressObserver,
    ) -> Result<ProcessReport, ModelError> {
        VideoAnnotator::process(self, input_path, output_path, observer)
    }
}
