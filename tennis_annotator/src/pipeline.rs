use crate::{
    cv_utils::FrameRenderer,
    model_service::Detector,
    progress::ProgressObserver,
    video::{FrameSink, FrameSource, VideoMetadata},
};
use serde::Serialize;

/// Why the frame loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Every frame announced by the input metadata was written.
    Exhausted,
    /// The input ran out of frames before the announced count.
    EndOfStream { index: usize },
    ReadFailed { index: usize },
    InferenceFailed { index: usize },
    RenderFailed { index: usize },
    WriteFailed { index: usize },
    InputUnavailable,
    OutputUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Complete,
    Truncated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_written: usize,
    pub stop: StopReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessReport {
    pub metadata: Option<VideoMetadata>,
    pub expected_frames: usize,
    pub frames_written: usize,
    pub output_exists: bool,
    pub stop: StopReason,
}

impl ProcessReport {
    pub fn unavailable(stop: StopReason, output_exists: bool) -> Self {
        Self {
            metadata: None,
            expected_frames: 0,
            frames_written: 0,
            output_exists,
            stop,
        }
    }

    /// The output file exists, whether or not every frame made it into it.
    pub fn is_success(&self) -> bool {
        self.output_exists
    }

    pub fn status(&self) -> ProcessStatus {
        if !self.output_exists {
            ProcessStatus::Failed
        } else if self.stop == StopReason::Exhausted
            && self.frames_written == self.expected_frames
        {
            ProcessStatus::Complete
        } else {
            ProcessStatus::Truncated
        }
    }
}

/// Reads, annotates and writes frames strictly one after the other.
pub struct FramePipeline<'a, D, R> {
    detector: &'a D,
    renderer: &'a R,
}

impl<'a, D, R> FramePipeline<'a, D, R> {
    pub fn new(detector: &'a D, renderer: &'a R) -> Self {
        Self { detector, renderer }
    }

    /// Runs the frame loop, then releases both streams whichever way the loop ended.
    pub fn run<S, K>(
        &self,
        source: &mut S,
        sink: &mut K,
        observer: &dyn ProgressObserver,
    ) -> RunSummary
    where
        S: FrameSource,
        K: FrameSink<S::Frame>,
        D: Detector<S::Frame>,
        R: FrameRenderer<S::Frame>,
    {
        let total = source.metadata().frame_count;
        let mut frames_written = 0;
        let mut stop = StopReason::Exhausted;

        for index in 0..total {
            if let Err(reason) = self.process_frame(index, source, sink) {
                stop = reason;
                break;
            }
            frames_written += 1;
            observer.on_progress((index + 1) as f64 / total as f64);
        }

        if let Err(e) = source.release() {
            tracing::warn!("Failed to release input stream: {}", e);
        }
        if let Err(e) = sink.release() {
            tracing::warn!("Failed to release output stream: {}", e);
        }

        RunSummary {
            frames_written,
            stop,
        }
    }

    fn process_frame<S, K>(
        &self,
        index: usize,
        source: &mut S,
        sink: &mut K,
    ) -> Result<(), StopReason>
    where
        S: FrameSource,
        K: FrameSink<S::Frame>,
        D: Detector<S::Frame>,
        R: FrameRenderer<S::Frame>,
    {
        let frame = match source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::warn!("Input ended early at frame {}", index);
                return Err(StopReason::EndOfStream { index });
            }
            Err(e) => {
                tracing::warn!("Stopping at frame {}: {}", index, e);
                return Err(StopReason::ReadFailed { index });
            }
        };

        let detections = self.detector.detect(&frame).map_err(|e| {
            tracing::warn!("Stopping at frame {}: {}", index, e);
            StopReason::InferenceFailed { index }
        })?;

        let annotated = self.renderer.render(&frame, &detections).map_err(|e| {
            tracing::warn!("Stopping at frame {}: {}", index, e);
            StopReason::RenderFailed { index }
        })?;

        sink.write_frame(&annotated).map_err(|e| {
            tracing::warn!("Stopping at frame {}: {}", index, e);
            StopReason::WriteFailed { index }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cv_utils::RenderError,
        model_service::{Detection, DetectionError},
        video::VideoError,
    };
    use std::sync::Mutex;

    type Frame = Vec<u8>;

    struct MemorySource {
        metadata: VideoMetadata,
        frames: Vec<Frame>,
        fail_at: Option<usize>,
        position: usize,
        released: bool,
    }

    impl MemorySource {
        fn new(frame_count: usize, available: usize) -> Self {
            Self {
                metadata: VideoMetadata {
                    fps: 30.0,
                    width: 640,
                    height: 360,
                    frame_count,
                },
                frames: (0..available).map(|i| vec![i as u8; 4]).collect(),
                fail_at: None,
                position: 0,
                released: false,
            }
        }

        fn failing_at(mut self, index: usize) -> Self {
            self.fail_at = Some(index);
            self
        }
    }

    impl FrameSource for MemorySource {
        type Frame = Frame;

        fn metadata(&self) -> VideoMetadata {
            self.metadata
        }

        fn read_frame(&mut self) -> Result<Option<Frame>, VideoError> {
            if self.fail_at == Some(self.position) {
                return Err(VideoError::ReadFrameFailed(opencv::Error::new(
                    opencv::core::StsError,
                    "corrupt packet",
                )));
            }
            let frame = self.frames.get(self.position).cloned();
            self.position += 1;
            Ok(frame)
        }

        fn release(&mut self) -> Result<(), VideoError> {
            self.released = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemorySink {
        frames: Vec<Frame>,
        released: bool,
    }

    impl FrameSink<Frame> for MemorySink {
        fn write_frame(&mut self, frame: &Frame) -> Result<(), VideoError> {
            assert!(!self.released, "write after release");
            self.frames.push(frame.clone());
            Ok(())
        }

        fn release(&mut self) -> Result<(), VideoError> {
            self.released = true;
            Ok(())
        }
    }

    struct StubDetector {
        fail_on_value: Option<u8>,
        detections: Vec<Detection>,
    }

    impl StubDetector {
        fn empty() -> Self {
            Self {
                fail_on_value: None,
                detections: vec![],
            }
        }
    }

    impl Detector<Frame> for StubDetector {
        fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
            if Some(frame[0]) == self.fail_on_value {
                return Err(DetectionError::Inference("session crashed".to_string()));
            }
            Ok(self.detections.clone())
        }
    }

    /// Marks the frame's last byte with the number of detections drawn.
    struct CountingRenderer;

    impl FrameRenderer<Frame> for CountingRenderer {
        fn render(&self, frame: &Frame, detections: &[Detection]) -> Result<Frame, RenderError> {
            let mut annotated = frame.clone();
            if let Some(last) = annotated.last_mut() {
                *last += detections.len() as u8;
            }
            Ok(annotated)
        }
    }

    fn run(
        source: &mut MemorySource,
        detector: &StubDetector,
    ) -> (RunSummary, MemorySink, Vec<f64>) {
        let progress = Mutex::new(Vec::new());
        let observer = |fraction: f64| progress.lock().unwrap().push(fraction);
        let mut sink = MemorySink::default();

        let summary =
            FramePipeline::new(detector, &CountingRenderer).run(source, &mut sink, &observer);

        let progress = progress.into_inner().unwrap();
        (summary, sink, progress)
    }

    #[test]
    fn test_full_run_reports_progress_per_frame() {
        let mut source = MemorySource::new(10, 10);

        let (summary, sink, progress) = run(&mut source, &StubDetector::empty());

        assert_eq!(summary.frames_written, 10);
        assert_eq!(summary.stop, StopReason::Exhausted);
        assert_eq!(
            progress,
            vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]
        );
        assert_eq!(sink.frames, source.frames);
        assert!(source.released);
        assert!(sink.released);
    }

    #[test]
    fn test_read_failure_truncates_output() {
        let mut source = MemorySource::new(10, 10).failing_at(4);

        let (summary, sink, progress) = run(&mut source, &StubDetector::empty());

        assert_eq!(summary.frames_written, 4);
        assert_eq!(summary.stop, StopReason::ReadFailed { index: 4 });
        assert_eq!(sink.frames.len(), 4);
        assert_eq!(progress, vec![0.1, 0.2, 0.3, 0.4]);
        assert!(source.released);
        assert!(sink.released);
    }

    #[test]
    fn test_input_shorter_than_metadata() {
        let mut source = MemorySource::new(10, 6);

        let (summary, sink, _) = run(&mut source, &StubDetector::empty());

        assert_eq!(summary.stop, StopReason::EndOfStream { index: 6 });
        assert_eq!(sink.frames.len(), 6);
    }

    #[test]
    fn test_metadata_count_bounds_the_loop() {
        let mut source = MemorySource::new(3, 5);

        let (summary, sink, progress) = run(&mut source, &StubDetector::empty());

        assert_eq!(summary.frames_written, 3);
        assert_eq!(summary.stop, StopReason::Exhausted);
        assert_eq!(sink.frames.len(), 3);
        assert_eq!(progress.last(), Some(&1.0));
    }

    #[test]
    fn test_zero_frames() {
        let mut source = MemorySource::new(0, 0);

        let (summary, sink, progress) = run(&mut source, &StubDetector::empty());

        assert_eq!(summary.frames_written, 0);
        assert_eq!(summary.stop, StopReason::Exhausted);
        assert!(sink.frames.is_empty());
        assert!(progress.is_empty());
        assert!(sink.released);
    }

    #[test]
    fn test_inference_failure_stops_run() {
        let mut source = MemorySource::new(5, 5);
        let detector = StubDetector {
            fail_on_value: Some(2),
            detections: vec![],
        };

        let (summary, sink, _) = run(&mut source, &detector);

        assert_eq!(summary.stop, StopReason::InferenceFailed { index: 2 });
        assert_eq!(sink.frames.len(), 2);
        assert!(sink.released);
    }

    #[test]
    fn test_detections_are_rendered_in_order() {
        let mut source = MemorySource::new(3, 3);
        let detection = Detection {
            class_id: 0,
            confidence: 0.9,
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
        };
        let detector = StubDetector {
            fail_on_value: None,
            detections: vec![detection, detection],
        };

        let (_, sink, _) = run(&mut source, &detector);

        assert_eq!(
            sink.frames,
            vec![vec![0, 0, 0, 2], vec![1, 1, 1, 3], vec![2, 2, 2, 4]]
        );
    }

    #[test]
    fn test_report_status() {
        let mut report = ProcessReport {
            metadata: None,
            expected_frames: 10,
            frames_written: 10,
            output_exists: true,
            stop: StopReason::Exhausted,
        };
        assert_eq!(report.status(), ProcessStatus::Complete);
        assert!(report.is_success());

        report.frames_written = 4;
        report.stop = StopReason::ReadFailed { index: 4 };
        assert_eq!(report.status(), ProcessStatus::Truncated);
        assert!(report.is_success());

        let report = ProcessReport::unavailable(StopReason::InputUnavailable, false);
        assert_eq!(report.status(), ProcessStatus::Failed);
        assert!(!report.is_success());
    }
}
