use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Failed to open input video {0:?}")]
    OpenInputFailed(PathBuf),
    #[error("Failed to open output video {0:?}")]
    OpenOutputFailed(PathBuf),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("Failed to write frame: {0}")]
    WriteFrameFailed(opencv::Error),
    #[error("Frame is {actual:?}, output expects {expected:?}")]
    FrameSizeMismatch { expected: Size, actual: Size },
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

/// Stream parameters read once when the input is opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    pub fps: f64,
    pub width: i32,
    pub height: i32,
    pub frame_count: usize,
}

pub trait FrameSource {
    type Frame;

    fn metadata(&self) -> VideoMetadata;

    /// Returns `Ok(None)` once no further frame can be read.
    fn read_frame(&mut self) -> Result<Option<Self::Frame>, VideoError>;

    fn release(&mut self) -> Result<(), VideoError>;
}

pub trait FrameSink<F> {
    fn write_frame(&mut self, frame: &F) -> Result<(), VideoError>;

    /// Flushes and closes the output. The file is only complete afterwards.
    fn release(&mut self) -> Result<(), VideoError>;
}

// Container metadata is trusted as is: a negative or NaN count reads as zero frames.
fn frame_count_from(value: f64) -> usize {
    if value.is_finite() && value > 0.0 {
        value as usize
    } else {
        0
    }
}

pub struct CvVideoSource {
    capture: videoio::VideoCapture,
    metadata: VideoMetadata,
}

impl CvVideoSource {
    pub fn open(path: &Path) -> Result<Self, VideoError> {
        let capture = videoio::VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)
            .map_err(|_| VideoError::OpenInputFailed(path.to_path_buf()))?;
        if !capture.is_opened()? {
            return Err(VideoError::OpenInputFailed(path.to_path_buf()));
        }

        let metadata = VideoMetadata {
            fps: capture.get(videoio::CAP_PROP_FPS)?,
            width: capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32,
            height: capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32,
            frame_count: frame_count_from(capture.get(videoio::CAP_PROP_FRAME_COUNT)?),
        };
        tracing::debug!("Opened {:?}: {:?}", path, metadata);

        Ok(Self { capture, metadata })
    }
}

impl FrameSource for CvVideoSource {
    type Frame = Mat;

    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn read_frame(&mut self) -> Result<Option<Mat>, VideoError> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .map_err(VideoError::ReadFrameFailed)?;
        if grabbed && !frame.empty() {
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }

    fn release(&mut self) -> Result<(), VideoError> {
        self.capture.release()?;
        Ok(())
    }
}

pub struct CvVideoSink {
    writer: videoio::VideoWriter,
    frame_size: Size,
}

impl CvVideoSink {
    pub fn create(
        path: &Path,
        metadata: &VideoMetadata,
        fourcc: [char; 4],
    ) -> Result<Self, VideoError> {
        let [c1, c2, c3, c4] = fourcc;
        let fourcc = videoio::VideoWriter::fourcc(c1, c2, c3, c4)?;
        let frame_size = Size::new(metadata.width, metadata.height);

        let writer = videoio::VideoWriter::new(
            &path.to_string_lossy(),
            fourcc,
            metadata.fps,
            frame_size,
            true,
        )
        .map_err(|_| VideoError::OpenOutputFailed(path.to_path_buf()))?;
        if !writer.is_opened()? {
            return Err(VideoError::OpenOutputFailed(path.to_path_buf()));
        }

        Ok(Self { writer, frame_size })
    }
}

impl FrameSink<Mat> for CvVideoSink {
    fn write_frame(&mut self, frame: &Mat) -> Result<(), VideoError> {
        let actual = frame.size()?;
        if actual != self.frame_size {
            return Err(VideoError::FrameSizeMismatch {
                expected: self.frame_size,
                actual,
            });
        }
        self.writer
            .write(frame)
            .map_err(VideoError::WriteFrameFailed)
    }

    fn release(&mut self) -> Result<(), VideoError> {
        self.writer.release()?;
        Ok(())
    }
}
