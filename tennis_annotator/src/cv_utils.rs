use crate::{labels::LabelMap, model_service::Detection};
use opencv::{
    core::{Mat, Point, Rect, Scalar},
    imgproc,
    prelude::*,
};
use thiserror::Error;

const UNKNOWN_CLASS_COLOR: (u8, u8, u8) = (255, 255, 255);

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

pub trait FrameRenderer<F>: Send + Sync {
    /// Draws `detections` onto a copy of `frame`, leaving the original untouched.
    fn render(&self, frame: &F, detections: &[Detection]) -> Result<F, RenderError>;
}

pub struct CvRenderer {
    labels: LabelMap,
}

impl CvRenderer {
    pub fn new(labels: LabelMap) -> Self {
        Self { labels }
    }

    fn label_for(&self, detection: &Detection) -> (String, Scalar) {
        let (label, (red, green, blue)) = match self.labels.get(detection.class_id) {
            Some(color_label) => (
                color_label.label.clone(),
                (color_label.red, color_label.green, color_label.blue),
            ),
            None => (
                format!("Unknown class {}", detection.class_id),
                UNKNOWN_CLASS_COLOR,
            ),
        };
        let text = format!("{}: {:.2}", label, detection.confidence);
        let color = Scalar::new(blue as f64, green as f64, red as f64, 0.0);
        (text, color)
    }

    pub fn annotate(&self, mat: &mut Mat, detections: &[Detection]) -> Result<(), RenderError> {
        for detection in detections {
            let x1 = detection.x1 as i32;
            let y1 = detection.y1 as i32;
            let x2 = detection.x2 as i32;
            let y2 = detection.y2 as i32;
            let (label, color) = self.label_for(detection);

            imgproc::rectangle(
                mat,
                Rect::new(x1, y1, (x2 - x1).max(1), (y2 - y1).max(1)),
                color,
                2,
                imgproc::LINE_8,
                0,
            )?;

            imgproc::put_text(
                mat,
                &label,
                Point::new(x1, (y1 - 5).max(10)),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                color,
                1,
                imgproc::LINE_AA,
                false,
            )?;
        }
        Ok(())
    }
}

impl FrameRenderer<Mat> for CvRenderer {
    fn render(&self, frame: &Mat, detections: &[Detection]) -> Result<Mat, RenderError> {
        let mut annotated = frame.try_clone()?;
        self.annotate(&mut annotated, detections)?;
        Ok(annotated)
    }
}
