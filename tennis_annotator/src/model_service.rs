use thiserror::Error;

/// A single detected object, in pixel coordinates of the frame it was found in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Detection {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Failed to preprocess frame: {0}")]
    Preprocess(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
}

pub trait Detector<F>: Send + Sync {
    fn detect(&self, frame: &F) -> Result<Vec<Detection>, DetectionError>;
}
