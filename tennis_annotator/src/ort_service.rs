use crate::{
    config::{ModelConfig, Validatable},
    model_provider::ModelError,
    model_service::{Detection, DetectionError, Detector},
};
use ndarray::{Array, ArrayViewD, Axis, Ix2, Ix4};
use opencv::{
    core::{Mat, Size, CV_8UC3},
    imgproc,
    prelude::*,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::Mutex;

fn intersection(box1: &Detection, box2: &Detection) -> f32 {
    (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.0)
        * (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.0)
}

fn union(box1: &Detection, box2: &Detection) -> f32 {
    box1.area() + box2.area() - intersection(box1, box2)
}

fn iou(box1: &Detection, box2: &Detection) -> f32 {
    let union = union(box1, box2);
    if union <= 0.0 {
        return 0.0;
    }
    intersection(box1, box2) / union
}

/// Greedy, class-agnostic suppression: keeps the most confident box of every overlapping group.
pub fn non_max_suppression(mut boxes: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result = Vec::new();
    while !boxes.is_empty() {
        let best = boxes.remove(0);
        boxes.retain(|candidate| iou(&best, candidate) < iou_threshold);
        result.push(best);
    }

    result
}

fn transform_frame(frame: &Mat, input_size: i32) -> Result<Array<f32, Ix4>, DetectionError> {
    if frame.empty() {
        return Err(DetectionError::Preprocess("frame is empty".to_string()));
    }
    if frame.typ() != CV_8UC3 {
        return Err(DetectionError::Preprocess(format!(
            "expected an 8-bit 3 channel frame, got type {}",
            frame.typ()
        )));
    }

    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(input_size, input_size),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )
    .map_err(|e| DetectionError::Preprocess(format!("Error resizing frame: {}", e)))?;

    let bytes = resized
        .data_bytes()
        .map_err(|e| DetectionError::Preprocess(format!("Error reading frame data: {}", e)))?;

    let size = input_size as usize;
    let mut input = Array::zeros((1, 3, size, size));
    // OpenCV stores pixels as BGR, the model expects RGB.
    for (index, pixel) in bytes.chunks_exact(3).enumerate() {
        let y = index / size;
        let x = index % size;
        input[[0, 0, y, x]] = (pixel[2] as f32) / 255.;
        input[[0, 1, y, x]] = (pixel[1] as f32) / 255.;
        input[[0, 2, y, x]] = (pixel[0] as f32) / 255.;
    }

    Ok(input)
}

/// Decodes a YOLOv8 `[1, 4 + classes, anchors]` output into boxes scaled to the frame size.
fn extract_detections(
    output: &ArrayViewD<f32>,
    frame_width: f32,
    frame_height: f32,
    input_size: f32,
    min_probability: f32,
) -> Result<Vec<Detection>, DetectionError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
        return Err(DetectionError::Output(format!(
            "expected shape [1, 4 + classes, anchors], got {:?}",
            shape
        )));
    }

    let output = output
        .index_axis(Axis(0), 0)
        .into_dimensionality::<Ix2>()
        .map_err(|e| DetectionError::Output(e.to_string()))?;
    let mut boxes = Vec::new();

    for anchor in output.axis_iter(Axis(1)) {
        let best = anchor
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .fold(None, |accum: Option<(usize, f32)>, row| match accum {
                Some(best) if best.1 >= row.1 => Some(best),
                _ => Some(row),
            });

        let Some((class_id, prob)) = best else {
            continue;
        };
        if prob < min_probability {
            continue;
        }

        let xc = anchor[0] / input_size * frame_width;
        let yc = anchor[1] / input_size * frame_height;
        let w = anchor[2] / input_size * frame_width;
        let h = anchor[3] / input_size * frame_height;

        boxes.push(Detection {
            class_id: class_id as u32,
            confidence: prob,
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
        });
    }

    Ok(boxes)
}

fn load_failed(e: impl std::fmt::Display) -> ModelError {
    ModelError::LoadFailed(e.to_string())
}

pub struct OrtDetector {
    session: Mutex<Session>,
    min_probability: f32,
    iou_threshold: f32,
    input_size: i32,
}

impl OrtDetector {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let model_path = model_config.get_path();
        if !model_path.is_file() {
            return Err(ModelError::NotFound(model_path));
        }

        let session = Session::builder()
            .map_err(load_failed)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_failed)?
            .commit_from_file(&model_path)
            .map_err(load_failed)?;

        tracing::info!("Created ONNX session from {:?}", model_path);

        Ok(Self {
            session: Mutex::new(session),
            min_probability: model_config.min_probability,
            iou_threshold: model_config.iou_threshold,
            input_size: model_config.input_size,
        })
    }

    pub fn run_inference(
        &self,
        input: &Array<f32, Ix4>,
    ) -> Result<ndarray::ArrayD<f32>, DetectionError> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| DetectionError::Inference(format!("session mutex poisoned: {}", e)))?;

        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| DetectionError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectionError::Output(format!("failed to extract tensor: {}", e)))?;

        ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| DetectionError::Output(format!("invalid tensor shape: {}", e)))
    }
}

impl Detector<Mat> for OrtDetector {
    fn detect(&self, frame: &Mat) -> Result<Vec<Detection>, DetectionError> {
        let (frame_width, frame_height) = (frame.cols() as f32, frame.rows() as f32);
        let input = transform_frame(frame, self.input_size)?;
        let output = self.run_inference(&input)?;

        let boxes = extract_detections(
            &output.view(),
            frame_width,
            frame_height,
            self.input_size as f32,
            self.min_probability,
        )?;

        let detections = non_max_suppression(boxes, self.iou_threshold);
        tracing::debug!("Detected {} objects", detections.len());

        Ok(detections)
    }
}
