use crate::config::{LabelsConfig, Validatable};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid labels file line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorLabel {
    pub label: String,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// Class labels and drawing colors indexed by the model's class id.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    class_labels: Vec<ColorLabel>,
}

impl LabelMap {
    pub fn new(class_labels: Vec<ColorLabel>) -> Self {
        Self { class_labels }
    }

    pub fn from_config(labels_cfg: &LabelsConfig) -> Result<Self, LabelsError> {
        let labels = load_yolov8_labels(&labels_cfg.get_path())?;
        tracing::info!("Loaded {} class labels", labels.len());
        Ok(Self::new(labels))
    }

    pub fn get(&self, class_id: u32) -> Option<&ColorLabel> {
        self.class_labels.get(class_id as usize)
    }

    pub fn len(&self) -> usize {
        self.class_labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.class_labels.is_empty()
    }
}

fn parse_channel(value: &str, channel: &str, line: usize) -> Result<u8, LabelsError> {
    value.trim().parse().map_err(|_| LabelsError::InvalidLine {
        line,
        reason: format!("invalid {} value {:?}", channel, value.trim()),
    })
}

/// Reads a `label,red,green,blue` file, one class per line in class id order.
pub fn load_yolov8_labels(filepath: &Path) -> Result<Vec<ColorLabel>, LabelsError> {
    let file = File::open(filepath)?;
    parse_labels(io::BufReader::new(file))
}

pub fn parse_labels(reader: impl BufRead) -> Result<Vec<ColorLabel>, LabelsError> {
    let mut color_labels = Vec::new();

    for (index, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let line_number = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 4 {
            return Err(LabelsError::InvalidLine {
                line: line_number,
                reason: format!("expected `label,red,green,blue`, got {:?}", line),
            });
        }

        color_labels.push(ColorLabel {
            label: parts[0].trim().to_string(),
            red: parse_channel(parts[1], "red", line_number)?,
            green: parse_channel(parts[2], "green", line_number)?,
            blue: parse_channel(parts[3], "blue", line_number)?,
        });
    }

    Ok(color_labels)
}
