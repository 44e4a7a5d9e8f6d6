use image::RgbImage;
use ndarray::ArrayView2;
use shared::{Finding, ModelKind};
use std::sync::Mutex;
use tch::{CModule, Device, IValue};

use super::preprocess::{self, Letterbox};
use super::{first_tensor, label_for, tensor_to_vec, to_input_tensor, InferenceError, Recognizer};
use crate::config::DetectionConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    fn to_source(self, geometry: &Letterbox) -> Self {
        let (x1, y1) = geometry.to_source(self.x1, self.y1);
        let (x2, y2) = geometry.to_source(self.x2, self.y2);
        Self { x1, y1, x2, y2 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
}

/// Decodes a `[4 + nc, anchors]` YOLO head (box centre/size rows followed by
/// one score row per class) into thresholded, NMS-filtered detections,
/// strongest first.
pub fn decode_predictions(
    data: &[f32],
    channels: usize,
    anchors: usize,
    config: &DetectionConfig,
) -> Result<Vec<Detection>, InferenceError> {
    if channels <= 4 {
        return Err(InferenceError::UnexpectedOutput(format!(
            "detection head has {} channels",
            channels
        )));
    }
    let preds = ArrayView2::from_shape((channels, anchors), data)
        .map_err(|e| InferenceError::UnexpectedOutput(e.to_string()))?;

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_score = f32::MIN;
        let mut best_class = 0usize;
        for class_id in 0..channels - 4 {
            let score = preds[[4 + class_id, anchor]];
            if score > best_score {
                best_score = score;
                best_class = class_id;
            }
        }

        if best_score <= config.confidence_threshold {
            continue;
        }

        candidates.push(Detection {
            bbox: BoundingBox::from_center(
                preds[[0, anchor]],
                preds[[1, anchor]],
                preds[[2, anchor]],
                preds[[3, anchor]],
            ),
            confidence: best_score,
            class_id: best_class,
        });
    }

    let mut kept = nms(candidates, config.iou_threshold);
    kept.truncate(config.max_detections);
    Ok(kept)
}

/// Greedy per-class non-maximum suppression.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.retain(|det| !det.confidence.is_nan());
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut result: Vec<Detection> = Vec::new();
    for det in detections {
        let suppressed = result.iter().any(|kept| {
            kept.class_id == det.class_id && kept.bbox.iou(&det.bbox) > iou_threshold
        });
        if !suppressed {
            result.push(det);
        }
    }
    result
}

/// TorchScript export of the disease-region detector.
pub struct YoloDetector {
    module: Mutex<CModule>,
    device: Device,
    config: DetectionConfig,
}

impl YoloDetector {
    pub fn load(config: &DetectionConfig) -> Result<Self, InferenceError> {
        let device = Device::cuda_if_available();
        let mut module = CModule::load_on_device(&config.model_path, device)?;
        module.set_eval();
        Ok(Self {
            module: Mutex::new(module),
            device,
            config: config.clone(),
        })
    }
}

impl Recognizer for YoloDetector {
    fn kind(&self) -> ModelKind {
        ModelKind::Detection
    }

    fn recognize(&self, image: &RgbImage) -> Result<Vec<Finding>, InferenceError> {
        let (input, geometry) = preprocess::letterbox(image, self.config.input_size);
        let tensor = to_input_tensor(&input, self.device)?;

        let output = {
            let module = self.module.lock().map_err(|_| InferenceError::Poisoned)?;
            tch::no_grad(|| module.forward_is(&[IValue::Tensor(tensor)]))?
        };
        let output = first_tensor(output)?;

        let (channels, anchors) = match output.size().as_slice() {
            [1, channels, anchors] => (*channels as usize, *anchors as usize),
            other => {
                return Err(InferenceError::UnexpectedOutput(format!(
                    "detection output shape {:?}",
                    other
                )));
            }
        };
        let data = tensor_to_vec(&output)?;

        decode_predictions(&data, channels, anchors, &self.config)?
            .into_iter()
            .map(|det| {
                let label = label_for(&self.config.labels, det.class_id)?;
                log::debug!(
                    "Detected {} at {:?}",
                    label,
                    det.bbox.to_source(&geometry)
                );
                Ok(Finding::new(label, det.confidence, ModelKind::Detection))
            })
            .collect()
    }
}
