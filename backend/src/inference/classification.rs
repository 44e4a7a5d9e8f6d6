use image::RgbImage;
use shared::{Finding, ModelKind};
use std::sync::Mutex;
use tch::{CModule, Device, IValue, Kind};

use super::preprocess;
use super::{first_tensor, label_for, tensor_to_vec, to_input_tensor, InferenceError, Recognizer};
use crate::config::ClassificationConfig;

/// Picks the `top_k` classes by probability and keeps those strictly above
/// `min_confidence`. Equal probabilities keep class index order.
pub fn select_top_classes(probs: &[f32], top_k: usize, min_confidence: f32) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = probs
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, confidence)| !confidence.is_nan())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(top_k);
    ranked.retain(|&(_, confidence)| confidence > min_confidence);
    ranked
}

/// TorchScript export of the whole-image classifier.
pub struct YoloClassifier {
    module: Mutex<CModule>,
    device: Device,
    config: ClassificationConfig,
}

impl YoloClassifier {
    pub fn load(config: &ClassificationConfig) -> Result<Self, InferenceError> {
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

impl Recognizer for YoloClassifier {
    fn kind(&self) -> ModelKind {
        ModelKind::Classification
    }

    fn recognize(&self, image: &RgbImage) -> Result<Vec<Finding>, InferenceError> {
        let input = preprocess::center_crop(image, self.config.input_size);
        let tensor = to_input_tensor(&input, self.device)?;

        let output = {
            let module = self.module.lock().map_err(|_| InferenceError::Poisoned)?;
            tch::no_grad(|| module.forward_is(&[IValue::Tensor(tensor)]))?
        };
        let mut output = first_tensor(output)?;
        if output.dim() != 2 || output.size()[0] != 1 {
            return Err(InferenceError::UnexpectedOutput(format!(
                "classification output shape {:?}",
                output.size()
            )));
        }
        if self.config.apply_softmax {
            output = output.softmax(-1, Kind::Float);
        }
        let probs = tensor_to_vec(&output)?;

        select_top_classes(&probs, self.config.top_k, self.config.min_confidence)
            .into_iter()
            .map(|(index, confidence)| {
                let label = label_for(&self.config.labels, index)?;
                Ok(Finding::new(label, confidence, ModelKind::Classification))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_top_five_in_descending_order() {
        let probs = [0.05, 0.3, 0.02, 0.25, 0.2, 0.18];
        let selected = select_top_classes(&probs, 5, 0.0);

        let indices: Vec<usize> = selected.iter().map(|&(i, _)| i).collect();
        assert_eq!(indices, vec![1, 3, 4, 5, 0]);
    }

    #[test]
    fn confidence_floor_is_exclusive() {
        let probs = [0.1, 0.6, 0.25, 0.05];
        let selected = select_top_classes(&probs, 5, 0.1);

        assert_eq!(selected, vec![(1, 0.6), (2, 0.25)]);
    }

    #[test]
    fn equal_probabilities_keep_class_order() {
        let probs = [0.2, 0.4, 0.4];
        let selected = select_top_classes(&probs, 2, 0.1);

        assert_eq!(selected, vec![(1, 0.4), (2, 0.4)]);
    }

    #[test]
    fn nan_scores_are_ignored() {
        let probs = [f32::NAN, 0.3, f32::NAN, 0.5, 0.2];
        let selected = select_top_classes(&probs, 2, 0.1);

        assert_eq!(selected, vec![(3, 0.5), (1, 0.3)]);
    }
}
