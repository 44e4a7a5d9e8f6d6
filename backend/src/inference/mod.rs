pub mod classification;
pub mod detection;
pub mod preprocess;

use image::RgbImage;
use ndarray::Array4;
use shared::{Finding, ModelKind};
use tch::{Device, IValue, Kind, Tensor};

pub use classification::YoloClassifier;
pub use detection::YoloDetector;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model error: {0}")]
    Model(#[from] tch::TchError),
    #[error("Unexpected model output: {0}")]
    UnexpectedOutput(String),
    #[error("Class index {index} is out of range for {count} labels")]
    UnknownClass { index: usize, count: usize },
    #[error("Model lock poisoned")]
    Poisoned,
}

/// One pretrained model turning a decoded image into findings.
pub trait Recognizer: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn recognize(&self, image: &RgbImage) -> Result<Vec<Finding>, InferenceError>;
}

pub(crate) fn label_for(labels: &[String], index: usize) -> Result<&str, InferenceError> {
    labels
        .get(index)
        .map(String::as_str)
        .ok_or(InferenceError::UnknownClass {
            index,
            count: labels.len(),
        })
}

pub(crate) fn to_input_tensor(
    input: &Array4<f32>,
    device: Device,
) -> Result<Tensor, InferenceError> {
    let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
    let data = input
        .as_slice()
        .ok_or_else(|| InferenceError::UnexpectedOutput("non-contiguous input".into()))?;
    let tensor = Tensor::f_from_slice(data)?.f_view(shape.as_slice())?;
    Ok(tensor.to_device(device))
}

/// Exported YOLO modules return either a bare tensor or a tuple whose first
/// element is the prediction tensor.
pub(crate) fn first_tensor(output: IValue) -> Result<Tensor, InferenceError> {
    match output {
        IValue::Tensor(tensor) => Ok(tensor),
        IValue::Tuple(values) | IValue::GenericList(values) => values
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::UnexpectedOutput("empty tuple".into()))
            .and_then(first_tensor),
        IValue::TensorList(tensors) => tensors
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::UnexpectedOutput("empty tensor list".into())),
        other => Err(InferenceError::UnexpectedOutput(format!("{:?}", other))),
    }
}

pub(crate) fn tensor_to_vec(tensor: &Tensor) -> Result<Vec<f32>, InferenceError> {
    let flat = tensor
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .f_view([-1])?;
    let num_elements = flat.size()[0] as usize;
    let mut output_vec = vec![0.0f32; num_elements];
    flat.f_copy_data(&mut output_vec, num_elements)?;
    Ok(output_vec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_lookup_rejects_out_of_range_index() {
        let labels = vec!["bud rot".to_string()];
        assert_eq!(label_for(&labels, 0).unwrap(), "bud rot");
        assert!(matches!(
            label_for(&labels, 3),
            Err(InferenceError::UnknownClass { index: 3, count: 1 })
        ));
    }
}
