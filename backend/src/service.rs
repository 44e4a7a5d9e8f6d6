use image::RgbImage;
use log::{debug, error, info};
use shared::{Finding, HealthResponse, PredictionResponse};
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::config::AppConfig;
use crate::inference::{InferenceError, Recognizer, YoloClassifier, YoloDetector};

#[derive(Debug, thiserror::Error)]
pub enum DiagnosisError {
    #[error("{0}")]
    Decode(#[from] image::ImageError),
    #[error("{0}")]
    Inference(#[from] InferenceError),
}

/// Both pretrained models, each of which may be missing if it failed to load.
pub struct DiagnosisService {
    detector: Option<Box<dyn Recognizer>>,
    classifier: Option<Box<dyn Recognizer>>,
}

impl DiagnosisService {
    pub fn new(
        detector: Option<Box<dyn Recognizer>>,
        classifier: Option<Box<dyn Recognizer>>,
    ) -> Self {
        Self {
            detector,
            classifier,
        }
    }

    /// Loads both models. A model that fails to load is logged and left out so
    /// the service can still run on the other one.
    pub fn load(config: &AppConfig) -> Self {
        let detector = match YoloDetector::load(&config.detection) {
            Ok(model) => {
                info!(
                    "Detection model loaded from {}",
                    config.detection.model_path.display()
                );
                Some(Box::new(model) as Box<dyn Recognizer>)
            }
            Err(e) => {
                error!("Error loading detection model: {}", e);
                None
            }
        };

        let classifier = match YoloClassifier::load(&config.classification) {
            Ok(model) => {
                info!(
                    "Classification model loaded from {}",
                    config.classification.model_path.display()
                );
                Some(Box::new(model) as Box<dyn Recognizer>)
            }
            Err(e) => {
                error!("Error loading classification model: {}", e);
                None
            }
        };

        Self::new(detector, classifier)
    }

    pub fn is_ready(&self) -> bool {
        self.detector.is_some() || self.classifier.is_some()
    }

    pub fn status(&self) -> HealthResponse {
        HealthResponse::new(self.detector.is_some(), self.classifier.is_some())
    }

    /// Runs every available model, detection findings first.
    pub fn recognize(&self, image: &RgbImage) -> Result<Vec<Finding>, InferenceError> {
        let mut findings = Vec::new();
        for model in [&self.detector, &self.classifier].into_iter().flatten() {
            debug!("Running {} model", model.kind());
            findings.extend(model.recognize(image)?);
        }
        Ok(findings)
    }

    pub fn diagnose(
        &self,
        request_id: Uuid,
        image_data: &[u8],
    ) -> Result<PredictionResponse, DiagnosisError> {
        let image = image::load_from_memory(image_data)?.to_rgb8();
        let findings = self.recognize(&image)?;

        for finding in &findings {
            info!(
                "[{}] {} model found: {} ({:.2})",
                request_id, finding.model, finding.class_name, finding.confidence
            );
        }
        if findings.is_empty() {
            info!("[{}] No predictions from either model.", request_id);
        }

        let response = aggregate(findings);
        info!(
            "[{}] Final prediction: {}, confidence: {:.2}, diseases: {}",
            request_id, response.prediction, response.confidence, response.total_diseases
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ModelKind, ServiceStatus};
    use std::io::Cursor;

    struct Fixed(ModelKind, Vec<(&'static str, f32)>);

    impl Recognizer for Fixed {
        fn kind(&self) -> ModelKind {
            self.0
        }

        fn recognize(&self, _image: &RgbImage) -> Result<Vec<Finding>, InferenceError> {
            Ok(self
                .1
                .iter()
                .map(|&(label, confidence)| Finding::new(label, confidence, self.0))
                .collect())
        }
    }

    struct Broken;

    impl Recognizer for Broken {
        fn kind(&self) -> ModelKind {
            ModelKind::Detection
        }

        fn recognize(&self, _image: &RgbImage) -> Result<Vec<Finding>, InferenceError> {
            Err(InferenceError::UnknownClass { index: 9, count: 5 })
        }
    }

    fn png() -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(RgbImage::new(8, 8))
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn detection_findings_come_first() {
        let service = DiagnosisService::new(
            Some(Box::new(Fixed(ModelKind::Detection, vec![("bud rot", 0.4)]))),
            Some(Box::new(Fixed(
                ModelKind::Classification,
                vec![("healthy", 0.9), ("drying", 0.3)],
            ))),
        );

        let findings = service.recognize(&RgbImage::new(4, 4)).unwrap();
        let models: Vec<ModelKind> = findings.iter().map(|f| f.model).collect();
        assert_eq!(
            models,
            vec![
                ModelKind::Detection,
                ModelKind::Classification,
                ModelKind::Classification
            ]
        );
    }

    #[test]
    fn missing_model_is_skipped() {
        let service = DiagnosisService::new(
            None,
            Some(Box::new(Fixed(ModelKind::Classification, vec![("healthy", 0.95)]))),
        );

        assert!(service.is_ready());
        assert_eq!(service.status().status, ServiceStatus::Degraded);

        let response = service.diagnose(Uuid::new_v4(), &png()).unwrap();
        assert_eq!(response.prediction, "healthy");
        assert_eq!(response.confidence, 0.95);
    }

    #[test]
    fn no_models_means_not_ready() {
        let service = DiagnosisService::new(None, None);
        assert!(!service.is_ready());
        assert_eq!(service.status().status, ServiceStatus::Unavailable);
    }

    #[test]
    fn undecodable_bytes_fail_the_request() {
        let service = DiagnosisService::new(
            Some(Box::new(Fixed(ModelKind::Detection, vec![]))),
            None,
        );

        let err = service.diagnose(Uuid::new_v4(), b"not an image").unwrap_err();
        assert!(matches!(err, DiagnosisError::Decode(_)));
    }

    #[test]
    fn inference_failure_aborts_the_request() {
        let service = DiagnosisService::new(
            Some(Box::new(Broken)),
            Some(Box::new(Fixed(ModelKind::Classification, vec![("healthy", 0.9)]))),
        );

        let err = service.diagnose(Uuid::new_v4(), &png()).unwrap_err();
        assert!(matches!(err, DiagnosisError::Inference(_)));
        assert!(err.to_string().contains("out of range"));
    }
}
