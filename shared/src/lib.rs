use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Label both models use for a plant with no visible disease.
pub const HEALTHY_CLASS: &str = "healthy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelKind {
    Detection,
    Classification,
}

/// A single labelled, scored output of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
    pub model: ModelKind,
}

impl Finding {
    pub fn new(class_name: impl Into<String>, confidence: f32, model: ModelKind) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            model,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.class_name == HEALTHY_CLASS
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: String,
    pub confidence: f32,
    pub all_detections: Vec<Finding>,
    pub total_diseases: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceStatus {
    Ready,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ServiceStatus,
    pub detection: bool,
    pub classification: bool,
}

impl HealthResponse {
    pub fn new(detection: bool, classification: bool) -> Self {
        let status = match (detection, classification) {
            (true, true) => ServiceStatus::Ready,
            (false, false) => ServiceStatus::Unavailable,
            _ => ServiceStatus::Degraded,
        };
        Self {
            status,
            detection,
            classification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finding_serializes_with_wire_field_names() {
        let finding = Finding::new("bud rot", 0.5, ModelKind::Detection);
        let value = serde_json::to_value(&finding).unwrap();

        assert_eq!(value["class"], "bud rot");
        assert_eq!(value["model"], "detection");
        assert_eq!(value["confidence"], 0.5);
    }

    #[test]
    fn model_kind_displays_lowercase() {
        assert_eq!(ModelKind::Classification.to_string(), "classification");
        assert_eq!(ModelKind::Detection.as_ref(), "detection");
    }

    #[test]
    fn health_status_follows_model_availability() {
        assert_eq!(HealthResponse::new(true, true).status, ServiceStatus::Ready);
        assert_eq!(HealthResponse::new(false, true).status, ServiceStatus::Degraded);
        assert_eq!(HealthResponse::new(false, false).status, ServiceStatus::Unavailable);
    }
}
