//! Merges detection and classification findings into a single diagnosis.

use shared::{Finding, PredictionResponse, HEALTHY_CLASS};

/// Reported when neither model produced anything; it is not a measurement.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

/// Combines the findings of both models, detection findings first.
///
/// Any disease finding outranks every "healthy" finding. Among disease
/// findings the highest confidence wins; on an exact tie the earliest one in
/// `findings` is kept.
pub fn aggregate(findings: Vec<Finding>) -> PredictionResponse {
    let total_diseases = findings.iter().filter(|f| !f.is_healthy()).count();

    let (prediction, confidence) = match strongest(findings.iter().filter(|f| !f.is_healthy())) {
        Some(best) => (best.class_name.clone(), best.confidence),
        None => match strongest(findings.iter()) {
            Some(best) => (HEALTHY_CLASS.to_string(), best.confidence),
            None => (HEALTHY_CLASS.to_string(), FALLBACK_CONFIDENCE),
        },
    };

    PredictionResponse {
        prediction,
        confidence,
        all_detections: findings,
        total_diseases,
    }
}

fn strongest<'a>(findings: impl Iterator<Item = &'a Finding>) -> Option<&'a Finding> {
    findings.fold(None, |best: Option<&Finding>, candidate| match best {
        Some(current) if candidate.confidence > current.confidence => Some(candidate),
        Some(current) => Some(current),
        None => Some(candidate),
    })
}
