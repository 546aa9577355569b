use crate::analyzer::QualityMetrics;
use crate::config::{FaceFallback, ReadinessConfig};
use crate::face::FaceValidationResult;
use serde::Serialize;

/// Face input to the readiness decision
#[derive(Debug, Clone, PartialEq)]
pub enum FaceSignal {
    /// The face capability has not loaded (yet, or at all)
    Unloaded,
    /// Latest resolved validation result
    Ready(FaceValidationResult),
}

impl FaceSignal {
    pub fn result(&self) -> Option<&FaceValidationResult> {
        match self {
            FaceSignal::Unloaded => None,
            FaceSignal::Ready(result) => Some(result),
        }
    }
}

/// Readiness verdict with the inputs it was computed from, for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureReadiness {
    pub ready: bool,
    pub quality: QualityMetrics,
    pub face: Option<FaceValidationResult>,
}

/// Decides whether the current frame is good enough for an automatic capture
#[derive(Debug, Clone)]
pub struct CaptureReadinessEvaluator {
    config: ReadinessConfig,
}

impl CaptureReadinessEvaluator {
    pub fn new(config: ReadinessConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, quality: &QualityMetrics, face: &FaceSignal) -> bool {
        let document_ok = quality.has_document
            && quality.is_aligned
            && quality.brightness > self.config.brightness_min
            && quality.brightness < self.config.brightness_max
            && quality.sharpness > self.config.sharpness_min;

        let face_ok = match face {
            FaceSignal::Ready(result) => result.has_face,
            FaceSignal::Unloaded => self.config.face_fallback == FaceFallback::DocumentOnly,
        };

        document_ok && face_ok
    }

    pub fn assess(&self, quality: &QualityMetrics, face: &FaceSignal) -> CaptureReadiness {
        CaptureReadiness {
            ready: self.evaluate(quality, face),
            quality: *quality,
            face: face.result().cloned(),
        }
    }

    pub fn config(&self) -> &ReadinessConfig {
        &self.config
    }
}
