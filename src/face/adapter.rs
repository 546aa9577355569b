use super::types::{FaceDetection, FaceDetector, FaceDetectorLoader, FaceValidationResult};
use crate::config::FaceConfig;
use crate::error::FaceError;
use crate::frame::FrameBuffer;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ISSUE_NO_FACE: &str = "No face detected";
pub const ISSUE_MULTIPLE_FACES: &str = "Multiple faces detected";
pub const ISSUE_LOW_CONFIDENCE: &str = "Low detection confidence";
pub const ISSUE_TOO_SMALL: &str = "Face too small - move closer";
pub const ISSUE_TOO_LARGE: &str = "Face too large - move back";
pub const ISSUE_NOT_CENTERED: &str = "Face not centered";
pub const ISSUE_NOT_READY: &str = "Face validation not ready";

/// Load state of the external face capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceCapabilityStatus {
    Unloaded,
    Loading,
    Ready,
    Unavailable,
}

impl fmt::Display for FaceCapabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaceCapabilityStatus::Unloaded => "unloaded",
            FaceCapabilityStatus::Loading => "loading",
            FaceCapabilityStatus::Ready => "ready",
            FaceCapabilityStatus::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

enum Capability {
    Unloaded,
    Loading,
    Ready(Arc<dyn FaceDetector>),
    Unavailable(String),
}

/// Lazily loads the face capability and normalizes its detections.
///
/// Cloning is cheap and every clone shares the same load state, so a clone
/// can be moved into a spawned validation task.
#[derive(Clone)]
pub struct FaceValidationAdapter {
    loader: Arc<dyn FaceDetectorLoader>,
    config: FaceConfig,
    capability: Arc<RwLock<Capability>>,
}

impl FaceValidationAdapter {
    pub fn new(loader: Arc<dyn FaceDetectorLoader>, config: FaceConfig) -> Self {
        Self {
            loader,
            config,
            capability: Arc::new(RwLock::new(Capability::Unloaded)),
        }
    }

    /// Start loading the capability in the background if nothing has been tried yet
    pub fn ensure_loading(&self) {
        {
            let mut capability = self.capability.write();
            if !matches!(*capability, Capability::Unloaded) {
                return;
            }
            *capability = Capability::Loading;
        }

        info!("Loading face validation capability");
        let loader = Arc::clone(&self.loader);
        let slot = Arc::clone(&self.capability);
        let timeout = Duration::from_millis(self.config.load_timeout_ms);

        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, loader.load()).await {
                Ok(Ok(detector)) => Capability::Ready(detector),
                Ok(Err(e)) => Capability::Unavailable(e.to_string()),
                Err(_) => Capability::Unavailable(format!("load timed out after {:?}", timeout)),
            };

            match &outcome {
                Capability::Ready(_) => info!("Face validation capability ready"),
                Capability::Unavailable(reason) => {
                    let err = FaceError::Unavailable {
                        details: reason.clone(),
                    };
                    warn!("{}; auto-capture falls back per readiness policy", err);
                }
                _ => {}
            }

            *slot.write() = outcome;
        });
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.capability.read(), Capability::Ready(_))
    }

    pub fn status(&self) -> FaceCapabilityStatus {
        match *self.capability.read() {
            Capability::Unloaded => FaceCapabilityStatus::Unloaded,
            Capability::Loading => FaceCapabilityStatus::Loading,
            Capability::Ready(_) => FaceCapabilityStatus::Ready,
            Capability::Unavailable(_) => FaceCapabilityStatus::Unavailable,
        }
    }

    /// Run the capability on `frame`.
    ///
    /// Never fails. Anything short of a timely detector answer yields a
    /// no-face result.
    pub async fn validate(&self, frame: &FrameBuffer) -> FaceValidationResult {
        let detector = match &*self.capability.read() {
            Capability::Ready(detector) => Arc::clone(detector),
            _ => {
                debug!("Face validation requested before capability is ready");
                return FaceValidationResult::no_face(ISSUE_NOT_READY);
            }
        };

        let timeout = Duration::from_millis(self.config.detect_timeout_ms);
        let details = match tokio::time::timeout(timeout, detector.detect(frame)).await {
            Ok(Ok(detections)) => return self.normalize(&detections, frame.width, frame.height),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no answer within {:?}", timeout),
        };

        let err = FaceError::Detection { details };
        warn!("Frame {}: {}; treating as no face", frame.id, err);
        FaceValidationResult::no_face(ISSUE_NO_FACE)
    }

    /// Map raw detections onto the local result vocabulary
    pub fn normalize(
        &self,
        detections: &[FaceDetection],
        frame_width: u32,
        frame_height: u32,
    ) -> FaceValidationResult {
        // a NaN score would otherwise sort above every real one
        let Some(best) = detections
            .iter()
            .filter(|d| d.score.is_finite())
            .max_by(|a, b| a.score.total_cmp(&b.score))
        else {
            return FaceValidationResult::no_face(ISSUE_NO_FACE);
        };

        let confidence = best.score.clamp(0.0, 1.0);
        if confidence < self.config.min_confidence {
            return FaceValidationResult {
                confidence,
                issues: vec![ISSUE_NO_FACE.to_string(), ISSUE_LOW_CONFIDENCE.to_string()],
                ..FaceValidationResult::default()
            };
        }

        let bounding_box = best.bounding_box.clamp_to(frame_width, frame_height);
        let mut issues = Vec::new();

        let confident = detections
            .iter()
            .filter(|d| d.score >= self.config.min_confidence)
            .count();
        if confident > 1 {
            issues.push(ISSUE_MULTIPLE_FACES.to_string());
        }

        let frame_area = (frame_width as f64 * frame_height as f64).max(1.0);
        let area_fraction = bounding_box.area() / frame_area;
        let mut misplaced = false;
        if area_fraction < self.config.min_area_fraction {
            issues.push(ISSUE_TOO_SMALL.to_string());
            misplaced = true;
        } else if area_fraction > self.config.max_area_fraction {
            issues.push(ISSUE_TOO_LARGE.to_string());
            misplaced = true;
        }

        let (cx, cy) = bounding_box.center();
        let dx = (cx / frame_width.max(1) as f64 - 0.5).abs();
        let dy = (cy / frame_height.max(1) as f64 - 0.5).abs();
        if dx > self.config.center_tolerance || dy > self.config.center_tolerance {
            issues.push(ISSUE_NOT_CENTERED.to_string());
            misplaced = true;
        }

        FaceValidationResult {
            has_face: true,
            confidence,
            bounding_box: Some(bounding_box),
            is_aligned: !misplaced,
            issues,
        }
    }

    pub fn config(&self) -> &FaceConfig {
        &self.config
    }
}
