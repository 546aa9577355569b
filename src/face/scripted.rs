use super::types::{BoundingBox, FaceDetection, FaceDetector, FaceDetectorLoader};
use crate::error::{FaceError, Result};
use crate::frame::FrameBuffer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Face capability that reports whatever detections it was last given.
///
/// Stands in for a real model in the demo binary and in tests.
#[derive(Debug, Default)]
pub struct ScriptedFaceDetector {
    detections: Mutex<Vec<FaceDetection>>,
    failing: AtomicBool,
    stalled: AtomicBool,
    calls: AtomicU64,
}

impl ScriptedFaceDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(detections: Vec<FaceDetection>) -> Self {
        let detector = Self::new();
        detector.set_detections(detections);
        detector
    }

    pub fn set_detections(&self, detections: Vec<FaceDetection>) {
        *self.detections.lock() = detections;
    }

    pub fn clear(&self) {
        self.detections.lock().clear();
    }

    pub fn has_detections(&self) -> bool {
        !self.detections.lock().is_empty()
    }

    /// Make every following `detect` call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every following `detect` call hang without answering
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// A confident, centered face covering about a tenth of a frame
    pub fn centered_face(frame_width: u32, frame_height: u32) -> FaceDetection {
        let (w, h) = (frame_width as f64, frame_height as f64);
        FaceDetection {
            bounding_box: BoundingBox::new(w * 0.35, h * 0.35, w * 0.3, h * 0.3),
            score: 0.95,
        }
    }
}

#[async_trait]
impl FaceDetector for ScriptedFaceDetector {
    async fn detect(&self, frame: &FrameBuffer) -> Result<Vec<FaceDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FaceError::Detection {
                details: format!("scripted failure on frame {}", frame.id),
            }
            .into());
        }
        Ok(self.detections.lock().clone())
    }
}

/// Loader handing out a [`ScriptedFaceDetector`] after an optional delay
pub struct ScriptedLoader {
    detector: Arc<ScriptedFaceDetector>,
    delay: Duration,
    unavailable: bool,
}

impl ScriptedLoader {
    pub fn new(detector: Arc<ScriptedFaceDetector>) -> Self {
        Self {
            detector,
            delay: Duration::ZERO,
            unavailable: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Loading always fails, as when the model cannot be fetched
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

#[async_trait]
impl FaceDetectorLoader for ScriptedLoader {
    async fn load(&self) -> Result<Arc<dyn FaceDetector>> {
        if !self.delay.is_zero() {
            debug!("Scripted face loader waiting {:?}", self.delay);
            tokio::time::sleep(self.delay).await;
        }

        if self.unavailable {
            return Err(FaceError::Unavailable {
                details: "scripted loader configured as unavailable".to_string(),
            }
            .into());
        }

        let detector: Arc<dyn FaceDetector> = self.detector.clone();
        Ok(detector)
    }
}
