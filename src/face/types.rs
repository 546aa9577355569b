use crate::error::Result;
use crate::frame::FrameBuffer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Face rectangle in source-frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Face rectangle as fractions of the displayed surface (0.0-1.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Intersect with the frame rectangle
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Self {
        let (fw, fh) = (frame_width as f64, frame_height as f64);
        let left = self.x.clamp(0.0, fw);
        let top = self.y.clamp(0.0, fh);
        let right = (self.x + self.width).clamp(0.0, fw);
        let bottom = (self.y + self.height).clamp(0.0, fh);
        Self {
            x: left,
            y: top,
            width: (right - left).max(0.0),
            height: (bottom - top).max(0.0),
        }
    }

    /// Convert to fractions of the surface size for overlay display
    pub fn relative_to(&self, surface_width: u32, surface_height: u32) -> RelativeBox {
        let (sw, sh) = (surface_width.max(1) as f64, surface_height.max(1) as f64);
        RelativeBox {
            left: self.x / sw,
            top: self.y / sh,
            width: self.width / sw,
            height: self.height / sh,
        }
    }
}

/// One raw detection reported by the external face capability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bounding_box: BoundingBox,
    /// Detector score, 0.0-1.0
    pub score: f64,
}

/// Face validation outcome in the pipeline's own vocabulary
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceValidationResult {
    pub has_face: bool,
    /// 0.0-1.0
    pub confidence: f64,
    pub bounding_box: Option<BoundingBox>,
    pub is_aligned: bool,
    /// Human-readable problems, most important first
    pub issues: Vec<String>,
}

impl FaceValidationResult {
    /// A result reporting no face with a single issue
    pub fn no_face<S: Into<String>>(issue: S) -> Self {
        Self {
            issues: vec![issue.into()],
            ..Self::default()
        }
    }
}

/// The external face-validation capability
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect(&self, frame: &FrameBuffer) -> Result<Vec<FaceDetection>>;
}

/// Loads the face capability on first use (model download, warm-up...)
#[async_trait]
pub trait FaceDetectorLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn FaceDetector>>;
}
