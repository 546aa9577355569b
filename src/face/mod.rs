mod adapter;
mod scripted;
mod types;

pub use adapter::{
    FaceCapabilityStatus, FaceValidationAdapter, ISSUE_LOW_CONFIDENCE, ISSUE_MULTIPLE_FACES,
    ISSUE_NOT_CENTERED, ISSUE_NOT_READY, ISSUE_NO_FACE, ISSUE_TOO_LARGE, ISSUE_TOO_SMALL,
};
pub use scripted::{ScriptedFaceDetector, ScriptedLoader};
pub use types::{
    BoundingBox, FaceDetection, FaceDetector, FaceDetectorLoader, FaceValidationResult,
    RelativeBox,
};
