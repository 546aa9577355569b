pub mod analyzer;
pub mod camera;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod face;
pub mod frame;
pub mod keyboard_input;
pub mod readiness;
pub mod sampler;

pub use analyzer::{QualityAnalyzer, QualityMetrics};
#[cfg(all(target_os = "linux", feature = "camera"))]
pub use camera::GstCameraBackend;
pub use camera::{
    CameraBackend, CameraSession, Scene, StreamCounters, StreamRequest, SyntheticCameraBackend,
    VideoStream,
};
pub use capture::{
    AutoCaptureStateMachine, CaptureCommand, CaptureController, CaptureControllerBuilder,
    CaptureHandle, CaptureState, CaptureStatus, ChannelEmitter, ResultEmitter, StepOutcome,
};
pub use config::{FaceFallback, FacingMode, IdCaptureConfig};
pub use error::{
    CameraError, CaptureError, EventBusError, FaceError, IdCaptureError, Result,
};
pub use events::{CaptureEvent, EventBus, EventFilter, EventReceiver};
pub use face::{
    BoundingBox, FaceCapabilityStatus, FaceDetection, FaceDetector, FaceDetectorLoader,
    FaceValidationAdapter, FaceValidationResult, RelativeBox, ScriptedFaceDetector,
    ScriptedLoader,
};
pub use frame::{CapturedImage, FrameBuffer, FrameEncoder, JpegFrameEncoder};
pub use keyboard_input::{KeyAction, KeyboardInputHandler};
pub use readiness::{CaptureReadiness, CaptureReadinessEvaluator, FaceSignal};
pub use sampler::FrameSampler;
