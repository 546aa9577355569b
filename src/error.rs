use thiserror::Error;

/// Camera device lifecycle errors. These end the capture session.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("No camera support for {facing} facing mode: {details}")]
    Unsupported { facing: String, details: String },

    #[error("Camera permission denied: {details}")]
    PermissionDenied { details: String },

    #[error("Camera session is not open")]
    NotOpen,

    #[error("Camera stream error: {details}")]
    CaptureStream { details: String },

    #[error("Camera configuration error: {details}")]
    Configuration { details: String },
}

/// Face validation errors. Never fatal to a session.
#[derive(Error, Debug)]
pub enum FaceError {
    #[error("Face validation capability unavailable: {details}")]
    Unavailable { details: String },

    #[error("Face detection failed: {details}")]
    Detection { details: String },
}

/// Errors raised while freezing or handing over a captured frame.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to encode captured frame: {details}")]
    Encoding { details: String },

    #[error("Cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: String },

    #[error("Capture session already confirmed")]
    AlreadyConfirmed,
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum IdCaptureError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Face validation error: {0}")]
    Face(#[from] FaceError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("System error: {message}")]
    System { message: String },
}

impl IdCaptureError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    /// Whether the error ends the capture session (device lifecycle failures)
    pub fn is_fatal(&self) -> bool {
        matches!(self, IdCaptureError::Camera(_) | IdCaptureError::System { .. })
    }
}

pub type Result<T> = std::result::Result<T, IdCaptureError>;
