mod backend;
#[cfg(all(target_os = "linux", feature = "camera"))]
mod gst;
mod session;
mod synthetic;

pub use crate::config::FacingMode;
pub use backend::{CameraBackend, StreamRequest, VideoStream};
#[cfg(all(target_os = "linux", feature = "camera"))]
pub use gst::GstCameraBackend;
pub use session::CameraSession;
pub use synthetic::{render_scene, Scene, StreamCounters, SyntheticCameraBackend};
