use crate::config::FacingMode;
use crate::error::Result;
use async_trait::async_trait;

/// Parameters for acquiring a camera stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    /// Preferred facing direction
    pub facing: FacingMode,
    /// Target resolution (width, height); the device may pick another
    pub resolution: (u32, u32),
    pub fps: u32,
}

/// Host-provided media capture API.
///
/// `acquire` either returns a live stream or a typed [`CameraError`]
/// (`Unsupported`, `PermissionDenied`), never a half-open device.
///
/// [`CameraError`]: crate::error::CameraError
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    async fn acquire(&self, request: &StreamRequest) -> Result<Box<dyn VideoStream>>;
}

/// A live camera stream exposing its current presented frame
pub trait VideoStream: Send {
    /// Native resolution of the presented frames
    fn resolution(&self) -> (u32, u32);

    fn facing(&self) -> FacingMode;

    /// Copy the current frame as RGBA into `dst`, which must hold exactly
    /// `width * height * 4` bytes
    fn read_frame(&mut self, dst: &mut [u8]) -> Result<()>;

    /// Stop every underlying track. Safe to call more than once.
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}
