use super::backend::{CameraBackend, StreamRequest, VideoStream};
use crate::config::{CameraConfig, FacingMode};
use crate::error::{CameraError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Exclusive owner of at most one camera stream.
///
/// Opening always releases the previous stream first, so a facing switch
/// never holds two device handles. Dropping the session releases the stream.
pub struct CameraSession {
    backend: Arc<dyn CameraBackend>,
    config: CameraConfig,
    stream: Option<Box<dyn VideoStream>>,
}

impl CameraSession {
    pub fn new(backend: Arc<dyn CameraBackend>, config: CameraConfig) -> Self {
        Self {
            backend,
            config,
            stream: None,
        }
    }

    /// Acquire a stream for `facing`, releasing any stream held before
    pub async fn open(&mut self, facing: FacingMode) -> Result<()> {
        if self.stream.is_some() {
            debug!("Releasing current camera stream before reopening");
            self.close();
        }

        let request = StreamRequest {
            facing,
            resolution: self.config.resolution,
            fps: self.config.fps,
        };

        info!(
            "Opening {} camera via {} backend ({}x{} @ {}fps)",
            facing,
            self.backend.name(),
            request.resolution.0,
            request.resolution.1,
            request.fps
        );

        let stream = self.backend.acquire(&request).await.map_err(|e| {
            warn!("Failed to open {} camera: {}", facing, e);
            e
        })?;

        let (width, height) = stream.resolution();
        if width == 0 || height == 0 {
            let mut stream = stream;
            stream.stop();
            return Err(CameraError::CaptureStream {
                details: format!("device reported empty resolution {}x{}", width, height),
            }
            .into());
        }

        info!("Camera stream live at {}x{}", width, height);
        self.stream = Some(stream);
        Ok(())
    }

    /// Stop every track of the current stream. No-op when nothing is open.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            info!("Releasing {} camera stream", stream.facing());
            stream.stop();
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.as_ref().map(|s| s.is_live()).unwrap_or(false)
    }

    pub fn facing(&self) -> Option<FacingMode> {
        self.stream.as_ref().map(|s| s.facing())
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.stream.as_ref().map(|s| s.resolution())
    }

    /// The live video surface
    pub fn surface(&mut self) -> Result<&mut dyn VideoStream> {
        match self.stream.as_deref_mut() {
            Some(stream) if stream.is_live() => Ok(stream),
            _ => Err(CameraError::NotOpen.into()),
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.close();
    }
}
