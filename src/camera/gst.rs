use super::backend::{CameraBackend, StreamRequest, VideoStream};
use crate::config::{CameraConfig, FacingMode};
use crate::error::{CameraError, Result};
use crate::frame::CHANNELS;
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::{Pipeline, Sample};
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Longest wait for the first frame after the pipeline starts playing
const FIRST_SAMPLE_TIMEOUT_MS: u64 = 2_000;

/// V4L2 camera backend built on a GStreamer RGBA pipeline
pub struct GstCameraBackend {
    user_device: u32,
    environment_device: u32,
}

impl GstCameraBackend {
    pub fn new(config: &CameraConfig) -> Result<Self> {
        gstreamer::init().map_err(|e| CameraError::Configuration {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        Ok(Self {
            user_device: config.user_device,
            environment_device: config.environment_device,
        })
    }

    fn device_path(&self, facing: FacingMode) -> PathBuf {
        let index = match facing {
            FacingMode::User => self.user_device,
            FacingMode::Environment => self.environment_device,
        };
        PathBuf::from(format!("/dev/video{}", index))
    }

    fn build_pipeline_string(device: &str, request: &StreamRequest) -> String {
        let (width, height) = request.resolution;
        format!(
            "v4l2src device={} io-mode=mmap ! \
             videoconvert ! videoscale ! \
             video/x-raw,format=RGBA,width={},height={} ! \
             appsink name=sink sync=false max-buffers=1 drop=true enable-last-sample=false",
            device, width, height
        )
    }

    /// Fail fast with a typed error before building a pipeline
    fn check_device(&self, facing: FacingMode, device: &Path) -> Result<()> {
        if !device.exists() {
            return Err(CameraError::Unsupported {
                facing: facing.to_string(),
                details: format!("{} does not exist", device.display()),
            }
            .into());
        }

        match std::fs::OpenOptions::new().read(true).open(device) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(CameraError::PermissionDenied {
                    details: format!("{}: {}", device.display(), e),
                }
                .into())
            }
            Err(e) => Err(CameraError::Unsupported {
                facing: facing.to_string(),
                details: format!("{}: {}", device.display(), e),
            }
            .into()),
        }
    }
}

#[async_trait]
impl CameraBackend for GstCameraBackend {
    fn name(&self) -> &str {
        "gstreamer"
    }

    async fn acquire(&self, request: &StreamRequest) -> Result<Box<dyn VideoStream>> {
        let device = self.device_path(request.facing);
        self.check_device(request.facing, &device)?;

        let pipeline_desc =
            Self::build_pipeline_string(&device.to_string_lossy(), request);
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CameraError::Configuration {
                details: "Failed to get appsink element".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to AppSink".to_string(),
            })?;

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(CameraError::Unsupported {
                facing: request.facing.to_string(),
                details: format!("Failed to start pipeline: {}", e),
            }
            .into());
        }

        debug!("GStreamer pipeline playing for {}", device.display());

        // wait for the first frame off the runtime threads
        let first = {
            let appsink = appsink.clone();
            tokio::task::spawn_blocking(move || {
                appsink.try_pull_sample(gstreamer::ClockTime::from_mseconds(
                    FIRST_SAMPLE_TIMEOUT_MS,
                ))
            })
            .await
        };

        let last_sample = match first {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(CameraError::CaptureStream {
                    details: format!(
                        "no frame from {} within {}ms",
                        device.display(),
                        FIRST_SAMPLE_TIMEOUT_MS
                    ),
                }
                .into());
            }
            Err(e) => {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(CameraError::CaptureStream {
                    details: format!("first frame wait failed: {}", e),
                }
                .into());
            }
        };

        Ok(Box::new(GstVideoStream {
            pipeline,
            appsink,
            last_sample,
            resolution: request.resolution,
            facing: request.facing,
            live: true,
        }))
    }
}

struct GstVideoStream {
    pipeline: Pipeline,
    appsink: AppSink,
    last_sample: Sample,
    resolution: (u32, u32),
    facing: FacingMode,
    live: bool,
}

impl VideoStream for GstVideoStream {
    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn facing(&self) -> FacingMode {
        self.facing
    }

    /// Never blocks: when the pipeline has nothing new the last frame repeats
    fn read_frame(&mut self, dst: &mut [u8]) -> Result<()> {
        if !self.live {
            return Err(CameraError::NotOpen.into());
        }

        if let Some(sample) = self.appsink.try_pull_sample(gstreamer::ClockTime::ZERO) {
            self.last_sample = sample;
        }
        copy_sample(&self.last_sample, self.resolution, dst)
    }

    fn stop(&mut self) {
        if !self.live {
            return;
        }
        self.live = false;
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to stop GStreamer pipeline cleanly: {}", e);
        }
        info!("GStreamer {} camera stream stopped", self.facing);
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

impl Drop for GstVideoStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn copy_sample(sample: &Sample, resolution: (u32, u32), dst: &mut [u8]) -> Result<()> {
    let caps = sample.caps().ok_or_else(|| CameraError::CaptureStream {
        details: "No caps in sample".to_string(),
    })?;

    let video_info = VideoInfo::from_caps(caps).map_err(|e| CameraError::CaptureStream {
        details: format!("Failed to get video info: {}", e),
    })?;

    if (video_info.width(), video_info.height()) != resolution {
        return Err(CameraError::CaptureStream {
            details: format!(
                "negotiated {}x{}, requested {}x{}",
                video_info.width(),
                video_info.height(),
                resolution.0,
                resolution.1
            ),
        }
        .into());
    }

    let offset = video_info.offset().first().copied().unwrap_or(0);
    let stride = video_info
        .stride()
        .first()
        .and_then(|s| usize::try_from(*s).ok())
        .ok_or_else(|| CameraError::CaptureStream {
            details: "RGBA plane has no usable stride".to_string(),
        })?;

    let buffer = sample.buffer().ok_or_else(|| CameraError::CaptureStream {
        details: "No buffer in sample".to_string(),
    })?;

    let map = buffer
        .map_readable()
        .map_err(|e| CameraError::CaptureStream {
            details: format!("Failed to map buffer: {}", e),
        })?;

    copy_rows(map.as_slice(), offset, stride, resolution, dst)
}

/// Pack a strided RGBA plane into `dst`, dropping any row padding
fn copy_rows(
    src: &[u8],
    offset: usize,
    stride: usize,
    (width, height): (u32, u32),
    dst: &mut [u8],
) -> Result<()> {
    let row = width as usize * CHANNELS;
    let rows = height as usize;

    if row == 0 || stride < row || dst.len() != row * rows {
        return Err(CameraError::CaptureStream {
            details: format!(
                "cannot pack {}x{} frame with stride {} into {} bytes",
                width,
                height,
                stride,
                dst.len()
            ),
        }
        .into());
    }

    let needed = offset + stride * rows.saturating_sub(1) + row;
    if src.len() < needed {
        return Err(CameraError::CaptureStream {
            details: format!("sample holds {} bytes, need {}", src.len(), needed),
        }
        .into());
    }

    for (y, out) in dst.chunks_exact_mut(row).enumerate() {
        let start = offset + y * stride;
        out.copy_from_slice(&src[start..start + row]);
    }
    Ok(())
}
