use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{CaptureError, Result};

/// Bytes per pixel of every sampled frame (RGBA)
pub const CHANNELS: usize = 4;

/// A single sampled video frame in row-major RGBA layout.
///
/// Frames are never mutated once created; the pixel data is shared so that
/// the analyzer, the face adapter and a frozen capture can all hold the same
/// frame without copying.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Unique frame identifier within a sampler
    pub id: u64,
    /// Timestamp when the frame was sampled
    pub timestamp: SystemTime,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// RGBA pixel data (shared ownership)
    pub data: Arc<Vec<u8>>,
}

impl FrameBuffer {
    /// Create a frame from owned RGBA data
    pub fn new(id: u64, timestamp: SystemTime, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::from_shared(id, timestamp, width, height, Arc::new(data))
    }

    pub(crate) fn from_shared(
        id: u64,
        timestamp: SystemTime,
        width: u32,
        height: u32,
        data: Arc<Vec<u8>>,
    ) -> Self {
        Self {
            id,
            timestamp,
            width,
            height,
            data,
        }
    }

    /// Expected data length for the frame dimensions
    pub fn expected_size(width: u32, height: u32) -> usize {
        width as usize * height as usize * CHANNELS
    }

    /// Validate frame data size against the dimensions
    pub fn validate_size(&self) -> bool {
        self.data.len() == Self::expected_size(self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// RGBA value at (x, y); callers must stay in bounds
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }

    /// Mean of the three color channels of the pixel at (x, y)
    #[inline]
    pub fn intensity(&self, x: u32, y: u32) -> f64 {
        let [r, g, b, _] = self.pixel(x, y);
        (r as f64 + g as f64 + b as f64) / 3.0
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// An encoded still image frozen from the live feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedImage {
    /// Id of the frame the image was encoded from
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    /// MIME type of `bytes`
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Arc<Vec<u8>>,
    pub captured_at: DateTime<Utc>,
}

impl CapturedImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Freezes a frame into an encoded still image
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &FrameBuffer) -> Result<CapturedImage>;
}

/// JPEG encoder used for confirmed captures
#[derive(Debug, Clone)]
pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&self, frame: &FrameBuffer) -> Result<CapturedImage> {
        if frame.width == 0 || frame.height == 0 || !frame.validate_size() {
            return Err(CaptureError::Encoding {
                details: format!(
                    "frame {} has {} bytes for {}x{}",
                    frame.id,
                    frame.data.len(),
                    frame.width,
                    frame.height
                ),
            }
            .into());
        }

        let rgba = RgbaImage::from_raw(frame.width, frame.height, frame.data.to_vec())
            .ok_or_else(|| CaptureError::Encoding {
                details: "Failed to create RGBA image from frame data".to_string(),
            })?;
        // JPEG carries no alpha channel
        let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();

        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
        encoder
            .encode_image(&rgb)
            .map_err(|e| CaptureError::Encoding {
                details: e.to_string(),
            })?;

        tracing::debug!(
            "Encoded frame {} ({}x{}) to {} JPEG bytes at quality {}",
            frame.id,
            frame.width,
            frame.height,
            buf.len(),
            self.quality
        );

        Ok(CapturedImage {
            frame_id: frame.id,
            width: frame.width,
            height: frame.height,
            mime_type: "image/jpeg".to_string(),
            bytes: Arc::new(buf),
            captured_at: Utc::now(),
        })
    }
}
