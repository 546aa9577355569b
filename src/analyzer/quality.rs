use crate::config::QualityConfig;
use crate::frame::FrameBuffer;

use image::{ImageBuffer, Rgba};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

type RgbaView<'a> = ImageBuffer<Rgba<u8>, &'a [u8]>;

/// Per-frame quality scores
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Mean color-channel intensity, 0-255
    pub brightness: f64,
    /// Laplacian edge energy per pixel
    pub sharpness: f64,
    /// Something with edges and adequate exposure fills the frame
    pub has_document: bool,
    /// The subject contrasts with its surroundings near the corner
    pub is_aligned: bool,
}

/// Scores brightness, focus and framing of a frame.
///
/// `analyze` is a pure function of its input: the same frame always yields
/// the same metrics and no state is carried between frames.
#[derive(Debug, Clone)]
pub struct QualityAnalyzer {
    config: QualityConfig,
}

impl QualityAnalyzer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, frame: &FrameBuffer) -> QualityMetrics {
        let Some(image) = RgbaView::from_raw(frame.width, frame.height, frame.data.as_slice())
        else {
            warn!(
                "Frame {} has {} bytes for {}x{}; scoring as empty",
                frame.id,
                frame.data.len(),
                frame.width,
                frame.height
            );
            return QualityMetrics::default();
        };

        if frame.pixel_count() == 0 {
            return QualityMetrics::default();
        }

        let brightness = Self::brightness(&image);
        let sharpness = Self::sharpness(&image);

        let has_document = brightness > self.config.document_brightness_min
            && brightness < self.config.document_brightness_max
            && sharpness > self.config.document_sharpness_min;

        let is_aligned =
            has_document && self.center_corner_contrast(&image) > self.config.alignment_contrast_min;

        debug!(
            "Frame {} quality: brightness={:.1} sharpness={:.2} document={} aligned={}",
            frame.id, brightness, sharpness, has_document, is_aligned
        );

        QualityMetrics {
            brightness,
            sharpness,
            has_document,
            is_aligned,
        }
    }

    /// Mean over all pixels of the per-pixel RGB average
    fn brightness(image: &RgbaView<'_>) -> f64 {
        let total: u64 = image
            .pixels()
            .map(|p| p[0] as u64 + p[1] as u64 + p[2] as u64)
            .sum();
        let pixels = image.width() as u64 * image.height() as u64;
        total as f64 / 3.0 / pixels as f64
    }

    /// Sum of |4c - t - b - l - r| over interior pixels of the red channel,
    /// normalized by the total pixel count
    fn sharpness(image: &RgbaView<'_>) -> f64 {
        let (width, height) = image.dimensions();
        if width < 3 || height < 3 {
            return 0.0;
        }

        let red = |x: u32, y: u32| image.get_pixel(x, y)[0] as i32;
        let mut energy: u64 = 0;
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let laplacian =
                    4 * red(x, y) - red(x, y - 1) - red(x, y + 1) - red(x - 1, y) - red(x + 1, y);
                energy += laplacian.unsigned_abs() as u64;
            }
        }

        energy as f64 / (width as u64 * height as u64) as f64
    }

    /// Intensity difference between the center pixel and a pixel near the top-left corner
    fn center_corner_contrast(&self, image: &RgbaView<'_>) -> f64 {
        let (width, height) = image.dimensions();
        let intensity = |x: u32, y: u32| {
            let p = image.get_pixel(x, y);
            (p[0] as f64 + p[1] as f64 + p[2] as f64) / 3.0
        };

        let fraction = self.config.corner_sample_fraction;
        let corner_x = ((width as f64 * fraction) as u32).min(width - 1);
        let corner_y = ((height as f64 * fraction) as u32).min(height - 1);

        (intensity(width / 2, height / 2) - intensity(corner_x, corner_y)).abs()
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }
}
