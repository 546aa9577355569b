use super::backend::{CameraBackend, StreamRequest, VideoStream};
use crate::config::FacingMode;
use crate::error::{CameraError, Result};
use crate::frame::{FrameBuffer, CHANNELS};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// What the synthetic camera is pointed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scene {
    /// Bright striped card centered on a darker background
    Document,
    /// Uniform mid-gray wall
    Blank,
    /// Underexposed, featureless frame
    Dark,
}

impl Scene {
    /// Next scene when cycling interactively
    pub fn next(self) -> Self {
        match self {
            Scene::Document => Scene::Blank,
            Scene::Blank => Scene::Dark,
            Scene::Dark => Scene::Document,
        }
    }
}

const BACKGROUND: u8 = 70;
const CARD: u8 = 220;
const CARD_TEXT: u8 = 40;
const BLANK: u8 = 128;
const DARK: u8 = 20;

/// Counters of synthetic streams for leak checks
#[derive(Debug, Default)]
pub struct StreamCounters {
    live: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
}

impl StreamCounters {
    fn acquired(&self) {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    fn released(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    /// Streams currently open
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open streams ever observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total streams ever acquired
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

/// In-process camera rendering a synthetic scene at the requested resolution
pub struct SyntheticCameraBackend {
    scene: Arc<RwLock<Scene>>,
    counters: Arc<StreamCounters>,
    available: HashSet<FacingMode>,
    permission_denied: AtomicBool,
}

impl SyntheticCameraBackend {
    pub fn new(scene: Scene) -> Self {
        Self {
            scene: Arc::new(RwLock::new(scene)),
            counters: Arc::new(StreamCounters::default()),
            available: [FacingMode::User, FacingMode::Environment]
                .into_iter()
                .collect(),
            permission_denied: AtomicBool::new(false),
        }
    }

    /// Remove a camera, so opening it fails with `Unsupported`
    pub fn without_facing(mut self, facing: FacingMode) -> Self {
        self.available.remove(&facing);
        self
    }

    /// Make every subsequent acquire fail with `PermissionDenied`
    pub fn set_permission_denied(&self, denied: bool) {
        self.permission_denied.store(denied, Ordering::SeqCst);
    }

    pub fn set_scene(&self, scene: Scene) {
        debug!("Synthetic camera scene set to {:?}", scene);
        *self.scene.write() = scene;
    }

    pub fn scene(&self) -> Scene {
        *self.scene.read()
    }

    pub fn counters(&self) -> Arc<StreamCounters> {
        Arc::clone(&self.counters)
    }
}

#[async_trait]
impl CameraBackend for SyntheticCameraBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn acquire(&self, request: &StreamRequest) -> Result<Box<dyn VideoStream>> {
        if self.permission_denied.load(Ordering::SeqCst) {
            return Err(CameraError::PermissionDenied {
                details: "synthetic camera access denied".to_string(),
            }
            .into());
        }

        if !self.available.contains(&request.facing) {
            return Err(CameraError::Unsupported {
                facing: request.facing.to_string(),
                details: "no synthetic device for this facing mode".to_string(),
            }
            .into());
        }

        let (width, height) = request.resolution;
        self.counters.acquired();
        debug!(
            "Synthetic {} stream acquired ({} live)",
            request.facing,
            self.counters.live()
        );

        Ok(Box::new(SyntheticStream {
            width,
            height,
            facing: request.facing,
            scene: Arc::clone(&self.scene),
            counters: Arc::clone(&self.counters),
            live: true,
        }))
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    facing: FacingMode,
    scene: Arc<RwLock<Scene>>,
    counters: Arc<StreamCounters>,
    live: bool,
}

impl VideoStream for SyntheticStream {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn facing(&self) -> FacingMode {
        self.facing
    }

    fn read_frame(&mut self, dst: &mut [u8]) -> Result<()> {
        if !self.live {
            return Err(CameraError::NotOpen.into());
        }
        let expected = FrameBuffer::expected_size(self.width, self.height);
        if dst.len() != expected {
            return Err(CameraError::CaptureStream {
                details: format!("destination holds {} bytes, need {}", dst.len(), expected),
            }
            .into());
        }

        let scene = *self.scene.read();
        render_scene(scene, self.width, self.height, dst);
        trace!("Rendered synthetic {:?} frame", scene);
        Ok(())
    }

    fn stop(&mut self) {
        if self.live {
            self.live = false;
            self.counters.released();
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fill `dst` with an RGBA rendering of `scene`
pub fn render_scene(scene: Scene, width: u32, height: u32, dst: &mut [u8]) {
    if width == 0 {
        return;
    }
    let center_row = height as i64 / 2;
    let (left, right) = (width as u64 * 2 / 10, width as u64 * 8 / 10);
    let (top, bottom) = (height as u64 * 2 / 10, height as u64 * 8 / 10);

    for (i, px) in dst.chunks_exact_mut(CHANNELS).enumerate() {
        let x = (i as u64) % width as u64;
        let y = (i as u64) / width as u64;

        let value = match scene {
            Scene::Blank => BLANK,
            Scene::Dark => DARK,
            Scene::Document => {
                let on_card = x >= left && x < right && y >= top && y < bottom;
                // text lines are phase-locked so the center row is card stock
                let text_line = matches!((y as i64 - center_row).rem_euclid(8), 4 | 5);
                match (on_card, text_line) {
                    (false, _) => BACKGROUND,
                    (true, true) => CARD_TEXT,
                    (true, false) => CARD,
                }
            }
        };

        px[0] = value;
        px[1] = value;
        px[2] = value;
        px[3] = 255;
    }
}
