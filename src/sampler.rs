use crate::camera::VideoStream;
use crate::error::Result;
use crate::frame::FrameBuffer;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::trace;

/// Copies the presented video frame into a fresh [`FrameBuffer`] each tick.
///
/// The backing allocation is reused whenever no earlier frame still holds
/// it (for example a frozen capture or a pending face validation); the
/// buffer is always fully overwritten by the stream before it is handed out.
#[derive(Debug, Default)]
pub struct FrameSampler {
    backing: Option<Arc<Vec<u8>>>,
    next_id: u64,
    reused: u64,
    allocated: u64,
}

impl FrameSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample the surface's current frame at its native resolution
    pub fn sample(&mut self, surface: &mut dyn VideoStream) -> Result<FrameBuffer> {
        let (width, height) = surface.resolution();
        let size = FrameBuffer::expected_size(width, height);

        let reusable = self
            .backing
            .take()
            .filter(|shared| shared.len() == size && Arc::strong_count(shared) == 1);
        let mut backing = match reusable {
            Some(shared) => {
                self.reused += 1;
                shared
            }
            None => self.allocate(size),
        };

        // unique at this point, so make_mut never clones
        surface.read_frame(Arc::make_mut(&mut backing).as_mut_slice())?;

        let id = self.next_id;
        self.next_id += 1;
        self.backing = Some(Arc::clone(&backing));

        trace!("Sampled frame {} ({}x{})", id, width, height);
        Ok(FrameBuffer::from_shared(
            id,
            SystemTime::now(),
            width,
            height,
            backing,
        ))
    }

    fn allocate(&mut self, size: usize) -> Arc<Vec<u8>> {
        self.allocated += 1;
        Arc::new(vec![0u8; size])
    }

    /// Forget the backing buffer, e.g. after the camera changed
    pub fn reset(&mut self) {
        self.backing = None;
    }

    /// Frames sampled so far
    pub fn frame_count(&self) -> u64 {
        self.next_id
    }

    /// (reused, allocated) backing buffer counts
    pub fn buffer_stats(&self) -> (u64, u64) {
        (self.reused, self.allocated)
    }
}
