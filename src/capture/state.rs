use crate::error::{CaptureError, IdCaptureError, Result};
use crate::frame::{CapturedImage, FrameBuffer, FrameEncoder};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Session state of the capture flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Scanning,
    /// Seconds left before the automatic capture
    CountingDown(u8),
    Captured,
    Reviewing,
}

impl CaptureState {
    /// A captured image is held and frame sampling is paused
    pub fn is_frozen(&self) -> bool {
        matches!(self, CaptureState::Captured | CaptureState::Reviewing)
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Scanning => write!(f, "scanning"),
            CaptureState::CountingDown(n) => write!(f, "counting down ({})", n),
            CaptureState::Captured => write!(f, "captured"),
            CaptureState::Reviewing => write!(f, "reviewing"),
        }
    }
}

/// What a single state machine step did
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Unchanged,
    CountdownStarted(u8),
    CountdownTick(u8),
    CountdownCancelled(&'static str),
    Captured {
        frame_id: u64,
        bytes: usize,
        manual: bool,
    },
}

/// Scanning / countdown / review flow driven by readiness and the two clocks.
///
/// Holds the captured image exactly while in `Captured` or `Reviewing`.
#[derive(Debug)]
pub struct AutoCaptureStateMachine {
    state: CaptureState,
    countdown_start: u8,
    auto_capture: bool,
    captured_image: Option<CapturedImage>,
    confirmed: bool,
    countdowns_started: u64,
    captures: u64,
}

impl AutoCaptureStateMachine {
    pub fn new(countdown_start: u8, auto_capture: bool) -> Self {
        Self {
            state: CaptureState::Scanning,
            countdown_start: countdown_start.max(1),
            auto_capture,
            captured_image: None,
            confirmed: false,
            countdowns_started: 0,
            captures: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn auto_capture(&self) -> bool {
        self.auto_capture
    }

    pub fn captured_image(&self) -> Option<&CapturedImage> {
        self.captured_image.as_ref()
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Countdowns started so far; identifies the running countdown
    pub fn countdown_generation(&self) -> u64 {
        self.countdowns_started
    }

    /// Frames frozen so far, including retaken ones
    pub fn capture_count(&self) -> u64 {
        self.captures
    }

    /// Feed the readiness verdict of the latest frame
    pub fn observe_readiness(&mut self, ready: bool) -> StepOutcome {
        match self.state {
            CaptureState::Scanning if ready && self.auto_capture => {
                self.state = CaptureState::CountingDown(self.countdown_start);
                self.countdowns_started += 1;
                debug!("Readiness reached, counting down from {}", self.countdown_start);
                StepOutcome::CountdownStarted(self.countdown_start)
            }
            CaptureState::CountingDown(_) if !ready => {
                self.state = CaptureState::Scanning;
                debug!("Readiness lost during countdown");
                StepOutcome::CountdownCancelled("readiness lost")
            }
            _ => StepOutcome::Unchanged,
        }
    }

    /// Advance the countdown by one step, capturing `frame` when it reaches zero
    pub fn countdown_tick(
        &mut self,
        frame: &FrameBuffer,
        encoder: &dyn FrameEncoder,
    ) -> Result<StepOutcome> {
        let CaptureState::CountingDown(remaining) = self.state else {
            return Ok(StepOutcome::Unchanged);
        };

        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            self.state = CaptureState::CountingDown(remaining);
            return Ok(StepOutcome::CountdownTick(remaining));
        }

        self.freeze(frame, encoder, false)
    }

    /// Capture `frame` immediately, bypassing every quality gate
    pub fn capture_manually(
        &mut self,
        frame: &FrameBuffer,
        encoder: &dyn FrameEncoder,
    ) -> Result<StepOutcome> {
        match self.state {
            CaptureState::Scanning | CaptureState::CountingDown(_) => {
                self.freeze(frame, encoder, true)
            }
            state => Err(Self::invalid("capture", state)),
        }
    }

    fn freeze(
        &mut self,
        frame: &FrameBuffer,
        encoder: &dyn FrameEncoder,
        manual: bool,
    ) -> Result<StepOutcome> {
        match encoder.encode(frame) {
            Ok(image) => {
                let outcome = StepOutcome::Captured {
                    frame_id: image.frame_id,
                    bytes: image.len(),
                    manual,
                };
                self.captured_image = Some(image);
                self.state = CaptureState::Captured;
                self.captures += 1;
                info!(
                    "Captured frame {} ({})",
                    frame.id,
                    if manual { "manual" } else { "auto" }
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!("Failed to capture frame {}: {}", frame.id, e);
                self.captured_image = None;
                self.state = CaptureState::Scanning;
                Err(e)
            }
        }
    }

    /// Move a fresh capture into review
    pub fn begin_review(&mut self) -> bool {
        if self.state == CaptureState::Captured {
            self.state = CaptureState::Reviewing;
            true
        } else {
            false
        }
    }

    /// Discard the captured image and resume scanning
    pub fn retake(&mut self) -> Result<()> {
        if self.confirmed {
            return Err(CaptureError::AlreadyConfirmed.into());
        }
        if !self.state.is_frozen() {
            return Err(Self::invalid("retake", self.state));
        }

        self.captured_image = None;
        self.state = CaptureState::Scanning;
        debug!("Captured image discarded, scanning again");
        Ok(())
    }

    /// Accept the captured image. Succeeds once per session.
    pub fn confirm(&mut self) -> Result<CapturedImage> {
        if self.confirmed {
            return Err(CaptureError::AlreadyConfirmed.into());
        }
        let image = match (&self.state, &self.captured_image) {
            (CaptureState::Captured | CaptureState::Reviewing, Some(image)) => image.clone(),
            _ => return Err(Self::invalid("confirm", self.state)),
        };

        self.state = CaptureState::Reviewing;
        self.confirmed = true;
        Ok(image)
    }

    pub fn set_auto_capture(&mut self, enabled: bool) -> StepOutcome {
        self.auto_capture = enabled;
        if !enabled && matches!(self.state, CaptureState::CountingDown(_)) {
            self.state = CaptureState::Scanning;
            return StepOutcome::CountdownCancelled("auto-capture disabled");
        }
        StepOutcome::Unchanged
    }

    /// Return to scanning for a new camera; refused while an image is held
    pub fn restart(&mut self) -> Result<StepOutcome> {
        match self.state {
            CaptureState::Scanning => Ok(StepOutcome::Unchanged),
            CaptureState::CountingDown(_) => {
                self.state = CaptureState::Scanning;
                Ok(StepOutcome::CountdownCancelled("camera switched"))
            }
            state => Err(Self::invalid("switch camera", state)),
        }
    }

    /// Drop any countdown when the session closes; a held image is kept
    pub fn cancel_countdown(&mut self, reason: &'static str) -> StepOutcome {
        if matches!(self.state, CaptureState::CountingDown(_)) {
            self.state = CaptureState::Scanning;
            return StepOutcome::CountdownCancelled(reason);
        }
        StepOutcome::Unchanged
    }

    fn invalid(action: &'static str, state: CaptureState) -> IdCaptureError {
        CaptureError::InvalidTransition {
            action,
            state: state.to_string(),
        }
        .into()
    }
}
