use super::emitter::{ChannelEmitter, ResultEmitter};
use super::handle::{CaptureCommand, CaptureHandle};
use super::state::{AutoCaptureStateMachine, CaptureState, StepOutcome};
use crate::analyzer::QualityAnalyzer;
use crate::camera::{CameraBackend, CameraSession};
use crate::config::{FacingMode, IdCaptureConfig};
use crate::error::{CaptureError, IdCaptureError, Result};
use crate::events::{CaptureEvent, EventBus};
use crate::face::{
    FaceCapabilityStatus, FaceDetectorLoader, FaceValidationAdapter, FaceValidationResult,
};
use crate::frame::{CapturedImage, FrameBuffer, FrameEncoder, JpegFrameEncoder};
use crate::readiness::{CaptureReadiness, CaptureReadinessEvaluator, FaceSignal};
use crate::sampler::FrameSampler;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Snapshot of a running session
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStatus {
    pub session_id: Uuid,
    pub state: CaptureState,
    pub facing: FacingMode,
    pub camera_open: bool,
    pub auto_capture: bool,
    pub face_status: FaceCapabilityStatus,
    pub readiness: Option<CaptureReadiness>,
    pub frames_sampled: u64,
    pub captures: u64,
    pub confirmed: bool,
}

enum Flow {
    Continue,
    Stop,
}

/// Drives one capture session: camera, per-frame pipeline, countdown and review.
///
/// Every operation runs on the caller's task; [`CaptureController::run`]
/// multiplexes the frame clock, the countdown clock and caller commands
/// onto a single loop so ticks never overlap.
pub struct CaptureController {
    session_id: Uuid,
    config: IdCaptureConfig,
    camera: CameraSession,
    sampler: FrameSampler,
    analyzer: QualityAnalyzer,
    face: FaceValidationAdapter,
    evaluator: CaptureReadinessEvaluator,
    machine: AutoCaptureStateMachine,
    encoder: Box<dyn FrameEncoder>,
    emitter: Box<dyn ResultEmitter>,
    event_bus: Arc<EventBus>,
    facing: FacingMode,
    face_status: FaceCapabilityStatus,
    pending_face: Option<JoinHandle<FaceValidationResult>>,
    latest_face: Option<FaceValidationResult>,
    last_frame: Option<FrameBuffer>,
    last_readiness: Option<CaptureReadiness>,
}

impl CaptureController {
    pub fn builder() -> CaptureControllerBuilder {
        CaptureControllerBuilder::new()
    }

    /// Acquire the camera for `facing` and start scanning
    pub async fn open(&mut self, facing: FacingMode) -> Result<()> {
        if self.machine.is_confirmed() {
            return Err(CaptureError::AlreadyConfirmed.into());
        }

        self.discard_pending_face();
        self.camera.open(facing).await?;
        self.facing = facing;
        self.sampler.reset();
        self.last_frame = None;
        self.latest_face = None;
        self.last_readiness = None;
        self.face.ensure_loading();

        let (width, height) = self.camera.resolution().unwrap_or_default();
        self.publish(CaptureEvent::CameraOpened {
            facing,
            width,
            height,
        })
        .await;
        Ok(())
    }

    /// Stop sampling, cancel any countdown and release the camera
    pub async fn close(&mut self) {
        self.release("closed by caller").await;
    }

    async fn release(&mut self, reason: &str) {
        let outcome = self.machine.cancel_countdown("session closed");
        self.apply_outcome(outcome).await;
        self.discard_pending_face();
        self.last_frame = None;

        if self.camera.facing().is_some() {
            self.camera.close();
            self.publish(CaptureEvent::CameraClosed {
                reason: reason.to_string(),
            })
            .await;
        }
    }

    pub async fn toggle_auto_capture(&mut self, enabled: bool) {
        info!("Auto-capture {}", if enabled { "enabled" } else { "disabled" });
        let outcome = self.machine.set_auto_capture(enabled);
        self.publish(CaptureEvent::AutoCaptureToggled { enabled })
            .await;
        self.apply_outcome(outcome).await;
    }

    /// Flip between the user and environment cameras
    pub async fn switch_facing(&mut self) -> Result<FacingMode> {
        let outcome = self.machine.restart()?;
        self.apply_outcome(outcome).await;

        let facing = self.facing.flipped();
        info!("Switching camera from {} to {}", self.facing, facing);
        self.open(facing).await?;
        self.publish(CaptureEvent::FacingSwitched { facing }).await;
        Ok(facing)
    }

    /// Freeze the displayed frame now, regardless of quality
    pub async fn capture_manually(&mut self) -> Result<()> {
        if self.machine.state().is_frozen() {
            return Err(CaptureError::InvalidTransition {
                action: "capture",
                state: self.machine.state().to_string(),
            }
            .into());
        }

        let frame = self.displayed_frame()?;
        let outcome = self.machine.capture_manually(&frame, self.encoder.as_ref());
        self.settle_capture(outcome).await
    }

    /// Discard the frozen image and scan again on a freshly acquired camera
    pub async fn retake(&mut self) -> Result<()> {
        self.machine.retake()?;
        self.publish(CaptureEvent::RetakeRequested).await;

        let facing = self.facing;
        self.camera.close();
        self.open(facing).await
    }

    /// Hand the frozen image to the emitter and end the session
    pub async fn confirm(&mut self) -> Result<CapturedImage> {
        let image = self.machine.confirm()?;
        let emitted = self.emitter.emit(image.clone());

        self.publish(CaptureEvent::CaptureConfirmed {
            frame_id: image.frame_id,
            bytes: image.len(),
        })
        .await;
        self.release("capture confirmed").await;

        emitted?;
        Ok(image)
    }

    /// One frame-clock step: sample, analyze, validate, evaluate, advance
    pub async fn tick(&mut self) -> Result<()> {
        self.refresh_face_status().await;
        if self.machine.state().is_frozen() || !self.camera.is_open() {
            return Ok(());
        }

        self.collect_face_result().await;

        // let the sampler reuse the previous frame's buffer
        self.last_frame = None;
        let frame = self.sample_frame()?;
        let quality = self.analyzer.analyze(&frame);
        self.schedule_face_validation(&frame);

        let signal = self.face_signal();
        let readiness = self.evaluator.assess(&quality, &signal);
        let changed = self.last_readiness.as_ref().map(|r| r.ready) != Some(readiness.ready);
        if changed {
            self.publish(CaptureEvent::ReadinessChanged {
                ready: readiness.ready,
                brightness: quality.brightness,
                sharpness: quality.sharpness,
                has_face: readiness.face.as_ref().map(|f| f.has_face).unwrap_or(false),
            })
            .await;
        }

        let outcome = self.machine.observe_readiness(readiness.ready);
        self.last_frame = Some(frame);
        self.last_readiness = Some(readiness);
        self.apply_outcome(outcome).await;
        Ok(())
    }

    /// One countdown-clock step
    pub async fn countdown_tick(&mut self) -> Result<()> {
        if !matches!(self.machine.state(), CaptureState::CountingDown(_)) {
            return Ok(());
        }

        let frame = self.displayed_frame()?;
        let outcome = self.machine.countdown_tick(&frame, self.encoder.as_ref());
        match self.settle_capture(outcome).await {
            Err(IdCaptureError::Capture(CaptureError::Encoding { .. })) => Ok(()),
            other => other,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        CaptureStatus {
            session_id: self.session_id,
            state: self.machine.state(),
            facing: self.facing,
            camera_open: self.camera.is_open(),
            auto_capture: self.machine.auto_capture(),
            face_status: self.face.status(),
            readiness: self.last_readiness.clone(),
            frames_sampled: self.sampler.frame_count(),
            captures: self.machine.capture_count(),
            confirmed: self.machine.is_confirmed(),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.machine.state()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn captured_image(&self) -> Option<&CapturedImage> {
        self.machine.captured_image()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// Run the session loop until it is closed, confirmed, cancelled or fails.
    ///
    /// The camera is released on every exit path.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<CaptureCommand>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let frame_period = tick_period(self.config.camera.fps);
        let countdown_step = Duration::from_millis(self.config.countdown.step_ms.max(1));

        let mut frames = interval(frame_period);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut countdown: Option<(u64, Interval)> = None;

        info!(
            "Capture session {} running (frame every {:?}, countdown step {:?})",
            self.session_id, frame_period, countdown_step
        );

        let outcome = loop {
            self.sync_countdown_clock(&mut countdown, countdown_step);

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Capture session {} cancelled", self.session_id);
                    break Ok(());
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("Every capture handle dropped");
                        break Ok(());
                    };
                    match self.handle_command(command).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                _ = frames.tick() => {
                    if let Err(e) = self.tick().await {
                        break Err(e);
                    }
                }
                _ = next_countdown_step(&mut countdown) => {
                    if let Err(e) = self.countdown_tick().await {
                        break Err(e);
                    }
                }
            }
        };

        if let Err(e) = &outcome {
            error!("Capture session {} failed: {}", self.session_id, e);
            self.publish(CaptureEvent::SystemError {
                component: "capture".to_string(),
                error: e.to_string(),
            })
            .await;
        }

        self.release("session ended").await;
        info!("Capture session {} stopped", self.session_id);
        outcome
    }

    async fn handle_command(&mut self, command: CaptureCommand) -> Result<Flow> {
        trace!("Handling {:?}", command);
        match command {
            CaptureCommand::SetAutoCapture { enabled } => {
                self.toggle_auto_capture(enabled).await;
                Ok(Flow::Continue)
            }
            CaptureCommand::SwitchFacing { reply } => {
                let result = self.switch_facing().await;
                Self::reply(reply, result, Flow::Continue)
            }
            CaptureCommand::CaptureManually { reply } => {
                let result = self.capture_manually().await;
                Self::reply(reply, result, Flow::Continue)
            }
            CaptureCommand::Retake { reply } => {
                let result = self.retake().await;
                Self::reply(reply, result, Flow::Continue)
            }
            CaptureCommand::Confirm { reply } => {
                let result = self.confirm().await;
                let flow = if self.machine.is_confirmed() {
                    Flow::Stop
                } else {
                    Flow::Continue
                };
                Self::reply(reply, result, flow)
            }
            CaptureCommand::Status { reply } => {
                let _ = reply.send(self.status());
                Ok(Flow::Continue)
            }
            CaptureCommand::Close => Ok(Flow::Stop),
        }
    }

    /// Send `result` back to the caller; camera and system failures also end the loop
    fn reply<T>(reply: oneshot::Sender<Result<T>>, result: Result<T>, flow: Flow) -> Result<Flow> {
        let fatal = result
            .as_ref()
            .err()
            .filter(|e| e.is_fatal())
            .map(|e| e.to_string());

        if reply.send(result).is_err() {
            debug!("Caller stopped waiting for a reply");
        }

        match fatal {
            Some(message) => Err(IdCaptureError::system(message)),
            None => Ok(flow),
        }
    }

    fn sync_countdown_clock(&self, clock: &mut Option<(u64, Interval)>, step: Duration) {
        if !matches!(self.machine.state(), CaptureState::CountingDown(_)) {
            *clock = None;
            return;
        }

        let generation = self.machine.countdown_generation();
        if clock.as_ref().map(|(g, _)| *g) != Some(generation) {
            let mut steps = interval_at(Instant::now() + step, step);
            steps.set_missed_tick_behavior(MissedTickBehavior::Delay);
            *clock = Some((generation, steps));
        }
    }

    async fn settle_capture(&mut self, outcome: Result<StepOutcome>) -> Result<()> {
        match outcome {
            Ok(outcome) => {
                self.apply_outcome(outcome).await;
                Ok(())
            }
            Err(e) => {
                if let IdCaptureError::Capture(CaptureError::Encoding { .. }) = &e {
                    self.publish(CaptureEvent::CaptureFailed {
                        error: e.to_string(),
                    })
                    .await;
                }
                Err(e)
            }
        }
    }

    async fn apply_outcome(&mut self, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Unchanged => {}
            StepOutcome::CountdownStarted(from) => {
                self.publish(CaptureEvent::CountdownStarted { from }).await;
            }
            StepOutcome::CountdownTick(remaining) => {
                self.publish(CaptureEvent::CountdownTick { remaining })
                    .await;
            }
            StepOutcome::CountdownCancelled(reason) => {
                self.publish(CaptureEvent::CountdownCancelled {
                    reason: reason.to_string(),
                })
                .await;
            }
            StepOutcome::Captured {
                frame_id,
                bytes,
                manual,
            } => {
                self.discard_pending_face();
                self.publish(CaptureEvent::FrameCaptured {
                    frame_id,
                    bytes,
                    manual,
                })
                .await;
                self.machine.begin_review();
            }
        }
    }

    /// The frame on screen, sampling one if nothing was shown yet
    fn displayed_frame(&mut self) -> Result<FrameBuffer> {
        match &self.last_frame {
            Some(frame) => Ok(frame.clone()),
            None => {
                let frame = self.sample_frame()?;
                self.last_frame = Some(frame.clone());
                Ok(frame)
            }
        }
    }

    fn sample_frame(&mut self) -> Result<FrameBuffer> {
        let surface = self.camera.surface()?;
        self.sampler.sample(surface)
    }

    fn schedule_face_validation(&mut self, frame: &FrameBuffer) {
        if self.pending_face.is_some() || !self.face.is_ready() {
            return;
        }

        let adapter = self.face.clone();
        let frame = frame.clone();
        self.pending_face = Some(tokio::spawn(async move { adapter.validate(&frame).await }));
    }

    async fn collect_face_result(&mut self) {
        let finished = self
            .pending_face
            .as_ref()
            .is_some_and(|handle| handle.is_finished());
        if !finished {
            return;
        }

        if let Some(handle) = self.pending_face.take() {
            match handle.await {
                Ok(result) => {
                    trace!(
                        "Face result: has_face={} confidence={:.2} issues={:?}",
                        result.has_face,
                        result.confidence,
                        result.issues
                    );
                    self.latest_face = Some(result);
                }
                Err(e) => warn!("Face validation task failed: {}", e),
            }
        }
    }

    fn discard_pending_face(&mut self) {
        if let Some(handle) = self.pending_face.take() {
            handle.abort();
        }
    }

    /// Unloaded until the capability is ready and has judged at least one frame
    fn face_signal(&self) -> FaceSignal {
        match &self.latest_face {
            Some(result) if self.face.is_ready() => FaceSignal::Ready(result.clone()),
            _ => FaceSignal::Unloaded,
        }
    }

    async fn refresh_face_status(&mut self) {
        let status = self.face.status();
        if status != self.face_status {
            self.face_status = status;
            self.publish(CaptureEvent::FaceCapabilityChanged { status })
                .await;
        }
    }

    async fn publish(&mut self, event: CaptureEvent) {
        if let Err(e) = self.event_bus.publish(event).await {
            debug!("Event not delivered: {}", e);
        }
    }
}

/// Frame clock period for `fps`, never shorter than one millisecond
pub(crate) fn tick_period(fps: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(fps.max(1))).max(Duration::from_millis(1))
}

async fn next_countdown_step(clock: &mut Option<(u64, Interval)>) {
    match clock {
        Some((_, steps)) => {
            steps.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Builder for capture controllers
pub struct CaptureControllerBuilder {
    config: Option<IdCaptureConfig>,
    backend: Option<Arc<dyn CameraBackend>>,
    face_loader: Option<Arc<dyn FaceDetectorLoader>>,
    event_bus: Option<Arc<EventBus>>,
    encoder: Option<Box<dyn FrameEncoder>>,
    emitter: Option<Box<dyn ResultEmitter>>,
}

impl CaptureControllerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            backend: None,
            face_loader: None,
            event_bus: None,
            encoder: None,
            emitter: None,
        }
    }

    pub fn config(mut self, config: IdCaptureConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CameraBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn face_loader(mut self, loader: Arc<dyn FaceDetectorLoader>) -> Self {
        self.face_loader = Some(loader);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Replace the default JPEG encoder
    pub fn encoder(mut self, encoder: Box<dyn FrameEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn emitter(mut self, emitter: Box<dyn ResultEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn build(self) -> Result<CaptureController> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let backend = self
            .backend
            .ok_or_else(|| IdCaptureError::system("Camera backend is required"))?;
        let face_loader = self
            .face_loader
            .ok_or_else(|| IdCaptureError::system("Face detector loader is required"))?;
        let emitter = self
            .emitter
            .ok_or_else(|| IdCaptureError::system("Result emitter is required"))?;

        let event_bus = self
            .event_bus
            .unwrap_or_else(|| Arc::new(EventBus::new(config.system.event_bus_capacity)));
        let encoder = self
            .encoder
            .unwrap_or_else(|| Box::new(JpegFrameEncoder::new(config.encoding.jpeg_quality)));

        let session_id = Uuid::new_v4();
        debug!("Building capture session {}", session_id);

        Ok(CaptureController {
            session_id,
            camera: CameraSession::new(backend, config.camera.clone()),
            sampler: FrameSampler::new(),
            analyzer: QualityAnalyzer::new(config.quality.clone()),
            face: FaceValidationAdapter::new(face_loader, config.face.clone()),
            evaluator: CaptureReadinessEvaluator::new(config.readiness.clone()),
            machine: AutoCaptureStateMachine::new(
                config.countdown.start,
                config.countdown.auto_capture,
            ),
            encoder,
            emitter,
            event_bus,
            facing: config.camera.facing,
            face_status: FaceCapabilityStatus::Unloaded,
            pending_face: None,
            latest_face: None,
            last_frame: None,
            last_readiness: None,
            config,
        })
    }

    /// Open the camera and run the session on its own task.
    ///
    /// Without an explicit emitter the confirmed image is delivered over a
    /// channel available from [`CaptureHandle::take_result`].
    pub async fn spawn(mut self, facing: Option<FacingMode>) -> Result<CaptureHandle> {
        let result = match self.emitter {
            Some(_) => None,
            None => {
                let (emitter, receiver) = ChannelEmitter::new();
                self.emitter = Some(Box::new(emitter));
                Some(receiver)
            }
        };

        let mut controller = self.build()?;
        let facing = facing.unwrap_or(controller.config.camera.facing);
        controller.open(facing).await?;

        let (commands, receiver) = mpsc::channel(controller.config.system.command_capacity.max(1));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(controller.run(receiver, cancel.clone()));

        Ok(CaptureHandle::new(commands, cancel, result, task))
    }
}

impl Default for CaptureControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
