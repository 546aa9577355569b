use super::*;
use crate::camera::{Scene, SyntheticCameraBackend};
use crate::config::{FaceFallback, FacingMode, IdCaptureConfig};
use crate::error::{CameraError, CaptureError, IdCaptureError, Result};
use crate::events::{CaptureEvent, EventBus};
use crate::face::{ScriptedFaceDetector, ScriptedLoader};
use crate::frame::{CapturedImage, FrameBuffer, FrameEncoder, JpegFrameEncoder};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, oneshot};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

struct FailingEncoder;

impl FrameEncoder for FailingEncoder {
    fn encode(&self, frame: &FrameBuffer) -> Result<CapturedImage> {
        Err(CaptureError::Encoding {
            details: format!("refusing frame {}", frame.id),
        }
        .into())
    }
}

fn test_frame(id: u64) -> FrameBuffer {
    FrameBuffer::new(
        id,
        SystemTime::now(),
        8,
        8,
        vec![128u8; FrameBuffer::expected_size(8, 8)],
    )
}

fn encoder() -> JpegFrameEncoder {
    JpegFrameEncoder::new(92)
}

/// An image is held exactly while captured or reviewing
fn assert_image_invariant(machine: &AutoCaptureStateMachine) {
    assert_eq!(
        machine.captured_image().is_some(),
        machine.state().is_frozen(),
        "state {}",
        machine.state()
    );
}

fn counting_machine() -> AutoCaptureStateMachine {
    let mut machine = AutoCaptureStateMachine::new(3, true);
    assert_eq!(
        machine.observe_readiness(true),
        StepOutcome::CountdownStarted(3)
    );
    machine
}

// State machine

#[test]
fn test_readiness_starts_countdown() {
    let machine = counting_machine();
    assert_eq!(machine.state(), CaptureState::CountingDown(3));
    assert_eq!(machine.countdown_generation(), 1);
    assert_image_invariant(&machine);
}

#[test]
fn test_not_ready_keeps_scanning() {
    let mut machine = AutoCaptureStateMachine::new(3, true);
    for _ in 0..10 {
        assert_eq!(machine.observe_readiness(false), StepOutcome::Unchanged);
    }
    assert_eq!(machine.state(), CaptureState::Scanning);
}

#[test]
fn test_auto_capture_disabled_never_counts_down() {
    let mut machine = AutoCaptureStateMachine::new(3, false);
    assert_eq!(machine.observe_readiness(true), StepOutcome::Unchanged);
    assert_eq!(machine.state(), CaptureState::Scanning);
}

#[test]
fn test_readiness_loss_cancels_countdown() {
    let mut machine = counting_machine();
    machine.countdown_tick(&test_frame(0), &encoder()).unwrap();

    assert_eq!(
        machine.observe_readiness(false),
        StepOutcome::CountdownCancelled("readiness lost")
    );
    assert_eq!(machine.state(), CaptureState::Scanning);

    // a fresh countdown starts from the top
    assert_eq!(
        machine.observe_readiness(true),
        StepOutcome::CountdownStarted(3)
    );
    assert_eq!(machine.countdown_generation(), 2);
}

#[test]
fn test_countdown_captures_exactly_once() {
    let mut machine = counting_machine();
    let encoder = encoder();
    let frame = test_frame(42);

    assert_eq!(
        machine.countdown_tick(&frame, &encoder).unwrap(),
        StepOutcome::CountdownTick(2)
    );
    assert_eq!(
        machine.countdown_tick(&frame, &encoder).unwrap(),
        StepOutcome::CountdownTick(1)
    );
    let captured = machine.countdown_tick(&frame, &encoder).unwrap();
    assert!(matches!(
        captured,
        StepOutcome::Captured {
            frame_id: 42,
            manual: false,
            ..
        }
    ));
    assert_eq!(machine.state(), CaptureState::Captured);
    assert_image_invariant(&machine);

    for _ in 0..5 {
        assert_eq!(
            machine.countdown_tick(&frame, &encoder).unwrap(),
            StepOutcome::Unchanged
        );
        assert_eq!(machine.observe_readiness(true), StepOutcome::Unchanged);
    }
    assert_eq!(machine.capture_count(), 1);
}

#[test]
fn test_captured_moves_to_review() {
    let mut machine = AutoCaptureStateMachine::new(3, true);
    machine.capture_manually(&test_frame(1), &encoder()).unwrap();
    assert!(machine.begin_review());
    assert_eq!(machine.state(), CaptureState::Reviewing);
    assert!(!machine.begin_review());
    assert_image_invariant(&machine);
}

#[test]
fn test_encoding_failure_returns_to_scanning() {
    let mut machine = counting_machine();
    let frame = test_frame(1);
    machine.countdown_tick(&frame, &FailingEncoder).unwrap();
    machine.countdown_tick(&frame, &FailingEncoder).unwrap();

    let err = machine.countdown_tick(&frame, &FailingEncoder).unwrap_err();
    assert!(matches!(
        err,
        IdCaptureError::Capture(CaptureError::Encoding { .. })
    ));
    assert_eq!(machine.state(), CaptureState::Scanning);
    assert_image_invariant(&machine);
    assert_eq!(machine.capture_count(), 0);
}

#[test]
fn test_manual_capture_skips_quality_gate() {
    let mut machine = AutoCaptureStateMachine::new(3, true);
    // never observed readiness at all
    let outcome = machine.capture_manually(&test_frame(9), &encoder()).unwrap();
    assert!(matches!(
        outcome,
        StepOutcome::Captured {
            frame_id: 9,
            manual: true,
            ..
        }
    ));
    assert_eq!(machine.state(), CaptureState::Captured);
}

#[test]
fn test_manual_capture_during_countdown() {
    let mut machine = counting_machine();
    machine.capture_manually(&test_frame(3), &encoder()).unwrap();
    assert_eq!(machine.state(), CaptureState::Captured);

    // the interrupted countdown cannot capture a second time
    assert_eq!(
        machine.countdown_tick(&test_frame(4), &encoder()).unwrap(),
        StepOutcome::Unchanged
    );
    assert_eq!(machine.capture_count(), 1);
}

#[test]
fn test_manual_capture_refused_while_reviewing() {
    let mut machine = AutoCaptureStateMachine::new(3, true);
    machine.capture_manually(&test_frame(1), &encoder()).unwrap();
    machine.begin_review();

    let err = machine
        .capture_manually(&test_frame(2), &encoder())
        .unwrap_err();
    assert_eq!(err.to_string(), "Capture error: Cannot capture while reviewing");
    assert_eq!(machine.captured_image().map(|i| i.frame_id), Some(1));
}

#[test]
fn test_retake_discards_image() {
    let mut machine = AutoCaptureStateMachine::new(3, true);
    machine.capture_manually(&test_frame(1), &encoder()).unwrap();
    machine.begin_review();

    machine.retake().unwrap();
    assert_eq!(machine.state(), CaptureState::Scanning);
    assert_image_invariant(&machine);

    assert!(machine.retake().is_err());
}

#[test]
fn test_confirm_succeeds_once() {
    let mut machine = AutoCaptureStateMachine::new(3, true);
    machine.capture_manually(&test_frame(5), &encoder()).unwrap();
    machine.begin_review();

    let image = machine.confirm().unwrap();
    assert_eq!(image.frame_id, 5);
    assert!(machine.is_confirmed());
    assert_image_invariant(&machine);

    assert!(matches!(
        machine.confirm(),
        Err(IdCaptureError::Capture(CaptureError::AlreadyConfirmed))
    ));
    assert!(matches!(
        machine.retake(),
        Err(IdCaptureError::Capture(CaptureError::AlreadyConfirmed))
    ));
}

#[test]
fn test_confirm_requires_captured_image() {
    let mut machine = counting_machine();
    assert!(matches!(
        machine.confirm(),
        Err(IdCaptureError::Capture(CaptureError::InvalidTransition { .. }))
    ));
    assert!(!machine.is_confirmed());
}

#[test]
fn test_disabling_auto_capture_cancels_countdown() {
    let mut machine = counting_machine();
    assert_eq!(
        machine.set_auto_capture(false),
        StepOutcome::CountdownCancelled("auto-capture disabled")
    );
    assert_eq!(machine.state(), CaptureState::Scanning);
    assert_eq!(machine.observe_readiness(true), StepOutcome::Unchanged);

    assert_eq!(machine.set_auto_capture(true), StepOutcome::Unchanged);
    assert_eq!(
        machine.observe_readiness(true),
        StepOutcome::CountdownStarted(3)
    );
}

#[test]
fn test_restart_rules() {
    let mut machine = AutoCaptureStateMachine::new(3, true);
    assert_eq!(machine.restart().unwrap(), StepOutcome::Unchanged);

    machine.observe_readiness(true);
    assert_eq!(
        machine.restart().unwrap(),
        StepOutcome::CountdownCancelled("camera switched")
    );

    machine.capture_manually(&test_frame(1), &encoder()).unwrap();
    assert!(machine.restart().is_err());
    machine.begin_review();
    assert!(machine.restart().is_err());
    assert_eq!(machine.state(), CaptureState::Reviewing);
}

#[test]
fn test_zero_countdown_start_is_clamped() {
    let mut machine = AutoCaptureStateMachine::new(0, true);
    assert_eq!(
        machine.observe_readiness(true),
        StepOutcome::CountdownStarted(1)
    );
    assert!(matches!(
        machine.countdown_tick(&test_frame(1), &encoder()).unwrap(),
        StepOutcome::Captured { .. }
    ));
}

// Controller

fn test_config() -> IdCaptureConfig {
    let mut config = IdCaptureConfig::default();
    config.camera.resolution = (WIDTH, HEIGHT);
    config.camera.fps = 10;
    config
}

fn document_only_config() -> IdCaptureConfig {
    let mut config = test_config();
    config.readiness.face_fallback = FaceFallback::DocumentOnly;
    config
}

struct Harness {
    backend: Arc<SyntheticCameraBackend>,
    detector: Arc<ScriptedFaceDetector>,
    bus: Arc<EventBus>,
}

impl Harness {
    fn new(scene: Scene) -> Self {
        Self::with_backend(SyntheticCameraBackend::new(scene))
    }

    fn with_backend(backend: SyntheticCameraBackend) -> Self {
        Self {
            backend: Arc::new(backend),
            detector: Arc::new(ScriptedFaceDetector::with_detections(vec![
                ScriptedFaceDetector::centered_face(WIDTH, HEIGHT),
            ])),
            bus: Arc::new(EventBus::new(512)),
        }
    }

    fn builder(&self, config: IdCaptureConfig) -> CaptureControllerBuilder {
        CaptureController::builder()
            .config(config)
            .backend(self.backend.clone())
            .face_loader(Arc::new(ScriptedLoader::new(Arc::clone(&self.detector))))
            .event_bus(Arc::clone(&self.bus))
    }

    fn controller(
        &self,
        config: IdCaptureConfig,
    ) -> (CaptureController, oneshot::Receiver<CapturedImage>) {
        let (emitter, result) = ChannelEmitter::new();
        let controller = self
            .builder(config)
            .emitter(Box::new(emitter))
            .build()
            .unwrap();
        (controller, result)
    }

    fn live(&self) -> usize {
        self.backend.counters().live()
    }

    fn peak(&self) -> usize {
        self.backend.counters().peak()
    }
}

fn drain(events: &mut broadcast::Receiver<CaptureEvent>) -> Vec<CaptureEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn position(events: &[CaptureEvent], event_type: &str) -> Option<usize> {
    events.iter().position(|e| e.event_type() == event_type)
}

async fn tick_until(
    controller: &mut CaptureController,
    done: impl Fn(&CaptureController) -> bool,
) -> bool {
    for _ in 0..50 {
        controller.tick().await.unwrap();
        if done(controller) {
            return true;
        }
        tokio::task::yield_now().await;
    }
    false
}

#[tokio::test]
async fn test_open_and_close_release_the_camera() {
    let harness = Harness::new(Scene::Document);
    let (mut controller, _result) = harness.controller(test_config());
    let mut events = harness.bus.subscribe();

    controller.open(FacingMode::Environment).await.unwrap();
    assert_eq!(harness.live(), 1);
    assert!(controller.status().camera_open);

    controller.close().await;
    controller.close().await;
    assert_eq!(harness.live(), 0);
    assert!(!controller.status().camera_open);

    let events = drain(&mut events);
    assert_eq!(
        events[0],
        CaptureEvent::CameraOpened {
            facing: FacingMode::Environment,
            width: WIDTH,
            height: HEIGHT
        }
    );
    let closed = events
        .iter()
        .filter(|e| matches!(e, CaptureEvent::CameraClosed { .. }))
        .count();
    assert_eq!(closed, 1);
}

#[tokio::test]
async fn test_permission_denied_ends_open() {
    let harness = Harness::new(Scene::Document);
    harness.backend.set_permission_denied(true);
    let (mut controller, _result) = harness.controller(test_config());

    let err = controller.open(FacingMode::User).await.unwrap_err();
    assert!(matches!(
        err,
        IdCaptureError::Camera(CameraError::PermissionDenied { .. })
    ));
    assert!(err.is_fatal());
    assert_eq!(harness.live(), 0);
}

#[tokio::test]
async fn test_face_required_blocks_auto_capture_until_loaded() {
    let harness = Harness::new(Scene::Document);
    let (emitter, _result) = ChannelEmitter::new();
    let loader = ScriptedLoader::new(Arc::clone(&harness.detector))
        .with_delay(Duration::from_secs(3600));
    let mut controller = CaptureController::builder()
        .config(test_config())
        .backend(harness.backend.clone())
        .face_loader(Arc::new(loader))
        .emitter(Box::new(emitter))
        .build()
        .unwrap();

    controller.open(FacingMode::Environment).await.unwrap();
    for _ in 0..10 {
        controller.tick().await.unwrap();
        tokio::task::yield_now().await;
    }

    let status = controller.status();
    assert_eq!(status.state, CaptureState::Scanning);
    let readiness = status.readiness.unwrap();
    assert!(readiness.quality.has_document);
    assert!(!readiness.ready);
    assert!(readiness.face.is_none());
}

#[tokio::test]
async fn test_document_only_fallback_counts_down_without_face() {
    let harness = Harness::new(Scene::Document);
    let loader = ScriptedLoader::new(Arc::clone(&harness.detector)).unavailable();
    let (emitter, _result) = ChannelEmitter::new();
    let mut controller = CaptureController::builder()
        .config(document_only_config())
        .backend(harness.backend.clone())
        .face_loader(Arc::new(loader))
        .emitter(Box::new(emitter))
        .build()
        .unwrap();

    controller.open(FacingMode::Environment).await.unwrap();
    controller.tick().await.unwrap();
    assert_eq!(controller.state(), CaptureState::CountingDown(3));
}

#[tokio::test]
async fn test_face_and_document_start_countdown() {
    let harness = Harness::new(Scene::Document);
    let (mut controller, _result) = harness.controller(test_config());
    controller.open(FacingMode::Environment).await.unwrap();

    let started = tick_until(&mut controller, |c| {
        matches!(c.state(), CaptureState::CountingDown(_))
    })
    .await;
    assert!(started);

    let readiness = controller.status().readiness.unwrap();
    assert!(readiness.ready);
    assert!(readiness.face.unwrap().has_face);
}

#[tokio::test]
async fn test_missing_face_keeps_scanning() {
    let harness = Harness::new(Scene::Document);
    harness.detector.clear();
    let (mut controller, _result) = harness.controller(test_config());
    controller.open(FacingMode::Environment).await.unwrap();

    let started = tick_until(&mut controller, |c| c.state() != CaptureState::Scanning).await;
    assert!(!started);
    assert!(harness.detector.calls() > 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_face_detector_drops_readiness() {
    let harness = Harness::new(Scene::Document);
    let (mut controller, _result) = harness.controller(test_config());
    controller.open(FacingMode::Environment).await.unwrap();

    let started = tick_until(&mut controller, |c| {
        matches!(c.state(), CaptureState::CountingDown(_))
    })
    .await;
    assert!(started);

    harness.detector.set_stalled(true);
    let mut cancelled = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.tick().await.unwrap();
        if controller.state() == CaptureState::Scanning {
            cancelled = true;
            break;
        }
    }
    assert!(cancelled);

    let face = controller.status().readiness.unwrap().face.unwrap();
    assert!(!face.has_face);
}

#[tokio::test]
async fn test_readiness_loss_during_countdown() {
    let harness = Harness::new(Scene::Document);
    let (mut controller, _result) = harness.controller(document_only_config());
    let mut events = harness.bus.subscribe();

    controller.open(FacingMode::Environment).await.unwrap();
    controller.tick().await.unwrap();
    assert_eq!(controller.state(), CaptureState::CountingDown(3));

    harness.backend.set_scene(Scene::Blank);
    controller.tick().await.unwrap();
    assert_eq!(controller.state(), CaptureState::Scanning);

    let events = drain(&mut events);
    assert!(events.contains(&CaptureEvent::CountdownCancelled {
        reason: "readiness lost".to_string()
    }));
}

#[tokio::test]
async fn test_countdown_ticks_capture_displayed_frame() {
    let harness = Harness::new(Scene::Document);
    let (mut controller, _result) = harness.controller(document_only_config());
    controller.open(FacingMode::Environment).await.unwrap();
    controller.tick().await.unwrap();
    let frames = controller.status().frames_sampled;

    controller.countdown_tick().await.unwrap();
    controller.countdown_tick().await.unwrap();
    assert_eq!(controller.state(), CaptureState::CountingDown(1));
    controller.countdown_tick().await.unwrap();

    assert_eq!(controller.state(), CaptureState::Reviewing);
    let image = controller.captured_image().unwrap();
    assert_eq!(image.frame_id, frames - 1);
    assert_eq!(image.mime_type, "image/jpeg");
    assert_eq!(&image.bytes[..2], &[0xFF, 0xD8]);

    // no sampling while reviewing
    for _ in 0..5 {
        controller.tick().await.unwrap();
    }
    assert_eq!(controller.status().frames_sampled, frames);
    assert_eq!(controller.status().captures, 1);
}

#[tokio::test]
async fn test_encoding_failure_during_countdown_resumes_scanning() {
    let harness = Harness::new(Scene::Document);
    let (emitter, _result) = ChannelEmitter::new();
    let mut controller = harness
        .builder(document_only_config())
        .encoder(Box::new(FailingEncoder))
        .emitter(Box::new(emitter))
        .build()
        .unwrap();
    let mut events = harness.bus.subscribe();

    controller.open(FacingMode::Environment).await.unwrap();
    controller.tick().await.unwrap();
    for _ in 0..3 {
        controller.countdown_tick().await.unwrap();
    }

    assert_eq!(controller.state(), CaptureState::Scanning);
    assert!(controller.captured_image().is_none());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, CaptureEvent::CaptureFailed { .. })));
}

#[tokio::test]
async fn test_manual_capture_on_blank_scene() {
    let harness = Harness::new(Scene::Blank);
    let (mut controller, _result) = harness.controller(test_config());
    controller.open(FacingMode::Environment).await.unwrap();
    controller.tick().await.unwrap();

    controller.capture_manually().await.unwrap();
    assert_eq!(controller.state(), CaptureState::Reviewing);
    assert!(controller.captured_image().is_some());

    let err = controller.capture_manually().await.unwrap_err();
    assert!(matches!(
        err,
        IdCaptureError::Capture(CaptureError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_manual_capture_before_first_tick() {
    let harness = Harness::new(Scene::Dark);
    let (mut controller, _result) = harness.controller(test_config());
    controller.open(FacingMode::User).await.unwrap();

    controller.capture_manually().await.unwrap();
    assert_eq!(controller.captured_image().map(|i| i.frame_id), Some(0));
}

#[tokio::test]
async fn test_retake_reacquires_camera() {
    let harness = Harness::new(Scene::Document);
    let (mut controller, _result) = harness.controller(test_config());
    controller.open(FacingMode::User).await.unwrap();
    controller.capture_manually().await.unwrap();

    controller.retake().await.unwrap();
    assert_eq!(controller.state(), CaptureState::Scanning);
    assert!(controller.captured_image().is_none());
    assert_eq!(harness.backend.counters().opened(), 2);
    assert_eq!(harness.live(), 1);
    assert_eq!(harness.peak(), 1);
    assert_eq!(controller.status().facing, FacingMode::User);

    controller.tick().await.unwrap();
    assert!(controller.status().frames_sampled > 1);
}

#[tokio::test]
async fn test_switch_facing_holds_one_stream() {
    let harness = Harness::new(Scene::Document);
    let (mut controller, _result) = harness.controller(document_only_config());
    let mut events = harness.bus.subscribe();

    controller.open(FacingMode::Environment).await.unwrap();
    controller.tick().await.unwrap();
    assert!(matches!(controller.state(), CaptureState::CountingDown(_)));

    assert_eq!(controller.switch_facing().await.unwrap(), FacingMode::User);
    assert_eq!(controller.state(), CaptureState::Scanning);
    assert_eq!(controller.switch_facing().await.unwrap(), FacingMode::Environment);

    assert_eq!(harness.backend.counters().opened(), 3);
    assert_eq!(harness.peak(), 1);
    assert_eq!(harness.live(), 1);

    let events = drain(&mut events);
    assert!(events.contains(&CaptureEvent::CountdownCancelled {
        reason: "camera switched".to_string()
    }));
    assert!(events.contains(&CaptureEvent::FacingSwitched {
        facing: FacingMode::User
    }));
}

#[tokio::test]
async fn test_switch_facing_refused_while_reviewing() {
    let harness = Harness::new(Scene::Document);
    let (mut controller, _result) = harness.controller(test_config());
    controller.open(FacingMode::Environment).await.unwrap();
    controller.capture_manually().await.unwrap();

    assert!(controller.switch_facing().await.is_err());
    assert_eq!(controller.status().facing, FacingMode::Environment);
    assert_eq!(harness.backend.counters().opened(), 1);
    assert_eq!(controller.state(), CaptureState::Reviewing);
}

#[tokio::test]
async fn test_toggle_auto_capture_cancels_countdown() {
    let harness = Harness::new(Scene::Document);
    let (mut controller, _result) = harness.controller(document_only_config());
    controller.open(FacingMode::Environment).await.unwrap();
    controller.tick().await.unwrap();

    controller.toggle_auto_capture(false).await;
    assert_eq!(controller.state(), CaptureState::Scanning);
    for _ in 0..3 {
        controller.tick().await.unwrap();
    }
    assert_eq!(controller.state(), CaptureState::Scanning);
    assert!(!controller.status().auto_capture);
}

#[tokio::test]
async fn test_confirm_emits_once_and_releases_camera() {
    let harness = Harness::new(Scene::Document);
    let (mut controller, result) = harness.controller(test_config());
    controller.open(FacingMode::Environment).await.unwrap();
    controller.capture_manually().await.unwrap();

    let image = controller.confirm().await.unwrap();
    assert_eq!(harness.live(), 0);

    let delivered = result.await.unwrap();
    assert_eq!(delivered, image);
    assert!(!delivered.is_empty());

    assert!(matches!(
        controller.confirm().await,
        Err(IdCaptureError::Capture(CaptureError::AlreadyConfirmed))
    ));
    assert!(controller.open(FacingMode::Environment).await.is_err());
    assert_eq!(harness.live(), 0);
}

#[test]
fn test_builder_requires_backend() {
    let (emitter, _result) = ChannelEmitter::new();
    let result = CaptureController::builder()
        .emitter(Box::new(emitter))
        .build();
    assert!(matches!(result, Err(IdCaptureError::System { .. })));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let harness = Harness::new(Scene::Document);
    let mut config = test_config();
    config.camera.fps = 0;
    let (emitter, _result) = ChannelEmitter::new();
    let result = harness.builder(config).emitter(Box::new(emitter)).build();
    assert!(matches!(result, Err(IdCaptureError::Config(_))));
}

// Spawned sessions

#[tokio::test(start_paused = true)]
async fn test_end_to_end_auto_capture_and_confirm() {
    let harness = Harness::new(Scene::Blank);
    let mut events = harness.bus.subscribe();
    let mut handle = harness.builder(test_config()).spawn(None).await.unwrap();
    let result = handle.take_result().unwrap();

    // nothing to capture yet: a handful of frames go by without readiness
    tokio::time::sleep(Duration::from_millis(550)).await;
    let scanning = handle.status().await.unwrap();
    assert_eq!(scanning.state, CaptureState::Scanning);
    assert!(scanning.frames_sampled >= 5);
    assert!(!scanning.readiness.unwrap().ready);
    assert_eq!(scanning.captures, 0);

    harness.backend.set_scene(Scene::Document);
    tokio::time::sleep(Duration::from_secs(5)).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, CaptureState::Reviewing);
    assert_eq!(status.captures, 1);
    assert_eq!(status.facing, FacingMode::Environment);

    // reviewing pauses sampling and never captures again
    tokio::time::sleep(Duration::from_secs(2)).await;
    let later = handle.status().await.unwrap();
    assert_eq!(later.frames_sampled, status.frames_sampled);
    assert_eq!(later.captures, 1);

    let image = handle.confirm().await.unwrap();
    let delivered = result.await.unwrap();
    assert_eq!(delivered.frame_id, image.frame_id);

    handle.join().await.unwrap();
    assert_eq!(harness.live(), 0);
    assert_eq!(harness.peak(), 1);

    let events = drain(&mut events);
    let readiness: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            CaptureEvent::ReadinessChanged { ready, .. } => Some(*ready),
            _ => None,
        })
        .collect();
    assert_eq!(readiness, vec![false, true]);

    let became_ready = events
        .iter()
        .position(|e| matches!(e, CaptureEvent::ReadinessChanged { ready: true, .. }))
        .unwrap();
    let started = position(&events, "countdown_started").unwrap();
    let captured = position(&events, "frame_captured").unwrap();
    let confirmed = position(&events, "capture_confirmed").unwrap();
    assert!(became_ready < started && started < captured && captured < confirmed);

    let ticks: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            CaptureEvent::CountdownTick { remaining } => Some(*remaining),
            _ => None,
        })
        .collect();
    assert_eq!(ticks, vec![2, 1]);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, CaptureEvent::FrameCaptured { manual: false, .. }))
            .count(),
        1
    );
    assert!(matches!(
        events.last(),
        Some(CaptureEvent::CameraClosed { .. })
    ));
}

#[test]
fn test_tick_period_never_reaches_zero() {
    use super::controller::tick_period;

    assert_eq!(tick_period(10), Duration::from_millis(100));
    assert_eq!(tick_period(30), Duration::from_micros(33_333));
    assert_eq!(tick_period(2000), Duration::from_millis(1));
    assert_eq!(tick_period(u32::MAX), Duration::from_millis(1));
}

#[tokio::test(start_paused = true)]
async fn test_high_frame_rate_session_runs() {
    let mut config = test_config();
    config.camera.fps = 2000;
    assert!(config.validate().is_ok());

    let harness = Harness::new(Scene::Blank);
    let handle = harness.builder(config).spawn(None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = handle.status().await.unwrap();
    assert!(status.camera_open);
    assert!(status.frames_sampled > 1);

    handle.close().await;
    handle.join().await.unwrap();
    assert_eq!(harness.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_countdown_takes_one_step_per_second() {
    let harness = Harness::new(Scene::Document);
    let handle = harness
        .builder(document_only_config())
        .spawn(None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(
        handle.status().await.unwrap().state,
        CaptureState::CountingDown(2)
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        handle.status().await.unwrap().state,
        CaptureState::CountingDown(1)
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.status().await.unwrap().state, CaptureState::Reviewing);
    handle.close().await;
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_close_during_countdown_releases_camera() {
    let harness = Harness::new(Scene::Document);
    let mut events = harness.bus.subscribe();
    let handle = harness
        .builder(document_only_config())
        .spawn(Some(FacingMode::User))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    handle.close().await;
    handle.join().await.unwrap();

    assert_eq!(harness.live(), 0);
    let events = drain(&mut events);
    assert!(events.contains(&CaptureEvent::CountdownCancelled {
        reason: "session closed".to_string()
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, CaptureEvent::FrameCaptured { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_session() {
    let harness = Harness::new(Scene::Blank);
    let handle = harness.builder(test_config()).spawn(None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.cancel();
    handle.join().await.unwrap();
    assert_eq!(harness.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_handle_manual_capture_and_retake() {
    let harness = Harness::new(Scene::Blank);
    let handle = harness.builder(test_config()).spawn(None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.capture_manually().await.unwrap();
    assert_eq!(handle.status().await.unwrap().state, CaptureState::Reviewing);
    assert!(handle.switch_facing().await.is_err());

    handle.retake().await.unwrap();
    assert_eq!(handle.status().await.unwrap().state, CaptureState::Scanning);
    assert_eq!(harness.peak(), 1);

    handle.set_auto_capture(false).await.unwrap();
    assert!(!handle.status().await.unwrap().auto_capture);

    handle.close().await;
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_camera_failure_ends_session() {
    let harness =
        Harness::with_backend(SyntheticCameraBackend::new(Scene::Blank).without_facing(FacingMode::User));
    let handle = harness.builder(test_config()).spawn(None).await.unwrap();

    let err = handle.switch_facing().await.unwrap_err();
    assert!(matches!(
        err,
        IdCaptureError::Camera(CameraError::Unsupported { .. })
    ));

    assert!(handle.join().await.is_err());
    assert_eq!(harness.live(), 0);
}

#[tokio::test]
async fn test_spawn_surfaces_open_errors() {
    let harness = Harness::new(Scene::Document);
    harness.backend.set_permission_denied(true);
    let result = harness.builder(test_config()).spawn(None).await;
    assert!(matches!(
        result,
        Err(IdCaptureError::Camera(CameraError::PermissionDenied { .. }))
    ));
}
