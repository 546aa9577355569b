use crate::config::FacingMode;
use crate::error::EventBusError;
use crate::face::FaceCapabilityStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Events emitted by a capture session for UI and diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CaptureEvent {
    /// A camera stream was acquired
    CameraOpened {
        facing: FacingMode,
        width: u32,
        height: u32,
    },
    /// The camera stream was released
    CameraClosed { reason: String },
    /// The face capability changed load state
    FaceCapabilityChanged { status: FaceCapabilityStatus },
    /// The readiness verdict flipped
    ReadinessChanged {
        ready: bool,
        brightness: f64,
        sharpness: f64,
        has_face: bool,
    },
    /// Auto-capture was switched on or off
    AutoCaptureToggled { enabled: bool },
    /// A countdown began
    CountdownStarted { from: u8 },
    /// The countdown advanced
    CountdownTick { remaining: u8 },
    /// A running countdown was abandoned
    CountdownCancelled { reason: String },
    /// A frame was frozen and encoded
    FrameCaptured {
        frame_id: u64,
        bytes: usize,
        manual: bool,
    },
    /// The frozen image was discarded
    RetakeRequested,
    /// The camera facing was switched
    FacingSwitched { facing: FacingMode },
    /// The user confirmed the frozen image
    CaptureConfirmed { frame_id: u64, bytes: usize },
    /// Freezing or encoding a frame failed
    CaptureFailed { error: String },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
}

impl CaptureEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            CaptureEvent::CameraOpened {
                facing,
                width,
                height,
            } => format!("Camera opened ({} facing, {}x{})", facing, width, height),
            CaptureEvent::CameraClosed { reason } => format!("Camera closed: {}", reason),
            CaptureEvent::FaceCapabilityChanged { status } => {
                format!("Face validation {}", status)
            }
            CaptureEvent::ReadinessChanged {
                ready,
                brightness,
                sharpness,
                has_face,
            } => format!(
                "{} (brightness {:.1}, sharpness {:.1}, face {})",
                if *ready { "Ready" } else { "Not ready" },
                brightness,
                sharpness,
                if *has_face { "yes" } else { "no" }
            ),
            CaptureEvent::AutoCaptureToggled { enabled } => {
                format!("Auto-capture {}", if *enabled { "on" } else { "off" })
            }
            CaptureEvent::CountdownStarted { from } => format!("Countdown started at {}", from),
            CaptureEvent::CountdownTick { remaining } => format!("Countdown {}", remaining),
            CaptureEvent::CountdownCancelled { reason } => {
                format!("Countdown cancelled: {}", reason)
            }
            CaptureEvent::FrameCaptured {
                frame_id,
                bytes,
                manual,
            } => format!(
                "Frame {} captured {} ({} bytes)",
                frame_id,
                if *manual { "manually" } else { "automatically" },
                bytes
            ),
            CaptureEvent::RetakeRequested => "Retake requested".to_string(),
            CaptureEvent::FacingSwitched { facing } => format!("Switched to {} camera", facing),
            CaptureEvent::CaptureConfirmed { frame_id, bytes } => {
                format!("Frame {} confirmed ({} bytes)", frame_id, bytes)
            }
            CaptureEvent::CaptureFailed { error } => format!("Capture failed: {}", error),
            CaptureEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            CaptureEvent::CameraOpened { .. } => "camera_opened",
            CaptureEvent::CameraClosed { .. } => "camera_closed",
            CaptureEvent::FaceCapabilityChanged { .. } => "face_capability_changed",
            CaptureEvent::ReadinessChanged { .. } => "readiness_changed",
            CaptureEvent::AutoCaptureToggled { .. } => "auto_capture_toggled",
            CaptureEvent::CountdownStarted { .. } => "countdown_started",
            CaptureEvent::CountdownTick { .. } => "countdown_tick",
            CaptureEvent::CountdownCancelled { .. } => "countdown_cancelled",
            CaptureEvent::FrameCaptured { .. } => "frame_captured",
            CaptureEvent::RetakeRequested => "retake_requested",
            CaptureEvent::FacingSwitched { .. } => "facing_switched",
            CaptureEvent::CaptureConfirmed { .. } => "capture_confirmed",
            CaptureEvent::CaptureFailed { .. } => "capture_failed",
            CaptureEvent::SystemError { .. } => "system_error",
        }
    }
}

/// Async event bus for session observers using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<CaptureEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers reached; nobody listening is not an error.
    pub async fn publish(&self, event: CaptureEvent) -> Result<usize, EventBusError> {
        match &event {
            CaptureEvent::CameraOpened { .. }
            | CaptureEvent::CameraClosed { .. }
            | CaptureEvent::FrameCaptured { .. }
            | CaptureEvent::CaptureConfirmed { .. } => {
                info!("{}", event.description());
            }
            CaptureEvent::CaptureFailed { error } => {
                warn!("Capture failed: {}", error);
            }
            CaptureEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        match self.sender.send(event) {
            Ok(count) => Ok(count),
            Err(broadcast::error::SendError(event)) => {
                trace!("No subscribers for {}", event.event_type());
                Ok(0)
            }
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Custom filter function
    Custom(fn(&CaptureEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &CaptureEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<CaptureEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(
        receiver: broadcast::Receiver<CaptureEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<CaptureEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        trace!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<CaptureEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
