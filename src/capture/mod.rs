mod controller;
mod emitter;
mod handle;
mod state;
#[cfg(test)]
mod tests;

pub use controller::{CaptureController, CaptureControllerBuilder, CaptureStatus};
pub use emitter::{ChannelEmitter, ResultEmitter};
pub use handle::{CaptureCommand, CaptureHandle};
pub use state::{AutoCaptureStateMachine, CaptureState, StepOutcome};
