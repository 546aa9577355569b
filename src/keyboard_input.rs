use crate::error::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Operator actions available from the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    CaptureManually,
    ToggleAutoCapture,
    SwitchFacing,
    Retake,
    Confirm,
    /// Cycle the synthetic camera scene
    CycleScene,
    /// Show or hide the scripted face
    ToggleFace,
    Quit,
}

impl KeyAction {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char(' ') => Some(KeyAction::CaptureManually),
            KeyCode::Char('a') => Some(KeyAction::ToggleAutoCapture),
            KeyCode::Char('s') => Some(KeyAction::SwitchFacing),
            KeyCode::Char('r') => Some(KeyAction::Retake),
            KeyCode::Char('c') | KeyCode::Enter => Some(KeyAction::Confirm),
            KeyCode::Char('d') => Some(KeyAction::CycleScene),
            KeyCode::Char('f') => Some(KeyAction::ToggleFace),
            KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
            _ => None,
        }
    }
}

/// Keyboard input handler driving a capture session from the terminal
pub struct KeyboardInputHandler {
    actions: mpsc::UnboundedSender<KeyAction>,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    /// Create a handler and the receiver its key actions arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<KeyAction>) {
        let (actions, receiver) = mpsc::unbounded_channel();
        (
            Self {
                actions,
                cancellation_token: CancellationToken::new(),
            },
            receiver,
        )
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!(
            "Keyboard: SPACE capture, a auto-capture, s switch camera, r retake, \
             c/ENTER confirm, d scene, f face, q quit"
        );

        let actions = self.actions.clone();
        let cancellation_token = self.cancellation_token.clone();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            debug!("Raw mode enabled - keyboard handler active");

            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }

                        let Some(action) = KeyAction::from_key(key_event.code) else {
                            debug!("Key pressed: {:?}", key_event.code);
                            continue;
                        };

                        debug!("Key action: {:?}", action);
                        if actions.send(action).is_err() {
                            debug!("Key action receiver dropped");
                            break;
                        }
                        if action == KeyAction::Quit {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            } else {
                debug!("Raw mode disabled");
            }
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        debug!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // Give the task a moment to clean up and disable raw mode
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Ensure raw mode is disabled even if the task didn't clean up properly
        let _ = disable_raw_mode();

        Ok(())
    }
}
