use super::controller::CaptureStatus;
use crate::config::FacingMode;
use crate::error::{IdCaptureError, Result};
use crate::frame::CapturedImage;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Requests sent from a [`CaptureHandle`] to the running session loop
#[derive(Debug)]
pub enum CaptureCommand {
    SetAutoCapture {
        enabled: bool,
    },
    SwitchFacing {
        reply: oneshot::Sender<Result<FacingMode>>,
    },
    CaptureManually {
        reply: oneshot::Sender<Result<()>>,
    },
    Retake {
        reply: oneshot::Sender<Result<()>>,
    },
    Confirm {
        reply: oneshot::Sender<Result<CapturedImage>>,
    },
    Status {
        reply: oneshot::Sender<CaptureStatus>,
    },
    Close,
}

/// Caller-side handle of a session running on its own task
pub struct CaptureHandle {
    commands: mpsc::Sender<CaptureCommand>,
    cancel: CancellationToken,
    result: Option<oneshot::Receiver<CapturedImage>>,
    task: JoinHandle<Result<()>>,
}

impl CaptureHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<CaptureCommand>,
        cancel: CancellationToken,
        result: Option<oneshot::Receiver<CapturedImage>>,
        task: JoinHandle<Result<()>>,
    ) -> Self {
        Self {
            commands,
            cancel,
            result,
            task,
        }
    }

    pub async fn set_auto_capture(&self, enabled: bool) -> Result<()> {
        self.send(CaptureCommand::SetAutoCapture { enabled }).await
    }

    pub async fn switch_facing(&self) -> Result<FacingMode> {
        let (reply, rx) = oneshot::channel();
        self.send(CaptureCommand::SwitchFacing { reply }).await?;
        Self::await_reply(rx).await?
    }

    pub async fn capture_manually(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(CaptureCommand::CaptureManually { reply }).await?;
        Self::await_reply(rx).await?
    }

    pub async fn retake(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(CaptureCommand::Retake { reply }).await?;
        Self::await_reply(rx).await?
    }

    pub async fn confirm(&self) -> Result<CapturedImage> {
        let (reply, rx) = oneshot::channel();
        self.send(CaptureCommand::Confirm { reply }).await?;
        Self::await_reply(rx).await?
    }

    pub async fn status(&self) -> Result<CaptureStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(CaptureCommand::Status { reply }).await?;
        Self::await_reply(rx).await
    }

    /// Ask the session to close; a session that already ended is not an error
    pub async fn close(&self) {
        if self.commands.send(CaptureCommand::Close).await.is_err() {
            debug!("Close requested after the capture session ended");
        }
    }

    /// Stop the session loop without waiting for queued commands
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receiver for the confirmed image, when the session emits over a channel
    pub fn take_result(&mut self) -> Option<oneshot::Receiver<CapturedImage>> {
        self.result.take()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session loop to end and return its outcome
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| IdCaptureError::system(format!("Capture task failed: {}", e)))?
    }

    async fn send(&self, command: CaptureCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| IdCaptureError::system("Capture session has ended"))
    }

    async fn await_reply<T>(rx: oneshot::Receiver<T>) -> Result<T> {
        rx.await
            .map_err(|_| IdCaptureError::system("Capture session ended before replying"))
    }
}
