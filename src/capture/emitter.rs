use crate::error::{CaptureError, IdCaptureError, Result};
use crate::frame::CapturedImage;
use tokio::sync::oneshot;
use tracing::debug;

/// Receives the confirmed image of a session
pub trait ResultEmitter: Send {
    /// Called exactly once per session, with the confirmed image
    fn emit(&mut self, image: CapturedImage) -> Result<()>;
}

/// Hands the confirmed image to whoever holds the paired receiver
#[derive(Debug)]
pub struct ChannelEmitter {
    sender: Option<oneshot::Sender<CapturedImage>>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, oneshot::Receiver<CapturedImage>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }
}

impl ResultEmitter for ChannelEmitter {
    fn emit(&mut self, image: CapturedImage) -> Result<()> {
        let sender = self.sender.take().ok_or(CaptureError::AlreadyConfirmed)?;
        debug!("Emitting confirmed frame {}", image.frame_id);
        sender
            .send(image)
            .map_err(|_| IdCaptureError::system("Result receiver dropped before confirmation"))
    }
}
