use crate::error::UploadError;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

/// Starts an encoded video stream towards a sink address
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn start_stream(&self, sink: &str) -> Result<Box<dyn UploadSession>, UploadError>;

    fn name(&self) -> &str;
}

/// A running upload stream
pub trait UploadSession: Send {
    /// False once the stream has failed or ended
    fn is_active(&mut self) -> bool;

    /// Stop streaming and release the encoder. Must tolerate repeated calls.
    fn close(&mut self);
}

/// Holder for the current upload session, shared with the watchdog teardown.
#[derive(Default)]
pub struct SessionSlot {
    inner: Mutex<Option<Box<dyn UploadSession>>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new session, closing any previous one
    pub fn install(&self, session: Box<dyn UploadSession>) {
        let previous = self.inner.lock().replace(session);
        if let Some(mut previous) = previous {
            debug!("Replacing upload session, closing the previous one");
            previous.close();
        }
    }

    /// `None` when no session is held
    pub fn is_active(&self) -> Option<bool> {
        self.inner.lock().as_mut().map(|session| session.is_active())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Close and drop the held session. Returns whether one was held.
    pub fn close(&self) -> bool {
        let session = self.inner.lock().take();
        match session {
            Some(mut session) => {
                session.close();
                info!("Upload session closed");
                true
            }
            None => false,
        }
    }
}
