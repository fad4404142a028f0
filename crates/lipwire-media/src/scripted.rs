//! Channel-driven implementations of the media seams.
//!
//! `ScriptedMediaAgent` answers any offer with a canned SDP and exposes a
//! handle for injecting frames; `ScriptedTranscriber` forwards externally
//! pushed text as caption deltas. Tests drive both; a deployment without a
//! captioning backend gets a pipeline that negotiates and then stays silent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use lipwire_shared::types::ModelKind;

use crate::agent::{MediaAgent, MediaAgentFactory, Transcriber, TranscriberFactory};
use crate::error::MediaError;
use crate::frame::{CaptionDelta, MediaFrame};

const FRAME_CHANNEL_CAPACITY: usize = 64;
const DELTA_CHANNEL_CAPACITY: usize = 32;

pub struct ScriptedMediaAgent {
    frames_tx: broadcast::Sender<MediaFrame>,
    disposed: AtomicBool,
}

impl ScriptedMediaAgent {
    pub fn new() -> Self {
        let (frames_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Self {
            frames_tx,
            disposed: AtomicBool::new(false),
        }
    }

    /// Inject a frame as if it had arrived from the remote participant.
    pub fn inject_frame(&self, frame: MediaFrame) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        // No subscribers is fine; the frame is simply dropped.
        let _ = self.frames_tx.send(frame);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Default for ScriptedMediaAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaAgent for ScriptedMediaAgent {
    async fn create_offer(&self) -> Result<String, MediaError> {
        if self.is_disposed() {
            return Err(MediaError::Disposed);
        }
        Ok("v=0\r\ns=scripted-offer\r\n".to_string())
    }

    async fn accept_offer(&self, sdp: &str) -> Result<String, MediaError> {
        if self.is_disposed() {
            return Err(MediaError::Disposed);
        }
        if sdp.is_empty() {
            return Err(MediaError::Negotiation("empty SDP".into()));
        }
        debug!(offer_len = sdp.len(), "scripted agent answering offer");
        Ok("v=0\r\ns=scripted-answer\r\n".to_string())
    }

    async fn add_ice(&self, candidate: &str) -> Result<(), MediaError> {
        if self.is_disposed() {
            return Err(MediaError::Disposed);
        }
        if candidate.is_empty() {
            return Err(MediaError::BadCandidate("empty candidate".into()));
        }
        Ok(())
    }

    fn frames(&self) -> broadcast::Receiver<MediaFrame> {
        self.frames_tx.subscribe()
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

/// Factory that remembers every agent it creates so tests can reach them.
#[derive(Clone, Default)]
pub struct ScriptedMediaFactory {
    created: Arc<Mutex<Vec<Arc<ScriptedMediaAgent>>>>,
}

impl ScriptedMediaFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<Arc<ScriptedMediaAgent>> {
        self.created.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl MediaAgentFactory for ScriptedMediaFactory {
    fn create_agent(&self) -> Arc<dyn MediaAgent> {
        let agent = Arc::new(ScriptedMediaAgent::new());
        self.created.lock().unwrap_or_else(|p| p.into_inner()).push(agent.clone());
        agent
    }
}

pub struct ScriptedTranscriber {
    kind: ModelKind,
    delta_tx: Mutex<Option<mpsc::Sender<CaptionDelta>>>,
}

impl ScriptedTranscriber {
    pub fn new(kind: ModelKind) -> Self {
        Self {
            kind,
            delta_tx: Mutex::new(None),
        }
    }

    /// Emit a caption delta as if the model had produced it. Returns `false`
    /// when the transcriber has not been started or its consumer is gone.
    pub fn push(&self, text: &str) -> bool {
        let guard = self.delta_tx.lock().unwrap_or_else(|p| p.into_inner());
        match guard.as_ref() {
            Some(tx) => tx
                .try_send(CaptionDelta {
                    text: text.to_string(),
                    source: self.kind,
                })
                .is_ok(),
            None => false,
        }
    }
}

impl Transcriber for ScriptedTranscriber {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn start(&self, mut frames: broadcast::Receiver<MediaFrame>) -> mpsc::Receiver<CaptionDelta> {
        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);
        *self.delta_tx.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);

        // Drain the frame stream so slow-receiver lag never builds up; the
        // scripted model produces text only via push().
        tokio::spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }
}

/// Factory that remembers every transcriber it creates.
#[derive(Clone, Default)]
pub struct ScriptedTranscriberFactory {
    created: Arc<Mutex<Vec<Arc<ScriptedTranscriber>>>>,
}

impl ScriptedTranscriberFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<Arc<ScriptedTranscriber>> {
        self.created.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl TranscriberFactory for ScriptedTranscriberFactory {
    fn create_transcriber(&self, kind: ModelKind) -> Arc<dyn Transcriber> {
        let transcriber = Arc::new(ScriptedTranscriber::new(kind));
        self.created.lock().unwrap_or_else(|p| p.into_inner()).push(transcriber.clone());
        transcriber
    }
}
