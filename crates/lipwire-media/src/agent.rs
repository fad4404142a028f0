use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use lipwire_shared::types::ModelKind;

use crate::error::MediaError;
use crate::frame::{CaptionDelta, MediaFrame};

/// One media endpoint for one participant of one call.
///
/// The server instantiates an agent when it joins a call as the captioning
/// endpoint; negotiation messages (`offer` / `answer` / `ice_candidate`)
/// addressed to `"server"` are routed into it.
#[async_trait]
pub trait MediaAgent: Send + Sync {
    /// Produce a local SDP offer.
    async fn create_offer(&self) -> Result<String, MediaError>;

    /// Consume a remote SDP offer and produce the answer.
    async fn accept_offer(&self, sdp: &str) -> Result<String, MediaError>;

    /// Add a remote ICE candidate.
    async fn add_ice(&self, candidate: &str) -> Result<(), MediaError>;

    /// Subscribe to received frames (video capped at 15 fps by the
    /// transport). Each subscriber gets every frame from subscription time.
    fn frames(&self) -> broadcast::Receiver<MediaFrame>;

    /// Release transport and encoder resources. Idempotent.
    fn dispose(&self);
}

pub trait MediaAgentFactory: Send + Sync {
    fn create_agent(&self) -> Arc<dyn MediaAgent>;
}

/// A captioning model consuming one participant's frames.
pub trait Transcriber: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Start consuming frames, returning the stream of text deltas. The
    /// transcriber stops when the frame stream closes or the returned
    /// receiver is dropped.
    fn start(&self, frames: broadcast::Receiver<MediaFrame>) -> mpsc::Receiver<CaptionDelta>;
}

pub trait TranscriberFactory: Send + Sync {
    fn create_transcriber(&self, kind: ModelKind) -> Arc<dyn Transcriber>;
}
