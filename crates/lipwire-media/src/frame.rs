use lipwire_shared::types::ModelKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Video,
    Audio,
}

/// One received media frame. The payload is opaque to the signaling service;
/// only the transcriber interprets it.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub kind: FrameKind,
    pub data: Vec<u8>,
    pub timestamp_ms: u64,
}

/// One text delta emitted by a transcriber. The speaker attribution is added
/// by the caption fan-out, which knows whose media the agent is receiving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionDelta {
    pub text: String,
    pub source: ModelKind,
}
