use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Agent already disposed")]
    Disposed,

    #[error("Malformed ICE candidate: {0}")]
    BadCandidate(String),
}
