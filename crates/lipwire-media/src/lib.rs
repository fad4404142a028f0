//! Media-plane seams.
//!
//! The signaling service treats the media transport and the captioning
//! models as external collaborators: a [`MediaAgent`] negotiates one media
//! session and yields received frames, a [`Transcriber`] turns a frame
//! stream into text deltas. The server only ever talks to the traits in
//! [`agent`]; [`scripted`] provides channel-driven implementations used by
//! tests and by deployments without a captioning backend.

pub mod agent;
pub mod frame;
pub mod scripted;

mod error;

pub use agent::{MediaAgent, MediaAgentFactory, Transcriber, TranscriberFactory};
pub use error::MediaError;
pub use frame::{CaptionDelta, FrameKind, MediaFrame};
