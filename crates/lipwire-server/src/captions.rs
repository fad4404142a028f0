//! Caption fan-out.
//!
//! Transcriber deltas are pumped into the owning call actor, which
//! timestamps them (monotonically per speaker), appends them to the
//! transcript buffer, and broadcasts a `lip_reading_prediction` frame to
//! both participants. Broadcast is best-effort with a 200 ms per-connection
//! budget; the buffer append never drops.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use lipwire_media::CaptionDelta;
use lipwire_shared::constants::CAPTION_SEND_BUDGET_MS;
use lipwire_shared::protocol::{CaptionPush, Envelope, MsgType};
use lipwire_shared::types::UserId;

use crate::calls::CallEvent;
use crate::registry::SessionRegistry;

/// Forward transcriber deltas into the call actor until either side closes.
pub async fn pump(
    events: mpsc::Sender<CallEvent>,
    mut deltas: mpsc::Receiver<CaptionDelta>,
    speaker: UserId,
) {
    while let Some(delta) = deltas.recv().await {
        if events
            .send(CallEvent::Caption { speaker, delta })
            .await
            .is_err()
        {
            break;
        }
    }
}

/// Timestamp a caption line so per-speaker timestamps never move backwards,
/// even if the wall clock does.
pub fn next_monotonic(
    last_per_speaker: &mut HashMap<UserId, DateTime<Utc>>,
    speaker: UserId,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let t = match last_per_speaker.get(&speaker) {
        Some(last) if *last > now => *last,
        _ => now,
    };
    last_per_speaker.insert(speaker, t);
    t
}

/// Broadcast one caption frame to every participant, dropping it for any
/// connection that cannot take it within the budget.
pub async fn broadcast(registry: &SessionRegistry, participants: &[UserId], push: &CaptionPush) {
    let budget = Duration::from_millis(CAPTION_SEND_BUDGET_MS);
    for user in participants {
        let Some(handle) = registry.lookup(*user).await else {
            continue;
        };
        let frame = Envelope::reply(MsgType::LipReadingPrediction, push);
        if !handle.send_within(frame, budget).await {
            debug!(
                user = %user.short(),
                "dropping caption for slow or closed connection"
            );
        }
    }
}
