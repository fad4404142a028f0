//! Call-history fetch.

use std::sync::Arc;

use lipwire_shared::constants::{HISTORY_DEFAULT_LIMIT, HISTORY_MAX_LIMIT};
use lipwire_shared::protocol::{
    CallType, Envelope, FetchHistoryPayload, HistoryEntry, HistoryReply, MsgType,
};
use lipwire_shared::types::UserId;
use lipwire_store::CallRecord;

use crate::error::ServerError;
use crate::state::AppState;

pub fn fetch(state: &Arc<AppState>, user: UserId, env: &Envelope) -> Result<Envelope, ServerError> {
    let payload: FetchHistoryPayload = env
        .typed_payload()
        .map_err(|e| ServerError::Schema(e.to_string()))?;
    let limit = payload
        .limit
        .unwrap_or(HISTORY_DEFAULT_LIMIT)
        .min(HISTORY_MAX_LIMIT);

    let records = state
        .store
        .call_history(user, limit)
        .map_err(|e| ServerError::History(e.to_string()))?;

    let entries = records
        .into_iter()
        .map(|record| to_entry(record, user))
        .collect();

    Ok(Envelope::reply(
        MsgType::FetchCallHistory,
        HistoryReply { entries },
    ))
}

fn to_entry(record: CallRecord, viewer: UserId) -> HistoryEntry {
    let call_type = if record.is_missed() {
        CallType::Missed
    } else if record.caller_id == viewer {
        CallType::Outgoing
    } else {
        CallType::Incoming
    };

    HistoryEntry {
        call_id: record.id,
        caller_id: record.caller_id,
        callee_id: record.callee_id,
        started_at: record.started_at,
        ended_at: Some(record.ended_at),
        duration_seconds: record.duration_seconds(),
        call_type,
        transcripts: record.transcripts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use lipwire_shared::types::{CallEndReason, CallId};

    fn record(caller: UserId, callee: UserId, answered: bool) -> CallRecord {
        let started = Utc::now();
        CallRecord {
            id: CallId::new(),
            caller_id: caller,
            callee_id: callee,
            started_at: started,
            answered_at: answered.then(|| started + Duration::seconds(2)),
            ended_at: started + Duration::seconds(30),
            end_reason: if answered {
                CallEndReason::Hangup
            } else {
                CallEndReason::Timeout
            },
            transcripts: Vec::new(),
        }
    }

    #[test]
    fn test_call_type_per_viewer() {
        let caller = UserId::new();
        let callee = UserId::new();

        let answered = record(caller, callee, true);
        assert_eq!(to_entry(answered.clone(), caller).call_type, CallType::Outgoing);
        assert_eq!(to_entry(answered, callee).call_type, CallType::Incoming);

        let missed = record(caller, callee, false);
        assert_eq!(to_entry(missed.clone(), caller).call_type, CallType::Missed);
        assert_eq!(to_entry(missed, callee).call_type, CallType::Missed);
    }

    #[test]
    fn test_duration_only_when_answered() {
        let caller = UserId::new();
        let callee = UserId::new();
        assert_eq!(to_entry(record(caller, callee, true), caller).duration_seconds, Some(28));
        assert_eq!(to_entry(record(caller, callee, false), caller).duration_seconds, None);
    }
}
