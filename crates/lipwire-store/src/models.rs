use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lipwire_shared::types::{CallEndReason, CallId, ModelKind, TranscriptLine, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub password_hash: String,
    pub model_preference: ModelKind,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied at signup; the store assigns the id and timestamps.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub jti: String,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub replaced_by: Option<String>,
}

impl RefreshTokenRecord {
    pub fn new(jti: String, user_id: UserId, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            jti,
            user_id,
            issued_at,
            expires_at,
            revoked: false,
            replaced_by: None,
        }
    }
}

/// A finished (or abandoned) call, persisted exactly once on the Ended
/// transition together with its transcript lines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallRecord {
    pub id: CallId,
    pub caller_id: UserId,
    pub callee_id: UserId,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub end_reason: CallEndReason,
    pub transcripts: Vec<TranscriptLine>,
}

impl CallRecord {
    pub fn duration_seconds(&self) -> Option<i64> {
        self.answered_at
            .map(|answered| (self.ended_at - answered).num_seconds().max(0))
    }

    /// `true` when the callee never accepted.
    pub fn is_missed(&self) -> bool {
        self.answered_at.is_none()
    }
}
