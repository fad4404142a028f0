//! Plaintext message envelope and typed payloads.
//!
//! Every frame, in both directions, is one [`Envelope`]: a JSON object with
//! `message_id`, `timestamp`, `msg_type`, `success`, and `payload`, plus
//! optional `jwt`/`user_id` on requests and `error_code`/`error_message` on
//! failed replies. During the encrypted phase the serialized envelope is the
//! AEAD plaintext (see [`crate::envelope`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::types::{CallEndReason, ModelKind, TranscriptLine, UserId};

/// The recognized `msg_type` set. Anything else is rejected without state
/// change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    Handshake,
    Ping,
    Pong,
    Signup,
    Authenticate,
    RefreshToken,
    Logout,
    GetContacts,
    AddContact,
    FetchCallHistory,
    SetModelPreference,
    CallInvite,
    CallAccept,
    CallReject,
    CallEnd,
    Offer,
    Answer,
    IceCandidate,
    VideoState,
    LipReadingPrediction,
}

impl MsgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Signup => "signup",
            Self::Authenticate => "authenticate",
            Self::RefreshToken => "refresh_token",
            Self::Logout => "logout",
            Self::GetContacts => "get_contacts",
            Self::AddContact => "add_contact",
            Self::FetchCallHistory => "fetch_call_history",
            Self::SetModelPreference => "set_model_preference",
            Self::CallInvite => "call_invite",
            Self::CallAccept => "call_accept",
            Self::CallReject => "call_reject",
            Self::CallEnd => "call_end",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice_candidate",
            Self::VideoState => "video_state",
            Self::LipReadingPrediction => "lip_reading_prediction",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        match s {
            "handshake" => Ok(Self::Handshake),
            "ping" => Ok(Self::Ping),
            "pong" => Ok(Self::Pong),
            "signup" => Ok(Self::Signup),
            "authenticate" => Ok(Self::Authenticate),
            "refresh_token" => Ok(Self::RefreshToken),
            "logout" => Ok(Self::Logout),
            "get_contacts" => Ok(Self::GetContacts),
            "add_contact" => Ok(Self::AddContact),
            "fetch_call_history" => Ok(Self::FetchCallHistory),
            "set_model_preference" => Ok(Self::SetModelPreference),
            "call_invite" => Ok(Self::CallInvite),
            "call_accept" => Ok(Self::CallAccept),
            "call_reject" => Ok(Self::CallReject),
            "call_end" => Ok(Self::CallEnd),
            "offer" => Ok(Self::Offer),
            "answer" => Ok(Self::Answer),
            "ice_candidate" => Ok(Self::IceCandidate),
            "video_state" => Ok(Self::VideoState),
            "lip_reading_prediction" => Ok(Self::LipReadingPrediction),
            "" => Err(ProtocolError::MissingType),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }

    /// Types that may arrive before the connection is authenticated.
    pub fn is_auth_exempt(&self) -> bool {
        matches!(
            self,
            Self::Handshake
                | Self::Ping
                | Self::Pong
                | Self::Signup
                | Self::Authenticate
                | Self::RefreshToken
        )
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wire message. `msg_type` is kept as the raw string so an unknown type
/// can be answered with a typed error instead of a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Fresh per frame. Tolerated on input so that bare handshake replies
    /// parse; always present on output.
    #[serde(default = "Uuid::new_v4")]
    pub message_id: Uuid,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub msg_type: String,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

fn default_success() -> bool {
    true
}

impl Envelope {
    fn base(msg_type: &str) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            msg_type: msg_type.to_string(),
            success: true,
            payload: Value::Object(serde_json::Map::new()),
            jwt: None,
            user_id: None,
            error_code: None,
            error_message: None,
        }
    }

    /// A successful reply or push frame.
    pub fn reply(msg_type: MsgType, payload: impl Serialize) -> Self {
        let mut env = Self::base(msg_type.as_str());
        env.payload = serde_json::to_value(payload).unwrap_or(Value::Null);
        env
    }

    /// A failed reply. `msg_type` is echoed as the raw string so unknown
    /// request types can still be answered.
    pub fn failure(msg_type: &str, code: &str, message: impl Into<String>) -> Self {
        let mut env = Self::base(msg_type);
        env.success = false;
        env.error_code = Some(code.to_string());
        env.error_message = Some(message.into());
        env
    }

    /// A client-side request frame. Used by tests and by future client code.
    pub fn request(msg_type: MsgType, payload: impl Serialize) -> Self {
        Self::reply(msg_type, payload)
    }

    /// The same request carrying bearer credentials.
    pub fn authed_request(
        msg_type: MsgType,
        payload: impl Serialize,
        jwt: &str,
        user_id: UserId,
    ) -> Self {
        let mut env = Self::request(msg_type, payload);
        env.jwt = Some(jwt.to_string());
        env.user_id = Some(user_id.to_string());
        env
    }

    pub fn parse_type(&self) -> Result<MsgType, ProtocolError> {
        MsgType::parse(&self.msg_type)
    }

    /// Deserialize the payload into a typed struct.
    pub fn typed_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| ProtocolError::BadPayload {
            msg_type: self.msg_type.clone(),
            detail: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeHello {
    pub server_public_key: String,
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeReply {
    pub client_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupPayload {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatePayload {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshPayload {
    pub refresh_jwt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddContactPayload {
    pub contact_username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchHistoryPayload {
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetModelPayload {
    pub model_type: ModelKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInvitePayload {
    pub target: String,
}

/// Payload for `call_accept` / `call_reject` / `call_end`. The call is
/// resolved from the sender's session; `target` is an optional cross-check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallControlPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Payload for `offer` / `answer` / `ice_candidate` / `video_state`.
/// Everything other than the routing fields is carried opaquely so the relay
/// never touches SDP or ICE content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPayload {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

pub const SERVER_TARGET: &str = "server";

impl SignalPayload {
    pub fn targets_server(&self) -> bool {
        self.target == SERVER_TARGET
    }

    /// Rewrite `from` to the verified sender before forwarding.
    pub fn stamped(mut self, from: &str) -> Self {
        self.from = Some(from.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Reply and push payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthReply {
    pub user_id: UserId,
    pub username: String,
    pub name: String,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactEntry {
    pub user_id: UserId,
    pub username: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactListReply {
    pub contacts: Vec<ContactEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub call_id: crate::types::CallId,
    pub caller_id: UserId,
    pub callee_id: UserId,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    pub call_type: CallType,
    pub transcripts: Vec<TranscriptLine>,
}

/// Call direction relative to the user fetching history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Incoming,
    Outgoing,
    Missed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryReply {
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInvitePush {
    pub from: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAcceptPush {
    pub from: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRejectPush {
    pub from: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEndPush {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<UserId>,
    pub reason: CallEndReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionPush {
    pub from: String,
    pub prediction: String,
    pub speaker: UserId,
    pub source: ModelKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let env = Envelope::request(
            MsgType::Signup,
            SignupPayload {
                username: "ada".into(),
                password: "Abcdef!1".into(),
                name: "Ada".into(),
            },
        );
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.msg_type, "signup");
        assert!(back.success);
        let payload: SignupPayload = back.typed_payload().unwrap();
        assert_eq!(payload.username, "ada");
    }

    #[test]
    fn test_unknown_type_is_typed_error() {
        let json = r#"{
            "message_id": "00000000-0000-0000-0000-000000000000",
            "timestamp": "2025-01-01T00:00:00Z",
            "msg_type": "teleport",
            "success": true,
            "payload": {}
        }"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert!(matches!(
            env.parse_type(),
            Err(ProtocolError::UnknownType(t)) if t == "teleport"
        ));
    }

    #[test]
    fn test_missing_type() {
        let json = r#"{
            "message_id": "00000000-0000-0000-0000-000000000000",
            "timestamp": "2025-01-01T00:00:00Z",
            "payload": {}
        }"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert!(matches!(env.parse_type(), Err(ProtocolError::MissingType)));
    }

    #[test]
    fn test_failure_sets_error_fields() {
        let env = Envelope::failure("call_invite", "TARGET_BUSY", "busy");
        assert!(!env.success);
        assert_eq!(env.error_code.as_deref(), Some("TARGET_BUSY"));
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("TARGET_BUSY"));
    }

    #[test]
    fn test_signal_payload_preserves_sdp() {
        let json = r#"{
            "target": "server",
            "offer": {"sdp": "v=0...", "type": "offer"}
        }"#;
        let payload: SignalPayload = serde_json::from_str(json).unwrap();
        assert!(payload.targets_server());
        let stamped = payload.stamped("u-1");
        let back = serde_json::to_value(&stamped).unwrap();
        assert_eq!(back["from"], "u-1");
        assert_eq!(back["offer"]["sdp"], "v=0...");
    }

    #[test]
    fn test_auth_exempt_set() {
        assert!(MsgType::Authenticate.is_auth_exempt());
        assert!(MsgType::RefreshToken.is_auth_exempt());
        assert!(!MsgType::CallInvite.is_auth_exempt());
        assert!(!MsgType::GetContacts.is_auth_exempt());
    }
}
