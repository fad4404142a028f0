use thiserror::Error;

use lipwire_shared::types::UserId;
use lipwire_store::StoreError;

use crate::tokens::TokenError;

/// Stable wire error codes. Every protocol-surfaced failure carries one of
/// these plus a human-readable message.
pub mod codes {
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const USERNAME_TAKEN: &str = "USERNAME_TAKEN";
    pub const WEAK_PASSWORD: &str = "WEAK_PASSWORD";
    pub const INVALID_USERNAME: &str = "INVALID_USERNAME";
    pub const TOO_MANY_ATTEMPTS: &str = "TOO_MANY_ATTEMPTS";
    pub const MISSING_JWT: &str = "MISSING_JWT";
    pub const INVALID_SIGNATURE: &str = "INVALID_SIGNATURE";
    pub const EXPIRED: &str = "EXPIRED";
    pub const WRONG_TYPE: &str = "WRONG_TYPE";
    pub const REVOKED: &str = "REVOKED";
    pub const USER_MISMATCH: &str = "USER_MISMATCH";
    pub const SCHEMA_ERROR: &str = "SCHEMA_ERROR";
    pub const SELF_CONTACT: &str = "SELF_CONTACT";
    pub const NO_SUCH_USER: &str = "NO_SUCH_USER";
    pub const TARGET_NOT_AVAILABLE: &str = "TARGET_NOT_AVAILABLE";
    pub const TARGET_BUSY: &str = "TARGET_BUSY";
    pub const ALREADY_INVITING: &str = "ALREADY_INVITING";
    pub const SELF_CALL: &str = "SELF_CALL";
    pub const NO_SUCH_CALL: &str = "NO_SUCH_CALL";
    pub const PEER_DISCONNECTED: &str = "PEER_DISCONNECTED";
    pub const SESSION_REPLACED: &str = "SESSION_REPLACED";
    pub const CALL_HISTORY_ERROR: &str = "CALL_HISTORY_ERROR";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// WebSocket close codes used on server-initiated closes.
pub mod close_codes {
    pub const SESSION_REPLACED: u16 = 4000;
    pub const HEARTBEAT_TIMEOUT: u16 = 4001;
    pub const RATE_LIMIT: u16 = 4008;
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Username already taken")]
    UsernameTaken,

    #[error("Weak password: {0}")]
    WeakPassword(String),

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Too many failed attempts; try again later")]
    TooManyAttempts,

    #[error("Missing or incomplete credentials")]
    MissingJwt,

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Cannot add yourself as a contact")]
    SelfContact,

    #[error("No such user: {0}")]
    NoSuchUser(String),

    #[error("Target is not available: {0}")]
    TargetNotAvailable(UserId),

    #[error("Target is busy: {0}")]
    TargetBusy(UserId),

    #[error("A call is already in progress for this user")]
    AlreadyInviting,

    #[error("Cannot call yourself")]
    SelfCall,

    #[error("No active call for this user")]
    NoSuchCall,

    #[error("Call history error: {0}")]
    History(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => codes::INVALID_CREDENTIALS,
            Self::UsernameTaken => codes::USERNAME_TAKEN,
            Self::WeakPassword(_) => codes::WEAK_PASSWORD,
            Self::InvalidUsername(_) => codes::INVALID_USERNAME,
            Self::TooManyAttempts => codes::TOO_MANY_ATTEMPTS,
            Self::MissingJwt => codes::MISSING_JWT,
            Self::Token(e) => e.error_code(),
            Self::Schema(_) => codes::SCHEMA_ERROR,
            Self::SelfContact => codes::SELF_CONTACT,
            Self::NoSuchUser(_) => codes::NO_SUCH_USER,
            Self::TargetNotAvailable(_) => codes::TARGET_NOT_AVAILABLE,
            Self::TargetBusy(_) => codes::TARGET_BUSY,
            Self::AlreadyInviting => codes::ALREADY_INVITING,
            Self::SelfCall => codes::SELF_CALL,
            Self::NoSuchCall => codes::NO_SUCH_CALL,
            Self::History(_) => codes::CALL_HISTORY_ERROR,
            Self::Storage(_) => codes::STORAGE_ERROR,
            Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// The message surfaced on the wire. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::History(_) => "Could not fetch call history".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(ServerError::InvalidCredentials.error_code(), "INVALID_CREDENTIALS");
        assert_eq!(ServerError::AlreadyInviting.error_code(), "ALREADY_INVITING");
        assert_eq!(
            ServerError::TargetBusy(UserId::new()).error_code(),
            "TARGET_BUSY"
        );
    }

    #[test]
    fn test_internal_detail_not_leaked() {
        let err = ServerError::Internal("password hasher exploded".into());
        assert!(!err.public_message().contains("exploded"));
    }
}
