//! Signup, login, token refresh, logout.
//!
//! Every path that proves an identity (password or refresh rotation) ends in
//! [`establish_session`], which binds the user to this connection and
//! displaces any prior session per the single-active-session rule.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use tracing::info;

use lipwire_shared::constants::{
    NAME_PART_MAX_LENGTH, PASSWORD_MAX_LENGTH, PASSWORD_MIN_LENGTH, USERNAME_MAX_LENGTH,
    USERNAME_MIN_LENGTH,
};
use lipwire_shared::protocol::{
    AuthReply, AuthenticatePayload, Envelope, MsgType, RefreshPayload, SignupPayload,
};
use lipwire_shared::types::UserId;
use lipwire_store::{NewUser, StoreError, User};

use crate::error::{close_codes, codes, ServerError};
use crate::router::ConnCtx;
use crate::state::AppState;

pub async fn signup(
    state: &Arc<AppState>,
    ctx: &mut ConnCtx,
    env: &Envelope,
) -> Result<Envelope, ServerError> {
    let payload: SignupPayload = env
        .typed_payload()
        .map_err(|e| ServerError::Schema(e.to_string()))?;

    validate_username(&payload.username)?;
    validate_password(&payload.password)?;
    validate_name(&payload.name)?;

    let password_hash = hash_password(&payload.password)?;
    let user = state
        .store
        .create_user(&NewUser {
            username: payload.username,
            name: payload.name,
            password_hash,
        })
        .map_err(|e| match e {
            StoreError::UsernameTaken => ServerError::UsernameTaken,
            other => ServerError::Storage(other),
        })?;

    info!(user = %user.id.short(), username = %user.username, "new user signed up");

    let pair = state.tokens.issue(user.id)?;
    establish_session(state, ctx, user.id).await;

    Ok(Envelope::reply(
        MsgType::Signup,
        AuthReply {
            user_id: user.id,
            username: user.username,
            name: user.name,
            access_token: pair.access,
            refresh_token: pair.refresh,
        },
    ))
}

pub async fn authenticate(
    state: &Arc<AppState>,
    ctx: &mut ConnCtx,
    env: &Envelope,
) -> Result<Envelope, ServerError> {
    let payload: AuthenticatePayload = env
        .typed_payload()
        .map_err(|e| ServerError::Schema(e.to_string()))?;

    if state.login_guard.is_locked(&payload.username) {
        return Err(ServerError::TooManyAttempts);
    }

    // Unknown user and wrong password are indistinguishable on the wire.
    let user: Option<User> = state.store.get_user_by_username(&payload.username).ok();
    let verified = user
        .as_ref()
        .is_some_and(|u| verify_password(&payload.password, &u.password_hash));

    let Some(user) = user.filter(|_| verified) else {
        state.login_guard.record_failure(&payload.username);
        return Err(ServerError::InvalidCredentials);
    };

    state.login_guard.clear(&payload.username);
    info!(user = %user.id.short(), "user authenticated");

    let pair = state.tokens.issue(user.id)?;
    establish_session(state, ctx, user.id).await;

    Ok(Envelope::reply(
        MsgType::Authenticate,
        AuthReply {
            user_id: user.id,
            username: user.username,
            name: user.name,
            access_token: pair.access,
            refresh_token: pair.refresh,
        },
    ))
}

/// Rotate-and-revoke refresh. A valid rotation also authenticates this
/// connection, which is how reconnecting clients resume without a password.
pub async fn refresh(
    state: &Arc<AppState>,
    ctx: &mut ConnCtx,
    env: &Envelope,
) -> Result<Envelope, ServerError> {
    let payload: RefreshPayload = env
        .typed_payload()
        .map_err(|e| ServerError::Schema(e.to_string()))?;

    let (user_id, pair) = state.tokens.rotate(&payload.refresh_jwt)?;
    let user = state.store.get_user(user_id)?;

    establish_session(state, ctx, user_id).await;

    Ok(Envelope::reply(
        MsgType::RefreshToken,
        AuthReply {
            user_id,
            username: user.username,
            name: user.name,
            access_token: pair.access,
            refresh_token: pair.refresh,
        },
    ))
}

pub async fn logout(
    state: &Arc<AppState>,
    ctx: &mut ConnCtx,
    user: UserId,
) -> Result<Envelope, ServerError> {
    state.tokens.revoke_all(user)?;

    // A graceful logout hangs up any call this session is in.
    let _ = state.calls.hang_up(user).await;
    state.registry.unregister_if(user, ctx.conn_id).await;
    ctx.authed = None;

    info!(user = %user.short(), "user logged out");
    Ok(Envelope::reply(MsgType::Logout, serde_json::json!({})))
}

/// Bind `user` to this connection. A displaced session loses its call with
/// reason `SESSION_REPLACED`, receives a notice, and is closed.
async fn establish_session(state: &Arc<AppState>, ctx: &mut ConnCtx, user: UserId) {
    let displaced = state.registry.register(user, ctx.handle.clone()).await;
    ctx.authed = Some(user);

    if let Some(old) = displaced {
        if old.conn_id() == ctx.conn_id {
            return;
        }
        state.calls.end_for_replacement(user).await;
        old.send(Envelope::failure(
            MsgType::Logout.as_str(),
            codes::SESSION_REPLACED,
            "signed in from another connection",
        ))
        .await;
        old.close(close_codes::SESSION_REPLACED, "SESSION_REPLACED").await;
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_username(username: &str) -> Result<(), ServerError> {
    if username.len() < USERNAME_MIN_LENGTH || username.len() > USERNAME_MAX_LENGTH {
        return Err(ServerError::InvalidUsername(format!(
            "must be {USERNAME_MIN_LENGTH}-{USERNAME_MAX_LENGTH} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ServerError::InvalidUsername(
            "only lowercase letters, digits, and underscores".into(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ServerError> {
    if password.len() < PASSWORD_MIN_LENGTH {
        return Err(ServerError::WeakPassword(format!(
            "must be at least {PASSWORD_MIN_LENGTH} characters"
        )));
    }
    if password.len() > PASSWORD_MAX_LENGTH {
        return Err(ServerError::WeakPassword(format!(
            "must be at most {PASSWORD_MAX_LENGTH} characters"
        )));
    }
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_lower && has_upper && has_digit) {
        return Err(ServerError::WeakPassword(
            "must mix lowercase, uppercase, and digits".into(),
        ));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ServerError> {
    for part in name.split_whitespace() {
        if part.len() > NAME_PART_MAX_LENGTH {
            return Err(ServerError::Schema(format!(
                "name part longer than {NAME_PART_MAX_LENGTH} characters"
            )));
        }
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String, ServerError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServerError::Internal(format!("password hashing failed: {e}")))
}

fn verify_password(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_validation() {
        assert!(validate_username("ada").is_ok());
        assert!(validate_username("ada_lovelace42").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("Ada").is_err());
        assert!(validate_username("ada!").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password("Abcdef!1").is_ok());
        assert!(validate_password("short1A").is_err());
        assert!(validate_password("alllowercase1").is_err());
        assert!(validate_password("ALLUPPERCASE1").is_err());
        assert!(validate_password("NoDigitsHere").is_err());
        assert!(validate_password(&"Aa1".repeat(50)).is_err());
    }

    #[test]
    fn test_name_parts() {
        assert!(validate_name("Ada Lovelace").is_ok());
        assert!(validate_name("").is_ok());
        assert!(validate_name(&"x".repeat(31)).is_err());
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("Abcdef!1").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Abcdef!1", &hash));
        assert!(!verify_password("Abcdef!2", &hash));
    }

    #[test]
    fn test_garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
