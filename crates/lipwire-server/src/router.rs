//! Message routing.
//!
//! One decrypted frame in, at most one direct reply out. The router parses
//! the raw envelope into a recognized [`MsgType`], enforces the bearer-token
//! requirement for everything outside the auth-exempt set, and dispatches to
//! the matching handler. Server pushes (invites, relayed signaling,
//! captions, call teardown) travel separately through the session registry
//! and are never correlated with a `message_id`.

use std::sync::Arc;

use tracing::{debug, warn};

use lipwire_shared::protocol::{
    CallControlPayload, CallInvitePayload, Envelope, MsgType, SignalPayload,
};
use lipwire_shared::types::{ConnectionId, UserId};
use lipwire_shared::ProtocolError;

use crate::error::{codes, ServerError};
use crate::handlers;
use crate::heartbeat::Liveness;
use crate::registry::ConnectionHandle;
use crate::state::AppState;

/// Per-connection routing context. `authed` is set by the auth handlers once
/// a session is established on this connection.
pub struct ConnCtx {
    pub conn_id: ConnectionId,
    pub handle: ConnectionHandle,
    pub authed: Option<UserId>,
    pub liveness: Liveness,
}

impl ConnCtx {
    pub fn new(conn_id: ConnectionId, handle: ConnectionHandle, liveness: Liveness) -> Self {
        Self {
            conn_id,
            handle,
            authed: None,
            liveness,
        }
    }
}

pub async fn route(state: &Arc<AppState>, ctx: &mut ConnCtx, env: Envelope) -> Option<Envelope> {
    let msg_type = match env.parse_type() {
        Ok(t) => t,
        Err(ProtocolError::MissingType) => {
            return Some(Envelope::failure(
                "unknown",
                codes::SCHEMA_ERROR,
                "frame is missing msg_type",
            ));
        }
        Err(e) => {
            debug!(error = %e, "rejecting unrecognized frame");
            return Some(Envelope::failure(
                &env.msg_type,
                codes::SCHEMA_ERROR,
                e.to_string(),
            ));
        }
    };

    match msg_type {
        // Liveness. A client ping refreshes the deadline and gets a pong;
        // a pong only refreshes.
        MsgType::Ping => {
            ctx.liveness.touch();
            Some(Envelope::reply(MsgType::Pong, serde_json::json!({})))
        }
        MsgType::Pong => {
            ctx.liveness.touch();
            None
        }

        // The crypto envelope is already established by the time frames
        // reach the router.
        MsgType::Handshake => Some(Envelope::failure(
            msg_type.as_str(),
            codes::SCHEMA_ERROR,
            "handshake already complete",
        )),

        MsgType::Signup => wrap(msg_type, handlers::auth::signup(state, ctx, &env).await),
        MsgType::Authenticate => {
            wrap(msg_type, handlers::auth::authenticate(state, ctx, &env).await)
        }
        MsgType::RefreshToken => wrap(msg_type, handlers::auth::refresh(state, ctx, &env).await),

        // Everything else requires a verified bearer token matching this
        // connection's session.
        _ => {
            let user = match authorize(state, ctx, &env) {
                Ok(user) => user,
                Err(e) => return Some(reply_failure(msg_type, &e)),
            };
            route_authed(state, ctx, msg_type, env, user).await
        }
    }
}

async fn route_authed(
    state: &Arc<AppState>,
    ctx: &mut ConnCtx,
    msg_type: MsgType,
    env: Envelope,
    user: UserId,
) -> Option<Envelope> {
    match msg_type {
        MsgType::Logout => wrap(msg_type, handlers::auth::logout(state, ctx, user).await),

        MsgType::GetContacts => wrap(msg_type, handlers::contacts::get_contacts(state, user)),
        MsgType::AddContact => wrap(msg_type, handlers::contacts::add_contact(state, user, &env)),
        MsgType::FetchCallHistory => wrap(msg_type, handlers::history::fetch(state, user, &env)),
        MsgType::SetModelPreference => wrap(msg_type, handlers::preference::set(state, user, &env)),

        MsgType::CallInvite => {
            let result = match env.typed_payload::<CallInvitePayload>() {
                Ok(payload) => state
                    .calls
                    .invite(user, &payload.target)
                    .await
                    .map(|_| Envelope::reply(msg_type, serde_json::json!({}))),
                Err(e) => Err(ServerError::Schema(e.to_string())),
            };
            wrap(msg_type, result)
        }

        MsgType::CallAccept | MsgType::CallReject | MsgType::CallEnd => {
            // The payload is optional and advisory; the call is found by
            // session identity.
            let _: CallControlPayload = env.typed_payload().unwrap_or_default();
            let result = match msg_type {
                MsgType::CallAccept => state.calls.accept(user).await,
                MsgType::CallReject => state.calls.reject(user).await,
                _ => state.calls.hang_up(user).await,
            };
            match result {
                // Mirrors and teardown frames are pushed by the call actor.
                Ok(()) => None,
                Err(e) => Some(reply_failure(msg_type, &e)),
            }
        }

        MsgType::Offer | MsgType::Answer | MsgType::IceCandidate | MsgType::VideoState => {
            match env.typed_payload::<SignalPayload>() {
                Ok(payload) => match state.calls.signal(user, msg_type, payload).await {
                    Ok(()) => None,
                    Err(e) => Some(reply_failure(msg_type, &e)),
                },
                Err(e) => Some(reply_failure(msg_type, &ServerError::Schema(e.to_string()))),
            }
        }

        // Server-initiated push; a client must never send it.
        MsgType::LipReadingPrediction => Some(Envelope::failure(
            msg_type.as_str(),
            codes::SCHEMA_ERROR,
            "lip_reading_prediction is server-initiated",
        )),

        // Handled before authorization.
        MsgType::Handshake
        | MsgType::Ping
        | MsgType::Pong
        | MsgType::Signup
        | MsgType::Authenticate
        | MsgType::RefreshToken => None,
    }
}

/// The bearer check: `jwt` and `user_id` must be present, the access token
/// valid and matching, and the connection's session bound to the same user.
fn authorize(state: &AppState, ctx: &ConnCtx, env: &Envelope) -> Result<UserId, ServerError> {
    let jwt = env.jwt.as_deref().ok_or(ServerError::MissingJwt)?;
    let claimed = env.user_id.as_deref().ok_or(ServerError::MissingJwt)?;
    let user = UserId::parse(claimed)
        .map_err(|_| ServerError::Schema(format!("invalid user_id: {claimed}")))?;

    state.tokens.verify_access(jwt, user)?;

    if ctx.authed != Some(user) {
        warn!(
            conn = %ctx.conn_id.short(),
            user = %user.short(),
            "valid token for a user this connection is not authenticated as"
        );
        return Err(crate::tokens::TokenError::UserMismatch.into());
    }

    Ok(user)
}

fn wrap(msg_type: MsgType, result: Result<Envelope, ServerError>) -> Option<Envelope> {
    match result {
        Ok(env) => Some(env),
        Err(e) => Some(reply_failure(msg_type, &e)),
    }
}

fn reply_failure(msg_type: MsgType, error: &ServerError) -> Envelope {
    if matches!(error, ServerError::Storage(_) | ServerError::Internal(_)) {
        warn!(code = error.error_code(), error = %error, "request failed");
    } else {
        debug!(code = error.error_code(), error = %error, "request rejected");
    }
    Envelope::failure(msg_type.as_str(), error.error_code(), error.public_message())
}
