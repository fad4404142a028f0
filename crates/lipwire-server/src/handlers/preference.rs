//! Captioning model preference.

use std::sync::Arc;

use tracing::info;

use lipwire_shared::protocol::{Envelope, MsgType, SetModelPayload};
use lipwire_shared::types::UserId;

use crate::error::ServerError;
use crate::state::AppState;

pub fn set(state: &Arc<AppState>, user: UserId, env: &Envelope) -> Result<Envelope, ServerError> {
    let payload: SetModelPayload = env
        .typed_payload()
        .map_err(|e| ServerError::Schema(e.to_string()))?;

    state.store.set_model_preference(user, payload.model_type)?;
    info!(user = %user.short(), model = %payload.model_type, "model preference updated");

    Ok(Envelope::reply(
        MsgType::SetModelPreference,
        serde_json::json!({ "model_type": payload.model_type }),
    ))
}
