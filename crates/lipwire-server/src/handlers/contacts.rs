//! Contact list operations.

use std::sync::Arc;

use tracing::debug;

use lipwire_shared::protocol::{
    AddContactPayload, ContactEntry, ContactListReply, Envelope, MsgType,
};
use lipwire_shared::types::UserId;
use lipwire_store::StoreError;

use crate::error::ServerError;
use crate::state::AppState;

pub fn get_contacts(state: &Arc<AppState>, user: UserId) -> Result<Envelope, ServerError> {
    let contacts = state
        .store
        .list_contacts(user)?
        .into_iter()
        .map(|row| ContactEntry {
            user_id: row.user_id,
            username: row.username,
            name: row.name,
        })
        .collect::<Vec<_>>();

    debug!(user = %user.short(), count = contacts.len(), "contacts fetched");
    Ok(Envelope::reply(
        MsgType::GetContacts,
        ContactListReply { contacts },
    ))
}

/// Resolve the username and add the edge. Adding an existing contact is
/// idempotent: the reply is the same success shape and no second edge is
/// created.
pub fn add_contact(
    state: &Arc<AppState>,
    user: UserId,
    env: &Envelope,
) -> Result<Envelope, ServerError> {
    let payload: AddContactPayload = env
        .typed_payload()
        .map_err(|e| ServerError::Schema(e.to_string()))?;

    let contact = state
        .store
        .get_user_by_username(&payload.contact_username)
        .map_err(|e| match e {
            StoreError::NotFound => ServerError::NoSuchUser(payload.contact_username.clone()),
            other => ServerError::Storage(other),
        })?;

    if contact.id == user {
        return Err(ServerError::SelfContact);
    }

    let added = state.store.add_contact(user, contact.id)?;
    debug!(
        user = %user.short(),
        contact = %contact.id.short(),
        added,
        "contact add"
    );

    // Reply with the refreshed list either way.
    get_contacts(state, user).map(|mut env| {
        env.msg_type = MsgType::AddContact.as_str().to_string();
        env
    })
}
