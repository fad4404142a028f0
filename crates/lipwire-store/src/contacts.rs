use chrono::Utc;
use rusqlite::params;

use lipwire_shared::types::UserId;

use crate::database::Store;
use crate::error::Result;

/// A contact row joined with the contact's public profile fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRow {
    pub user_id: UserId,
    pub username: String,
    pub name: String,
}

impl Store {
    /// Add a directed contact edge. Returns `false` when the edge already
    /// existed, making the operation idempotent at the edge level.
    pub fn add_contact(&self, owner: UserId, contact: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO contacts (owner_id, contact_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                owner.to_string(),
                contact.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn list_contacts(&self, owner: UserId) -> Result<Vec<ContactRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT u.id, u.username, u.name
             FROM contacts c JOIN users u ON u.id = c.contact_id
             WHERE c.owner_id = ?1
             ORDER BY u.username ASC",
        )?;
        let rows = stmt.query_map(params![owner.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let id = UserId::parse(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Ok(ContactRow {
                user_id: id,
                username: row.get(1)?,
                name: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}
