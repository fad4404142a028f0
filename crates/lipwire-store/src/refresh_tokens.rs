//! Refresh-token revocation set.
//!
//! A `jti` is valid while its row is unrevoked and unexpired. Rotation is a
//! single transaction that revokes the presented `jti` (only if it is still
//! valid at that instant) and inserts the replacement, so a `jti` can be
//! consumed at most once even under concurrent rotation attempts.

use chrono::{DateTime, Utc};
use rusqlite::params;

use lipwire_shared::types::UserId;

use crate::database::Store;
use crate::error::{Result, StoreError};
use crate::models::RefreshTokenRecord;

impl Store {
    pub fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO refresh_tokens (jti, user_id, issued_at, expires_at, revoked, replaced_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.jti,
                record.user_id.to_string(),
                record.issued_at.to_rfc3339(),
                record.expires_at.to_rfc3339(),
                record.revoked as i64,
                record.replaced_by,
            ],
        )?;
        Ok(())
    }

    /// `true` while the `jti` is unrevoked and unexpired.
    pub fn refresh_token_valid(&self, jti: &str, now: DateTime<Utc>) -> Result<bool> {
        let record = self.get_refresh_token(jti)?;
        Ok(!record.revoked && record.expires_at > now)
    }

    pub fn get_refresh_token(&self, jti: &str) -> Result<RefreshTokenRecord> {
        self.conn()
            .query_row(
                "SELECT jti, user_id, issued_at, expires_at, revoked, replaced_by
                 FROM refresh_tokens WHERE jti = ?1",
                params![jti],
                row_to_record,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Atomically revoke `old_jti` and insert its replacement.
    ///
    /// Returns `false` (and inserts nothing) when `old_jti` is unknown,
    /// already revoked, or expired.
    pub fn rotate_refresh_token(
        &self,
        old_jti: &str,
        replacement: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let consumed = tx.execute(
            "UPDATE refresh_tokens
             SET revoked = 1, replaced_by = ?1
             WHERE jti = ?2 AND revoked = 0 AND expires_at > ?3",
            params![replacement.jti, old_jti, now.to_rfc3339()],
        )?;

        if consumed == 0 {
            // Nothing to rotate; leave the table untouched.
            tx.rollback()?;
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO refresh_tokens (jti, user_id, issued_at, expires_at, revoked, replaced_by)
             VALUES (?1, ?2, ?3, ?4, 0, NULL)",
            params![
                replacement.jti,
                replacement.user_id.to_string(),
                replacement.issued_at.to_rfc3339(),
                replacement.expires_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Revoke a single token, e.g. when a tampered or expired refresh is
    /// presented.
    pub fn revoke_refresh_token(&self, jti: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE refresh_tokens SET revoked = 1 WHERE jti = ?1",
            params![jti],
        )?;
        Ok(())
    }

    /// Revoke every refresh token owned by `user_id` (logout).
    pub fn revoke_all_refresh_tokens(&self, user_id: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE refresh_tokens SET revoked = 1 WHERE user_id = ?1 AND revoked = 0",
            params![user_id.to_string()],
        )?;
        Ok(affected)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RefreshTokenRecord> {
    let jti: String = row.get(0)?;
    let user_str: String = row.get(1)?;
    let issued_str: String = row.get(2)?;
    let expires_str: String = row.get(3)?;
    let revoked: i64 = row.get(4)?;
    let replaced_by: Option<String> = row.get(5)?;

    let parse_ts = |idx: usize, s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    };

    Ok(RefreshTokenRecord {
        jti,
        user_id: UserId::parse(&user_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        issued_at: parse_ts(2, &issued_str)?,
        expires_at: parse_ts(3, &expires_str)?,
        revoked: revoked != 0,
        replaced_by,
    })
}
