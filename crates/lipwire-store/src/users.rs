use chrono::{DateTime, Utc};
use rusqlite::params;

use lipwire_shared::types::{ModelKind, UserId};

use crate::database::Store;
use crate::error::{Result, StoreError};
use crate::models::{NewUser, User};

impl Store {
    /// Insert a new user. Username uniqueness is enforced by the schema;
    /// a conflict surfaces as [`StoreError::UsernameTaken`].
    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        let user = User {
            id: UserId::new(),
            username: new.username.clone(),
            name: new.name.clone(),
            password_hash: new.password_hash.clone(),
            model_preference: ModelKind::Lip,
            created_at: Utc::now(),
        };

        let result = self.conn().execute(
            "INSERT INTO users (id, username, name, password_hash, model_preference, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.to_string(),
                user.username,
                user.name,
                user.password_hash,
                user.model_preference.as_str(),
                user.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(user),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::UsernameTaken)
            }
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, name, password_hash, model_preference, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, name, password_hash, model_preference, created_at
                 FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn set_model_preference(&self, id: UserId, kind: ModelKind) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET model_preference = ?1 WHERE id = ?2",
            params![kind.as_str(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn model_preference(&self, id: UserId) -> Result<ModelKind> {
        self.get_user(id).map(|u| u.model_preference)
    }
}

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let name: String = row.get(2)?;
    let password_hash: String = row.get(3)?;
    let model_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    let id = UserId::parse(&id_str).map_err(|e| conversion(0, e))?;
    let model_preference = ModelKind::parse(&model_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown model kind: {model_str}").into(),
        )
    })?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(5, e))?;

    Ok(User {
        id,
        username,
        name,
        password_hash,
        model_preference,
        created_at,
    })
}

fn conversion(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}
