//! Schema migrations, applied on open and tracked via `user_version`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

const CURRENT_VERSION: u32 = 1;

/// SQL executed when upgrading from version 0 to version 1.
const V001_UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id               TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    username         TEXT NOT NULL UNIQUE,
    name             TEXT NOT NULL,
    password_hash    TEXT NOT NULL,               -- PHC string (argon2id)
    model_preference TEXT NOT NULL DEFAULT 'lip', -- 'lip' | 'audio'
    created_at       TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Contacts (directed edges)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    owner_id   TEXT NOT NULL,                     -- FK -> users(id)
    contact_id TEXT NOT NULL,                     -- FK -> users(id)
    created_at TEXT NOT NULL,

    PRIMARY KEY (owner_id, contact_id),
    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (contact_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Refresh tokens (revocation set)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS refresh_tokens (
    jti         TEXT PRIMARY KEY NOT NULL,
    user_id     TEXT NOT NULL,                    -- FK -> users(id)
    issued_at   TEXT NOT NULL,
    expires_at  TEXT NOT NULL,
    revoked     INTEGER NOT NULL DEFAULT 0,       -- boolean 0/1
    replaced_by TEXT,                             -- jti that superseded this one

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(user_id);

-- ----------------------------------------------------------------
-- Calls
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS calls (
    id          TEXT PRIMARY KEY NOT NULL,        -- UUID v4
    caller_id   TEXT NOT NULL,                    -- FK -> users(id)
    callee_id   TEXT NOT NULL,                    -- FK -> users(id)
    started_at  TEXT NOT NULL,
    answered_at TEXT,                             -- NULL for missed calls
    ended_at    TEXT NOT NULL,
    end_reason  TEXT NOT NULL,

    FOREIGN KEY (caller_id) REFERENCES users(id),
    FOREIGN KEY (callee_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_calls_caller_started
    ON calls(caller_id, started_at DESC);
CREATE INDEX IF NOT EXISTS idx_calls_callee_started
    ON calls(callee_id, started_at DESC);

-- ----------------------------------------------------------------
-- Transcript lines (append-only, per call)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS transcripts (
    call_id TEXT NOT NULL,                        -- FK -> calls(id)
    seq     INTEGER NOT NULL,                     -- position within the call
    t       TEXT NOT NULL,
    speaker TEXT NOT NULL,                        -- FK -> users(id)
    text    TEXT NOT NULL,
    source  TEXT NOT NULL,                        -- 'lip' | 'audio'

    PRIMARY KEY (call_id, seq),
    FOREIGN KEY (call_id) REFERENCES calls(id) ON DELETE CASCADE
);
"#;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::info!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    if current < 1 {
        tracing::info!("applying migration v001_initial");
        conn.execute_batch(V001_UP_SQL)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}
