//! Call records and transcripts.
//!
//! A call is written exactly once, on its Ended transition, together with
//! every transcript line collected while it was active.

use chrono::{DateTime, Utc};
use rusqlite::params;

use lipwire_shared::types::{CallEndReason, CallId, ModelKind, TranscriptLine, UserId};

use crate::database::Store;
use crate::error::{Result, StoreError};
use crate::models::CallRecord;

impl Store {
    /// Persist a finished call and its transcript in one transaction.
    pub fn insert_call(&self, record: &CallRecord) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO calls (id, caller_id, callee_id, started_at, answered_at, ended_at, end_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.caller_id.to_string(),
                record.callee_id.to_string(),
                record.started_at.to_rfc3339(),
                record.answered_at.map(|t| t.to_rfc3339()),
                record.ended_at.to_rfc3339(),
                record.end_reason.as_str(),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO transcripts (call_id, seq, t, speaker, text, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (seq, line) in record.transcripts.iter().enumerate() {
                stmt.execute(params![
                    record.id.to_string(),
                    seq as i64,
                    line.t.to_rfc3339(),
                    line.speaker.to_string(),
                    line.text,
                    line.source.as_str(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_call(&self, id: CallId) -> Result<CallRecord> {
        let mut record = self
            .conn()
            .query_row(
                "SELECT id, caller_id, callee_id, started_at, answered_at, ended_at, end_reason
                 FROM calls WHERE id = ?1",
                params![id.to_string()],
                row_to_call,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        record.transcripts = self.call_transcripts(id)?;
        Ok(record)
    }

    /// The `limit` most recent calls involving `user`, newest first, with
    /// transcripts attached.
    pub fn call_history(&self, user: UserId, limit: u32) -> Result<Vec<CallRecord>> {
        let mut records = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT id, caller_id, callee_id, started_at, answered_at, ended_at, end_reason
                 FROM calls
                 WHERE caller_id = ?1 OR callee_id = ?1
                 ORDER BY started_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user.to_string(), limit as i64], row_to_call)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        for record in &mut records {
            record.transcripts = self.call_transcripts(record.id)?;
        }
        Ok(records)
    }

    fn call_transcripts(&self, call_id: CallId) -> Result<Vec<TranscriptLine>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t, speaker, text, source FROM transcripts
             WHERE call_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![call_id.to_string()], |row| {
            let t_str: String = row.get(0)?;
            let speaker_str: String = row.get(1)?;
            let text: String = row.get(2)?;
            let source_str: String = row.get(3)?;

            Ok(TranscriptLine {
                t: DateTime::parse_from_rfc3339(&t_str)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| conversion(0, e))?,
                speaker: UserId::parse(&speaker_str).map_err(|e| conversion(1, e))?,
                text,
                source: ModelKind::parse(&source_str).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        format!("unknown transcript source: {source_str}").into(),
                    )
                })?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

fn row_to_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallRecord> {
    let id_str: String = row.get(0)?;
    let caller_str: String = row.get(1)?;
    let callee_str: String = row.get(2)?;
    let started_str: String = row.get(3)?;
    let answered_str: Option<String> = row.get(4)?;
    let ended_str: String = row.get(5)?;
    let reason_str: String = row.get(6)?;

    let parse_ts = |idx: usize, s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion(idx, e))
    };

    let end_reason = match reason_str.as_str() {
        "HANGUP" => CallEndReason::Hangup,
        "REJECTED" => CallEndReason::Rejected,
        "TIMEOUT" => CallEndReason::Timeout,
        "PEER_DISCONNECTED" => CallEndReason::PeerDisconnected,
        "SESSION_REPLACED" => CallEndReason::SessionReplaced,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unknown end reason: {other}").into(),
            ))
        }
    };

    Ok(CallRecord {
        id: CallId(uuid::Uuid::parse_str(&id_str).map_err(|e| conversion(0, e))?),
        caller_id: UserId::parse(&caller_str).map_err(|e| conversion(1, e))?,
        callee_id: UserId::parse(&callee_str).map_err(|e| conversion(2, e))?,
        started_at: parse_ts(3, &started_str)?,
        answered_at: answered_str.as_deref().map(|s| parse_ts(4, s)).transpose()?,
        ended_at: parse_ts(5, &ended_str)?,
        end_reason,
        transcripts: Vec::new(),
    })
}

fn conversion(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use chrono::Duration;

    fn seeded() -> (Store, UserId, UserId) {
        let store = Store::open_in_memory().unwrap();
        let a = store
            .create_user(&NewUser {
                username: "ada".into(),
                name: "Ada".into(),
                password_hash: "h".into(),
            })
            .unwrap();
        let b = store
            .create_user(&NewUser {
                username: "bob".into(),
                name: "Bob".into(),
                password_hash: "h".into(),
            })
            .unwrap();
        (store, a.id, b.id)
    }

    fn finished_call(caller: UserId, callee: UserId, started: DateTime<Utc>) -> CallRecord {
        CallRecord {
            id: CallId::new(),
            caller_id: caller,
            callee_id: callee,
            started_at: started,
            answered_at: Some(started + Duration::seconds(3)),
            ended_at: started + Duration::seconds(45),
            end_reason: CallEndReason::Hangup,
            transcripts: Vec::new(),
        }
    }

    #[test]
    fn insert_and_fetch_with_transcripts() {
        let (store, a, b) = seeded();
        let started = Utc::now();
        let mut record = finished_call(a, b, started);
        record.transcripts = vec![
            TranscriptLine {
                t: started + Duration::seconds(5),
                speaker: a,
                text: "hello".into(),
                source: ModelKind::Lip,
            },
            TranscriptLine {
                t: started + Duration::seconds(9),
                speaker: a,
                text: "there".into(),
                source: ModelKind::Lip,
            },
        ];

        store.insert_call(&record).unwrap();

        let fetched = store.get_call(record.id).unwrap();
        assert_eq!(fetched.transcripts.len(), 2);
        assert_eq!(fetched.transcripts[0].text, "hello");
        assert_eq!(fetched.duration_seconds(), Some(42));
        assert!(!fetched.is_missed());
    }

    #[test]
    fn missed_call_has_no_duration() {
        let (store, a, b) = seeded();
        let started = Utc::now();
        let record = CallRecord {
            answered_at: None,
            end_reason: CallEndReason::Timeout,
            ..finished_call(a, b, started)
        };
        store.insert_call(&record).unwrap();

        let fetched = store.get_call(record.id).unwrap();
        assert!(fetched.is_missed());
        assert_eq!(fetched.duration_seconds(), None);
    }

    #[test]
    fn history_is_newest_first_and_limited() {
        let (store, a, b) = seeded();
        let base = Utc::now();
        for i in 0..5 {
            let record = finished_call(a, b, base + Duration::minutes(i));
            store.insert_call(&record).unwrap();
        }

        let history = store.call_history(a, 3).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[0].started_at > history[1].started_at);
        assert!(history[1].started_at > history[2].started_at);

        // The callee sees the same calls.
        assert_eq!(store.call_history(b, 10).unwrap().len(), 5);
    }

    #[test]
    fn transcript_order_preserved() {
        let (store, a, b) = seeded();
        let started = Utc::now();
        let mut record = finished_call(a, b, started);
        for i in 0..10 {
            record.transcripts.push(TranscriptLine {
                t: started + Duration::seconds(i),
                speaker: if i % 2 == 0 { a } else { b },
                text: format!("line {i}"),
                source: ModelKind::Audio,
            });
        }
        store.insert_call(&record).unwrap();

        let fetched = store.get_call(record.id).unwrap();
        let texts: Vec<_> = fetched.transcripts.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts[0], "line 0");
        assert_eq!(texts[9], "line 9");
    }
}
