//! Session registry.
//!
//! A session is the binding of an authenticated user to exactly one live
//! connection. Registering a user who already has a session *displaces* the
//! old one; the caller is handed the displaced handle and is responsible for
//! ending its call and closing it with `SESSION_REPLACED`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use lipwire_shared::protocol::Envelope;
use lipwire_shared::types::{ConnectionId, UserId};

/// Commands consumed by a connection's outbound loop.
#[derive(Debug)]
pub enum Outbound {
    /// Encrypt and write one envelope.
    Frame(Envelope),
    /// Write a close frame and stop the loop.
    Close { code: u16, reason: String },
}

/// Cheap cloneable sender half of one connection's outbound queue.
#[derive(Clone)]
pub struct ConnectionHandle {
    conn_id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(conn_id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self { conn_id, tx }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Enqueue a frame. Returns `false` when the connection is gone.
    pub async fn send(&self, env: Envelope) -> bool {
        self.tx.send(Outbound::Frame(env)).await.is_ok()
    }

    /// Enqueue a frame, giving up after `budget`. Used by best-effort paths
    /// (caption fan-out) so one slow connection never stalls the producer.
    pub async fn send_within(&self, env: Envelope, budget: Duration) -> bool {
        self.tx
            .send_timeout(Outbound::Frame(env), budget)
            .await
            .is_ok()
    }

    pub async fn close(&self, code: u16, reason: &str) {
        let _ = self
            .tx
            .send(Outbound::Close {
                code,
                reason: reason.to_string(),
            })
            .await;
    }
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<UserId, ConnectionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user` to `handle`, returning the displaced handle if a prior
    /// session existed.
    pub async fn register(&self, user: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut sessions = self.inner.lock().await;
        let displaced = sessions.insert(user, handle);
        match &displaced {
            Some(old) => info!(
                user = %user.short(),
                old_conn = %old.conn_id().short(),
                "session replaced by newer connection"
            ),
            None => debug!(user = %user.short(), "session registered"),
        }
        displaced
    }

    pub async fn lookup(&self, user: UserId) -> Option<ConnectionHandle> {
        self.inner.lock().await.get(&user).cloned()
    }

    pub async fn is_registered(&self, user: UserId) -> bool {
        self.inner.lock().await.contains_key(&user)
    }

    /// Remove the binding only if it still points at `conn_id`. A stale
    /// terminal path must never tear down the session of a connection that
    /// displaced it.
    pub async fn unregister_if(&self, user: UserId, conn_id: ConnectionId) -> bool {
        let mut sessions = self.inner.lock().await;
        match sessions.get(&user) {
            Some(current) if current.conn_id() == conn_id => {
                sessions.remove(&user);
                debug!(user = %user.short(), "session unregistered");
                true
            }
            _ => false,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}
