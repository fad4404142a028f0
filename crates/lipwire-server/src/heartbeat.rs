//! Per-connection liveness.
//!
//! One heartbeat task per connection sends an encrypted `ping` every 10 s
//! and closes the connection once 15 s pass without an observed `pong`.
//! The router refreshes [`Liveness`] on both `pong` replies and
//! client-initiated `ping`s.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use lipwire_shared::constants::{HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS};
use lipwire_shared::protocol::{Envelope, MsgType};

use crate::error::close_codes;
use crate::registry::ConnectionHandle;

/// Timestamp of the most recent proof that the peer is alive.
#[derive(Clone)]
pub struct Liveness(Arc<Mutex<Instant>>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    pub fn touch(&self) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    pub fn idle(&self) -> Duration {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed()
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Heartbeat loop; runs until the connection closes or goes silent.
pub async fn run(handle: ConnectionHandle, liveness: Liveness) {
    let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    // The first tick fires immediately; skip it so the initial ping comes
    // one interval after the handshake.
    interval.tick().await;

    let deadline = Duration::from_secs(HEARTBEAT_TIMEOUT_SECS);

    loop {
        interval.tick().await;

        if liveness.idle() > deadline {
            warn!(conn = %handle.conn_id().short(), "heartbeat timeout, closing connection");
            handle
                .close(close_codes::HEARTBEAT_TIMEOUT, "heartbeat timeout")
                .await;
            return;
        }

        let ping = Envelope::reply(MsgType::Ping, serde_json::json!({}));
        if !handle.send(ping).await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Outbound;
    use lipwire_shared::types::ConnectionId;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_pings_flow_while_alive() {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = ConnectionHandle::new(ConnectionId::new(), tx);
        let liveness = Liveness::new();

        let task = tokio::spawn(run(handle, liveness.clone()));

        // Keep the peer alive across a few intervals.
        for _ in 0..3 {
            liveness.touch();
            tokio::time::advance(Duration::from_secs(HEARTBEAT_INTERVAL_SECS)).await;
            match rx.recv().await.unwrap() {
                Outbound::Frame(env) => assert_eq!(env.msg_type, "ping"),
                other => panic!("unexpected outbound: {other:?}"),
            }
        }

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_is_closed() {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = ConnectionHandle::new(ConnectionId::new(), tx);
        let liveness = Liveness::new();

        let task = tokio::spawn(run(handle, liveness));

        // First interval: still within the 15 s window, a ping goes out.
        tokio::time::advance(Duration::from_secs(HEARTBEAT_INTERVAL_SECS)).await;
        assert!(matches!(rx.recv().await.unwrap(), Outbound::Frame(_)));

        // Second interval: 20 s idle exceeds the deadline.
        tokio::time::advance(Duration::from_secs(HEARTBEAT_INTERVAL_SECS)).await;
        match rx.recv().await.unwrap() {
            Outbound::Close { code, .. } => assert_eq!(code, close_codes::HEARTBEAT_TIMEOUT),
            other => panic!("unexpected outbound: {other:?}"),
        }

        task.await.unwrap();
    }
}
