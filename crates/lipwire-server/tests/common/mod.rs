//! In-process test harness: drives the router and coordinator exactly the
//! way a connection's inbound loop does, with channel-backed connection
//! handles standing in for websockets.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tokio::sync::mpsc;

use lipwire_media::scripted::{ScriptedMediaFactory, ScriptedTranscriberFactory};
use lipwire_server::heartbeat::Liveness;
use lipwire_server::registry::{ConnectionHandle, Outbound};
use lipwire_server::router::{self, ConnCtx};
use lipwire_server::{AppState, ServerConfig};
use lipwire_shared::protocol::{AuthReply, Envelope, MsgType, SignupPayload};
use lipwire_shared::types::{ConnectionId, UserId};
use lipwire_store::Store;

pub const RECV_BUDGET: Duration = Duration::from_secs(2);

pub struct TestEnv {
    pub state: Arc<AppState>,
    pub media: ScriptedMediaFactory,
    pub transcribers: ScriptedTranscriberFactory,
}

pub fn test_env() -> TestEnv {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let media = ScriptedMediaFactory::new();
    let transcribers = ScriptedTranscriberFactory::new();
    let state = AppState::new(
        ServerConfig::default(),
        store,
        SigningKey::generate(&mut OsRng),
        Arc::new(media.clone()),
        Arc::new(transcribers.clone()),
    );
    TestEnv {
        state,
        media,
        transcribers,
    }
}

pub struct TestClient {
    pub ctx: ConnCtx,
    pub rx: mpsc::Receiver<Outbound>,
    pub user_id: UserId,
    pub access: String,
}

pub fn open_connection() -> (ConnCtx, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(32);
    let conn_id = ConnectionId::new();
    let ctx = ConnCtx::new(conn_id, ConnectionHandle::new(conn_id, tx), Liveness::new());
    (ctx, rx)
}

impl TestClient {
    /// Open a connection and sign up a fresh user on it.
    pub async fn signup(state: &Arc<AppState>, username: &str) -> Self {
        let (mut ctx, rx) = open_connection();
        let request = Envelope::request(
            MsgType::Signup,
            SignupPayload {
                username: username.to_string(),
                password: "Abcdef!1".to_string(),
                name: username.to_string(),
            },
        );
        let reply = router::route(state, &mut ctx, request)
            .await
            .expect("signup reply");
        assert!(reply.success, "signup failed: {:?}", reply.error_code);
        let auth: AuthReply = reply.typed_payload().unwrap();

        Self {
            ctx,
            rx,
            user_id: auth.user_id,
            access: auth.access_token,
        }
    }

    /// Send an authenticated request through the router.
    pub async fn request(
        &mut self,
        state: &Arc<AppState>,
        msg_type: MsgType,
        payload: impl serde::Serialize,
    ) -> Option<Envelope> {
        let env = Envelope::authed_request(msg_type, payload, &self.access, self.user_id);
        router::route(state, &mut self.ctx, env).await
    }

    /// Send an unauthenticated request through the router.
    pub async fn request_bare(
        &mut self,
        state: &Arc<AppState>,
        msg_type: MsgType,
        payload: impl serde::Serialize,
    ) -> Option<Envelope> {
        let env = Envelope::request(msg_type, payload);
        router::route(state, &mut self.ctx, env).await
    }

    /// Next pushed frame, or panic after the budget.
    pub async fn recv_frame(&mut self) -> Envelope {
        match tokio::time::timeout(RECV_BUDGET, self.rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("connection queue closed")
        {
            Outbound::Frame(env) => env,
            Outbound::Close { code, reason } => {
                panic!("expected frame, got close {code}: {reason}")
            }
        }
    }

    /// Next close command, skipping nothing; panics on a frame.
    pub async fn recv_close(&mut self) -> (u16, String) {
        match tokio::time::timeout(RECV_BUDGET, self.rx.recv())
            .await
            .expect("timed out waiting for close")
            .expect("connection queue closed")
        {
            Outbound::Close { code, reason } => (code, reason),
            Outbound::Frame(env) => panic!("expected close, got frame {}", env.msg_type),
        }
    }

    /// Drain frames until one of `msg_type` arrives.
    pub async fn recv_frame_of(&mut self, msg_type: MsgType) -> Envelope {
        loop {
            let env = self.recv_frame().await;
            if env.msg_type == msg_type.as_str() {
                return env;
            }
        }
    }

    pub fn assert_no_pending(&mut self) {
        assert!(
            self.rx.try_recv().is_err(),
            "expected no pending outbound traffic"
        );
    }
}
