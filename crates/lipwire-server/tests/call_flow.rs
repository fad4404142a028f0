mod common;

use std::time::Duration;

use common::{test_env, TestClient};
use lipwire_shared::protocol::{
    CallAcceptPush, CallEndPush, CallInvitePush, CallRejectPush, MsgType,
};
use lipwire_shared::types::CallEndReason;

async fn invite(env: &common::TestEnv, caller: &mut TestClient, callee: &TestClient) {
    let reply = caller
        .request(
            &env.state,
            MsgType::CallInvite,
            serde_json::json!({ "target": callee.user_id }),
        )
        .await
        .unwrap();
    assert!(reply.success, "invite failed: {:?}", reply.error_code);
}

#[tokio::test]
async fn invite_accept_relay_end() {
    let env = test_env();
    let mut ada = TestClient::signup(&env.state, "ada").await;
    let mut bob = TestClient::signup(&env.state, "bob").await;

    // A invites B; B sees the ring.
    invite(&env, &mut ada, &bob).await;
    let ring = bob.recv_frame_of(MsgType::CallInvite).await;
    let push: CallInvitePush = ring.typed_payload().unwrap();
    assert_eq!(push.from, ada.user_id);

    // B accepts; both sides get the mirror.
    assert!(bob
        .request(&env.state, MsgType::CallAccept, serde_json::json!({}))
        .await
        .is_none());
    let mirror_a: CallAcceptPush = ada
        .recv_frame_of(MsgType::CallAccept)
        .await
        .typed_payload()
        .unwrap();
    let mirror_b: CallAcceptPush = bob
        .recv_frame_of(MsgType::CallAccept)
        .await
        .typed_payload()
        .unwrap();
    assert_eq!(mirror_a.from, bob.user_id);
    assert_eq!(mirror_b.from, bob.user_id);

    // Signaling relays with `from` rewritten and the body untouched.
    let offer = serde_json::json!({
        "target": bob.user_id,
        "offer": { "sdp": "v=0 caller-sdp", "type": "offer" },
    });
    assert!(ada
        .request(&env.state, MsgType::Offer, offer)
        .await
        .is_none());
    let relayed = bob.recv_frame_of(MsgType::Offer).await;
    assert_eq!(relayed.payload["from"], ada.user_id.to_string());
    assert_eq!(relayed.payload["offer"]["sdp"], "v=0 caller-sdp");

    let answer = serde_json::json!({
        "target": ada.user_id,
        "answer": { "sdp": "v=0 callee-sdp", "type": "answer" },
    });
    assert!(bob
        .request(&env.state, MsgType::Answer, answer)
        .await
        .is_none());
    let relayed = ada.recv_frame_of(MsgType::Answer).await;
    assert_eq!(relayed.payload["answer"]["sdp"], "v=0 callee-sdp");

    let candidate = serde_json::json!({
        "target": bob.user_id,
        "candidate": { "candidate": "candidate:1 1 udp 1 1.2.3.4 5 typ host" },
    });
    assert!(ada
        .request(&env.state, MsgType::IceCandidate, candidate)
        .await
        .is_none());
    let relayed = bob.recv_frame_of(MsgType::IceCandidate).await;
    assert_eq!(
        relayed.payload["candidate"]["candidate"],
        "candidate:1 1 udp 1 1.2.3.4 5 typ host"
    );

    // A hangs up; B is told, A is not re-notified.
    assert!(ada
        .request(&env.state, MsgType::CallEnd, serde_json::json!({}))
        .await
        .is_none());
    let end: CallEndPush = bob
        .recv_frame_of(MsgType::CallEnd)
        .await
        .typed_payload()
        .unwrap();
    assert_eq!(end.from, Some(ada.user_id));
    assert_eq!(end.reason, CallEndReason::Hangup);

    // Exactly one answered record was persisted.
    let history = env.state.store.call_history(ada.user_id, 10).unwrap();
    assert_eq!(history.len(), 1);
    let record = &history[0];
    assert_eq!(record.caller_id, ada.user_id);
    assert_eq!(record.callee_id, bob.user_id);
    assert!(record.answered_at.is_some());
    assert!(record.ended_at > record.started_at);
}

#[tokio::test]
async fn invite_unregistered_target() {
    let env = test_env();
    let mut ada = TestClient::signup(&env.state, "ada").await;

    let reply = ada
        .request(
            &env.state,
            MsgType::CallInvite,
            serde_json::json!({ "target": lipwire_shared::types::UserId::new() }),
        )
        .await
        .unwrap();
    assert_eq!(reply.error_code.as_deref(), Some("TARGET_NOT_AVAILABLE"));

    // No call record is created.
    assert!(env.state.store.call_history(ada.user_id, 10).unwrap().is_empty());
}

#[tokio::test]
async fn self_invite_is_forbidden() {
    let env = test_env();
    let mut ada = TestClient::signup(&env.state, "ada").await;

    let reply = ada
        .request(
            &env.state,
            MsgType::CallInvite,
            serde_json::json!({ "target": ada.user_id }),
        )
        .await
        .unwrap();
    assert_eq!(reply.error_code.as_deref(), Some("SELF_CALL"));
}

#[tokio::test]
async fn busy_targets_and_double_invites() {
    let env = test_env();
    let mut ada = TestClient::signup(&env.state, "ada").await;
    let mut bob = TestClient::signup(&env.state, "bob").await;
    let mut carol = TestClient::signup(&env.state, "carol").await;

    invite(&env, &mut ada, &bob).await;

    // A second invite from the same caller.
    let reply = ada
        .request(
            &env.state,
            MsgType::CallInvite,
            serde_json::json!({ "target": carol.user_id }),
        )
        .await
        .unwrap();
    assert_eq!(reply.error_code.as_deref(), Some("ALREADY_INVITING"));

    // Carol calling the already-ringing Bob.
    let reply = carol
        .request(
            &env.state,
            MsgType::CallInvite,
            serde_json::json!({ "target": bob.user_id }),
        )
        .await
        .unwrap();
    assert_eq!(reply.error_code.as_deref(), Some("TARGET_BUSY"));
}

#[tokio::test]
async fn reject_ends_ringing_call() {
    let env = test_env();
    let mut ada = TestClient::signup(&env.state, "ada").await;
    let mut bob = TestClient::signup(&env.state, "bob").await;

    invite(&env, &mut ada, &bob).await;
    bob.recv_frame_of(MsgType::CallInvite).await;

    assert!(bob
        .request(&env.state, MsgType::CallReject, serde_json::json!({}))
        .await
        .is_none());

    let reject: CallRejectPush = ada
        .recv_frame_of(MsgType::CallReject)
        .await
        .typed_payload()
        .unwrap();
    assert_eq!(reject.from, bob.user_id);
    let end: CallEndPush = ada
        .recv_frame_of(MsgType::CallEnd)
        .await
        .typed_payload()
        .unwrap();
    assert_eq!(end.reason, CallEndReason::Rejected);

    // The record is a missed call, for both viewers.
    let history = env.state.store.call_history(bob.user_id, 10).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_missed());

    // Both users are free again.
    assert!(env.state.calls.call_of(ada.user_id).await.is_none());
    assert!(env.state.calls.call_of(bob.user_id).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn ring_timeout_produces_missed_call() {
    let env = test_env();
    let mut ada = TestClient::signup(&env.state, "ada").await;
    let mut bob = TestClient::signup(&env.state, "bob").await;

    invite(&env, &mut ada, &bob).await;
    bob.recv_frame_of(MsgType::CallInvite).await;

    // Nobody answers for 30 s.
    tokio::time::advance(Duration::from_secs(31)).await;

    let end: CallEndPush = ada
        .recv_frame_of(MsgType::CallEnd)
        .await
        .typed_payload()
        .unwrap();
    assert_eq!(end.reason, CallEndReason::Timeout);

    let history = env.state.store.call_history(ada.user_id, 10).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_missed());
    assert_eq!(history[0].end_reason, CallEndReason::Timeout);
}

#[tokio::test]
async fn callee_disconnect_during_ring_notifies_caller() {
    let env = test_env();
    let mut ada = TestClient::signup(&env.state, "ada").await;
    let mut bob = TestClient::signup(&env.state, "bob").await;

    invite(&env, &mut ada, &bob).await;
    bob.recv_frame_of(MsgType::CallInvite).await;

    // B's connection drops.
    env.state
        .registry
        .unregister_if(bob.user_id, bob.ctx.conn_id)
        .await;
    env.state.calls.on_disconnect(bob.user_id).await;

    let end: CallEndPush = ada
        .recv_frame_of(MsgType::CallEnd)
        .await
        .typed_payload()
        .unwrap();
    assert_eq!(end.reason, CallEndReason::PeerDisconnected);
}

#[tokio::test]
async fn session_replacement_closes_old_connection_and_call() {
    let env = test_env();
    let mut ada = TestClient::signup(&env.state, "ada").await;
    let mut bob = TestClient::signup(&env.state, "bob").await;

    invite(&env, &mut ada, &bob).await;
    bob.recv_frame_of(MsgType::CallInvite).await;
    assert!(bob
        .request(&env.state, MsgType::CallAccept, serde_json::json!({}))
        .await
        .is_none());
    ada.recv_frame_of(MsgType::CallAccept).await;
    bob.recv_frame_of(MsgType::CallAccept).await;

    // A signs in again from a second connection.
    let mut ada2 = {
        let (mut ctx, rx) = common::open_connection();
        let reply = lipwire_server::router::route(
            &env.state,
            &mut ctx,
            lipwire_shared::protocol::Envelope::request(
                MsgType::Authenticate,
                serde_json::json!({ "username": "ada", "password": "Abcdef!1" }),
            ),
        )
        .await
        .unwrap();
        assert!(reply.success);
        TestClient {
            ctx,
            rx,
            user_id: ada.user_id,
            access: ada.access.clone(),
        }
    };

    // The displaced connection gets the notice and the close.
    let notice = ada.recv_frame_of(MsgType::Logout).await;
    assert_eq!(notice.error_code.as_deref(), Some("SESSION_REPLACED"));
    let (code, reason) = ada.recv_close().await;
    assert_eq!(code, 4000);
    assert_eq!(reason, "SESSION_REPLACED");

    // The peer's call ended with SESSION_REPLACED.
    let end: CallEndPush = bob
        .recv_frame_of(MsgType::CallEnd)
        .await
        .typed_payload()
        .unwrap();
    assert_eq!(end.reason, CallEndReason::SessionReplaced);

    // The new session is live and callable.
    assert!(env.state.registry.is_registered(ada.user_id).await);
    invite(&env, &mut bob, &ada2).await;
    ada2.recv_frame_of(MsgType::CallInvite).await;
}

#[tokio::test]
async fn signaling_outside_a_call_is_refused() {
    let env = test_env();
    let mut ada = TestClient::signup(&env.state, "ada").await;
    let bob = TestClient::signup(&env.state, "bob").await;

    let reply = ada
        .request(
            &env.state,
            MsgType::Offer,
            serde_json::json!({
                "target": bob.user_id,
                "offer": { "sdp": "v=0", "type": "offer" },
            }),
        )
        .await
        .unwrap();
    assert_eq!(reply.error_code.as_deref(), Some("NO_SUCH_CALL"));
}

#[tokio::test]
async fn accept_from_wrong_user_is_refused() {
    let env = test_env();
    let mut ada = TestClient::signup(&env.state, "ada").await;
    let mut bob = TestClient::signup(&env.state, "bob").await;

    invite(&env, &mut ada, &bob).await;
    bob.recv_frame_of(MsgType::CallInvite).await;

    // The caller cannot accept their own invite.
    assert!(ada
        .request(&env.state, MsgType::CallAccept, serde_json::json!({}))
        .await
        .is_none());
    let failure = ada.recv_frame_of(MsgType::CallAccept).await;
    assert!(!failure.success);
    assert_eq!(failure.error_code.as_deref(), Some("NO_SUCH_CALL"));

    // The call still rings; B can accept.
    assert!(bob
        .request(&env.state, MsgType::CallAccept, serde_json::json!({}))
        .await
        .is_none());
    bob.recv_frame_of(MsgType::CallAccept).await;
}

#[tokio::test]
async fn video_state_relays_between_participants() {
    let env = test_env();
    let mut ada = TestClient::signup(&env.state, "ada").await;
    let mut bob = TestClient::signup(&env.state, "bob").await;

    invite(&env, &mut ada, &bob).await;
    bob.recv_frame_of(MsgType::CallInvite).await;
    assert!(bob
        .request(&env.state, MsgType::CallAccept, serde_json::json!({}))
        .await
        .is_none());
    ada.recv_frame_of(MsgType::CallAccept).await;
    bob.recv_frame_of(MsgType::CallAccept).await;

    assert!(ada
        .request(
            &env.state,
            MsgType::VideoState,
            serde_json::json!({ "target": bob.user_id, "video": false }),
        )
        .await
        .is_none());
    let relayed = bob.recv_frame_of(MsgType::VideoState).await;
    assert_eq!(relayed.payload["video"], false);
    assert_eq!(relayed.payload["from"], ada.user_id.to_string());
}
