//! Call coordination.
//!
//! One actor task per call owns the state machine; every external event --
//! control messages, signaling, disconnects, transcriber deltas, the ring
//! timer -- arrives as a [`CallEvent`] on the actor's mailbox. The
//! [`CallCoordinator`] keeps the process-wide index of live calls and
//! enforces the invite preconditions before an actor exists.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lipwire_media::{CaptionDelta, MediaAgent, MediaAgentFactory, TranscriberFactory};
use lipwire_shared::constants::RING_TIMEOUT_SECS;
use lipwire_shared::protocol::{
    CallAcceptPush, CallEndPush, CallInvitePush, CallRejectPush, CaptionPush, Envelope, MsgType,
    SignalPayload, SERVER_TARGET,
};
use lipwire_shared::types::{CallEndReason, CallId, ModelKind, TranscriptLine, UserId};
use lipwire_store::{CallRecord, Store};

use crate::captions;
use crate::error::ServerError;
use crate::registry::SessionRegistry;

const CALL_MAILBOX_DEPTH: usize = 32;

/// Call state. Terminal transitions are irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Callee notified, ring timer running.
    Inviting,
    /// Callee accepted; media negotiation under way.
    Accepted,
    /// At least one peer-to-peer media leg established.
    Active,
    /// Terminal.
    Ended,
}

#[derive(Debug)]
pub enum CallEvent {
    Accept { by: UserId },
    Reject { by: UserId },
    HangUp { by: UserId },
    Disconnected { user: UserId },
    Replaced { user: UserId },
    Signal {
        from: UserId,
        msg_type: MsgType,
        payload: SignalPayload,
    },
    Caption { speaker: UserId, delta: CaptionDelta },
}

#[derive(Clone)]
struct CallHandle {
    call_id: CallId,
    tx: mpsc::Sender<CallEvent>,
}

#[derive(Default)]
struct Table {
    by_user: HashMap<UserId, CallHandle>,
}

struct Inner {
    registry: SessionRegistry,
    store: Arc<Store>,
    media: Arc<dyn MediaAgentFactory>,
    transcribers: Arc<dyn TranscriberFactory>,
    table: Mutex<Table>,
}

#[derive(Clone)]
pub struct CallCoordinator {
    inner: Arc<Inner>,
}

impl CallCoordinator {
    pub fn new(
        registry: SessionRegistry,
        store: Arc<Store>,
        media: Arc<dyn MediaAgentFactory>,
        transcribers: Arc<dyn TranscriberFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                store,
                media,
                transcribers,
                table: Mutex::new(Table::default()),
            }),
        }
    }

    /// Start a call. Checks every invite precondition, spawns the call
    /// actor, and rings the callee.
    pub async fn invite(&self, caller: UserId, target: &str) -> Result<CallId, ServerError> {
        let callee = UserId::parse(target)
            .map_err(|_| ServerError::Schema(format!("invalid call target: {target}")))?;
        if callee == caller {
            return Err(ServerError::SelfCall);
        }

        let callee_handle = self
            .inner
            .registry
            .lookup(callee)
            .await
            .ok_or(ServerError::TargetNotAvailable(callee))?;

        let (call_id, tx) = {
            let mut table = self.inner.table.lock().await;
            if table.by_user.contains_key(&caller) {
                return Err(ServerError::AlreadyInviting);
            }
            if table.by_user.contains_key(&callee) {
                return Err(ServerError::TargetBusy(callee));
            }

            let call_id = CallId::new();
            let (tx, rx) = mpsc::channel(CALL_MAILBOX_DEPTH);
            let handle = CallHandle { call_id, tx: tx.clone() };
            table.by_user.insert(caller, handle.clone());
            table.by_user.insert(callee, handle);

            let actor = CallActor::new(self.clone(), call_id, caller, callee, tx.clone());
            tokio::spawn(actor.run(rx));
            (call_id, tx)
        };

        info!(
            call = %call_id.short(),
            caller = %caller.short(),
            callee = %callee.short(),
            "call invite"
        );

        let push = Envelope::reply(MsgType::CallInvite, CallInvitePush { from: caller });
        if !callee_handle.send(push).await {
            // The callee closed between lookup and ring; tear the call down.
            let _ = tx.send(CallEvent::Disconnected { user: callee }).await;
            return Err(ServerError::TargetNotAvailable(callee));
        }

        Ok(call_id)
    }

    pub async fn accept(&self, by: UserId) -> Result<(), ServerError> {
        self.post(by, CallEvent::Accept { by }).await
    }

    pub async fn reject(&self, by: UserId) -> Result<(), ServerError> {
        self.post(by, CallEvent::Reject { by }).await
    }

    pub async fn hang_up(&self, by: UserId) -> Result<(), ServerError> {
        self.post(by, CallEvent::HangUp { by }).await
    }

    /// Route a signaling frame into the sender's call.
    pub async fn signal(
        &self,
        from: UserId,
        msg_type: MsgType,
        payload: SignalPayload,
    ) -> Result<(), ServerError> {
        self.post(from, CallEvent::Signal { from, msg_type, payload }).await
    }

    /// Connection-terminal path: cascade the disconnect into any call the
    /// user participates in.
    pub async fn on_disconnect(&self, user: UserId) {
        let _ = self.post(user, CallEvent::Disconnected { user }).await;
    }

    /// Session displacement: end the user's call without notifying the
    /// displaced session itself.
    pub async fn end_for_replacement(&self, user: UserId) {
        let _ = self.post(user, CallEvent::Replaced { user }).await;
    }

    pub async fn call_of(&self, user: UserId) -> Option<CallId> {
        self.inner
            .table
            .lock()
            .await
            .by_user
            .get(&user)
            .map(|h| h.call_id)
    }

    async fn post(&self, user: UserId, event: CallEvent) -> Result<(), ServerError> {
        let handle = {
            let table = self.inner.table.lock().await;
            table.by_user.get(&user).cloned()
        };
        let handle = handle.ok_or(ServerError::NoSuchCall)?;
        handle
            .tx
            .send(event)
            .await
            .map_err(|_| ServerError::NoSuchCall)
    }

    /// Called by the actor on its Ended transition.
    async fn remove_call(&self, call_id: CallId, caller: UserId, callee: UserId) {
        let mut table = self.inner.table.lock().await;
        for user in [caller, callee] {
            if table
                .by_user
                .get(&user)
                .is_some_and(|h| h.call_id == call_id)
            {
                table.by_user.remove(&user);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Call actor
// ---------------------------------------------------------------------------

/// The server-side caption endpoint of one call: a media agent negotiated
/// with whichever participant addressed `"server"`, feeding that speaker's
/// frames into a transcriber.
struct CaptionEndpoint {
    agent: Arc<dyn MediaAgent>,
    speaker: Option<UserId>,
    pump: Option<JoinHandle<()>>,
}

struct CallActor {
    coordinator: CallCoordinator,
    call_id: CallId,
    caller: UserId,
    callee: UserId,
    tx: mpsc::Sender<CallEvent>,
    phase: Phase,
    started_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    transcript: Vec<TranscriptLine>,
    last_line_at: HashMap<UserId, DateTime<Utc>>,
    caption: Option<CaptionEndpoint>,
}

impl CallActor {
    fn new(
        coordinator: CallCoordinator,
        call_id: CallId,
        caller: UserId,
        callee: UserId,
        tx: mpsc::Sender<CallEvent>,
    ) -> Self {
        Self {
            coordinator,
            call_id,
            caller,
            callee,
            tx,
            phase: Phase::Inviting,
            started_at: Utc::now(),
            answered_at: None,
            transcript: Vec::new(),
            last_line_at: HashMap::new(),
            caption: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<CallEvent>) {
        let ring = tokio::time::sleep(std::time::Duration::from_secs(RING_TIMEOUT_SECS));
        tokio::pin!(ring);

        loop {
            tokio::select! {
                _ = &mut ring, if self.phase == Phase::Inviting => {
                    info!(call = %self.call_id.short(), "ring timeout");
                    self.end(CallEndReason::Timeout, None).await;
                }
                event = rx.recv() => match event {
                    Some(event) => self.on_event(event).await,
                    // All senders gone; nothing can reach this call anymore.
                    None => self.end(CallEndReason::PeerDisconnected, None).await,
                }
            }

            if self.phase == Phase::Ended {
                break;
            }
        }
    }

    fn peer_of(&self, user: UserId) -> UserId {
        if user == self.caller {
            self.callee
        } else {
            self.caller
        }
    }

    async fn on_event(&mut self, event: CallEvent) {
        match event {
            CallEvent::Accept { by } => self.on_accept(by).await,
            CallEvent::Reject { by } => self.on_reject(by).await,
            CallEvent::HangUp { by } => self.on_hang_up(by).await,
            CallEvent::Disconnected { user } => {
                if self.phase != Phase::Ended {
                    info!(
                        call = %self.call_id.short(),
                        user = %user.short(),
                        "participant disconnected"
                    );
                    self.end(CallEndReason::PeerDisconnected, Some(user)).await;
                }
            }
            CallEvent::Replaced { user } => {
                if self.phase != Phase::Ended {
                    self.end(CallEndReason::SessionReplaced, Some(user)).await;
                }
            }
            CallEvent::Signal { from, msg_type, payload } => {
                self.on_signal(from, msg_type, payload).await
            }
            CallEvent::Caption { speaker, delta } => self.on_caption(speaker, delta).await,
        }
    }

    async fn on_accept(&mut self, by: UserId) {
        if self.phase != Phase::Inviting || by != self.callee {
            self.push_failure(by, MsgType::CallAccept, ServerError::NoSuchCall)
                .await;
            return;
        }

        self.phase = Phase::Accepted;
        self.answered_at = Some(Utc::now());

        // The caption endpoint exists from Accepted on; it binds to a
        // speaker when an offer addressed to the server arrives.
        self.caption = Some(CaptionEndpoint {
            agent: self.coordinator.inner.media.create_agent(),
            speaker: None,
            pump: None,
        });

        info!(call = %self.call_id.short(), "call accepted");

        // Both participants receive the accept mirror.
        let push = CallAcceptPush { from: self.callee };
        for user in [self.caller, self.callee] {
            self.push_to(user, Envelope::reply(MsgType::CallAccept, &push))
                .await;
        }
    }

    async fn on_reject(&mut self, by: UserId) {
        if self.phase != Phase::Inviting || by != self.callee {
            self.push_failure(by, MsgType::CallReject, ServerError::NoSuchCall)
                .await;
            return;
        }

        info!(call = %self.call_id.short(), "call rejected");
        let push = CallRejectPush { from: self.callee };
        self.push_to(self.caller, Envelope::reply(MsgType::CallReject, &push))
            .await;
        self.end(CallEndReason::Rejected, Some(by)).await;
    }

    async fn on_hang_up(&mut self, by: UserId) {
        match self.phase {
            Phase::Accepted | Phase::Active => {
                self.end(CallEndReason::Hangup, Some(by)).await;
            }
            // The caller withdrawing a ringing invite is a hangup; the
            // callee declining one is a reject.
            Phase::Inviting if by == self.caller => {
                self.end(CallEndReason::Hangup, Some(by)).await;
            }
            Phase::Inviting => self.on_reject(by).await,
            Phase::Ended => {}
        }
    }

    async fn on_signal(&mut self, from: UserId, msg_type: MsgType, payload: SignalPayload) {
        if !matches!(self.phase, Phase::Accepted | Phase::Active) {
            self.push_failure(from, msg_type, ServerError::NoSuchCall).await;
            return;
        }

        if payload.targets_server() {
            self.on_server_signal(from, msg_type, payload).await;
            return;
        }

        let peer = self.peer_of(from);
        if UserId::parse(&payload.target).ok() != Some(peer) {
            self.push_failure(from, msg_type, ServerError::TargetNotAvailable(peer))
                .await;
            return;
        }

        debug!(
            call = %self.call_id.short(),
            kind = %msg_type,
            from = %from.short(),
            "relaying signaling frame"
        );

        let forwarded = Envelope::reply(msg_type, payload.stamped(&from.to_string()));
        if !self.push_to(peer, forwarded).await {
            self.push_failure(from, msg_type, ServerError::TargetNotAvailable(peer))
                .await;
            return;
        }

        // The first relayed answer means a peer-to-peer leg is up.
        if msg_type == MsgType::Answer && self.phase == Phase::Accepted {
            self.phase = Phase::Active;
            info!(call = %self.call_id.short(), "call active");
        }
    }

    async fn on_server_signal(&mut self, from: UserId, msg_type: MsgType, payload: SignalPayload) {
        let (agent, speaker_bound) = match &self.caption {
            Some(endpoint) => (endpoint.agent.clone(), endpoint.speaker.is_some()),
            None => {
                self.push_failure(from, msg_type, ServerError::NoSuchCall).await;
                return;
            }
        };

        match msg_type {
            MsgType::Offer => {
                let Some(sdp) = payload
                    .extra
                    .get("offer")
                    .and_then(|o| o.get("sdp"))
                    .and_then(Value::as_str)
                else {
                    self.push_failure(
                        from,
                        msg_type,
                        ServerError::Schema("offer is missing sdp".into()),
                    )
                    .await;
                    return;
                };

                let answer_sdp = match agent.accept_offer(sdp).await {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!(call = %self.call_id.short(), error = %e, "caption offer failed");
                        self.push_failure(from, msg_type, ServerError::Internal(e.to_string()))
                            .await;
                        return;
                    }
                };

                if !speaker_bound {
                    // First server-directed offer binds the captioned
                    // speaker and picks the model from their preference.
                    let kind = self
                        .coordinator
                        .inner
                        .store
                        .model_preference(from)
                        .unwrap_or(ModelKind::Lip);
                    let transcriber = self.coordinator.inner.transcribers.create_transcriber(kind);
                    let deltas = transcriber.start(agent.frames());
                    let pump = tokio::spawn(captions::pump(self.tx.clone(), deltas, from));
                    if let Some(endpoint) = self.caption.as_mut() {
                        endpoint.speaker = Some(from);
                        endpoint.pump = Some(pump);
                    }
                    info!(
                        call = %self.call_id.short(),
                        speaker = %from.short(),
                        model = %kind,
                        "caption endpoint bound"
                    );
                }

                let answer = Envelope::reply(
                    MsgType::Answer,
                    serde_json::json!({
                        "from": SERVER_TARGET,
                        "target": from,
                        "answer": { "sdp": answer_sdp, "type": "answer" },
                    }),
                );
                self.push_to(from, answer).await;
            }
            MsgType::IceCandidate => {
                let candidate = payload
                    .extra
                    .get("candidate")
                    .and_then(|c| c.get("candidate"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if let Err(e) = agent.add_ice(candidate).await {
                    self.push_failure(from, msg_type, ServerError::Schema(e.to_string()))
                        .await;
                }
            }
            // The server never offers first, so an answer has nowhere to
            // land; video_state carries no server-side meaning either.
            _ => {
                debug!(
                    call = %self.call_id.short(),
                    kind = %msg_type,
                    "ignoring server-directed frame"
                );
            }
        }
    }

    async fn on_caption(&mut self, speaker: UserId, delta: CaptionDelta) {
        if !matches!(self.phase, Phase::Accepted | Phase::Active) {
            return;
        }

        let t = captions::next_monotonic(&mut self.last_line_at, speaker, Utc::now());
        self.transcript.push(TranscriptLine {
            t,
            speaker,
            text: delta.text.clone(),
            source: delta.source,
        });

        let push = CaptionPush {
            from: SERVER_TARGET.to_string(),
            prediction: delta.text,
            speaker,
            source: delta.source,
        };
        captions::broadcast(
            &self.coordinator.inner.registry,
            &[self.caller, self.callee],
            &push,
        )
        .await;
    }

    /// The Ended transition: cancel timers, dispose media, persist exactly
    /// once, notify every still-connected participant that didn't initiate.
    async fn end(&mut self, reason: CallEndReason, initiator: Option<UserId>) {
        if self.phase == Phase::Ended {
            return;
        }
        self.phase = Phase::Ended;

        if let Some(endpoint) = self.caption.take() {
            endpoint.agent.dispose();
            if let Some(pump) = endpoint.pump {
                pump.abort();
            }
        }

        self.coordinator
            .remove_call(self.call_id, self.caller, self.callee)
            .await;

        let record = CallRecord {
            id: self.call_id,
            caller_id: self.caller,
            callee_id: self.callee,
            started_at: self.started_at,
            answered_at: self.answered_at,
            ended_at: Utc::now(),
            end_reason: reason,
            transcripts: std::mem::take(&mut self.transcript),
        };
        if let Err(e) = self.coordinator.inner.store.insert_call(&record) {
            warn!(call = %self.call_id.short(), error = %e, "failed to persist call record");
        }

        info!(
            call = %self.call_id.short(),
            reason = %reason,
            lines = record.transcripts.len(),
            "call ended"
        );

        let push = CallEndPush { from: initiator, reason };
        for user in [self.caller, self.callee] {
            if Some(user) == initiator {
                continue;
            }
            self.push_to(user, Envelope::reply(MsgType::CallEnd, &push))
                .await;
        }
    }

    async fn push_to(&self, user: UserId, env: Envelope) -> bool {
        match self.coordinator.inner.registry.lookup(user).await {
            Some(handle) => handle.send(env).await,
            None => false,
        }
    }

    async fn push_failure(&self, user: UserId, msg_type: MsgType, error: ServerError) {
        let env = Envelope::failure(msg_type.as_str(), error.error_code(), error.public_message());
        self.push_to(user, env).await;
    }
}
