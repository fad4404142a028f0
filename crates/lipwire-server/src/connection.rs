//! Connection lifecycle.
//!
//! Accept a WebSocket, run the crypto-envelope handshake under a 5 s budget,
//! then fan out into three tasks: the inbound loop (this task) decrypting
//! frames in arrival order and routing them, an outbound loop draining the
//! bounded per-connection queue, and the heartbeat supervisor. Any fatal
//! error or close funnels through one terminal path that stops the
//! heartbeat, unregisters the session, and cascades the disconnect into the
//! call coordinator.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use lipwire_shared::constants::{HANDSHAKE_TIMEOUT_SECS, MAX_FRAME_SIZE, OUTBOUND_QUEUE_DEPTH};
use lipwire_shared::envelope::{CipherFrame, FrameCipher, ServerHandshake};
use lipwire_shared::protocol::{Envelope, HandshakeReply, MsgType};
use lipwire_shared::types::ConnectionId;

use crate::error::close_codes;
use crate::heartbeat::{self, Liveness};
use crate::registry::{ConnectionHandle, Outbound};
use crate::router::{self, ConnCtx};
use crate::state::AppState;

#[derive(Debug, Error)]
enum HandshakeError {
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Timed out waiting for handshake reply")]
    Timeout,

    #[error("Malformed handshake reply: {0}")]
    Malformed(String),

    #[error("Connection closed during handshake")]
    Closed,
}

/// Serve one accepted transport until it closes. Generic over the stream so
/// plain TCP and TLS connections share the whole path.
pub async fn serve<S>(state: Arc<AppState>, stream: S, remote: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(remote = %remote, error = %e, "websocket accept failed");
            return;
        }
    };

    let conn_id = ConnectionId::new();
    info!(conn = %conn_id.short(), remote = %remote, "connection accepted");

    // Fatal per the envelope contract: drop with no reply.
    let cipher = match perform_handshake(&mut ws).await {
        Ok(cipher) => cipher,
        Err(e) => {
            warn!(conn = %conn_id.short(), error = %e, "handshake failed");
            return;
        }
    };
    debug!(conn = %conn_id.short(), "crypto envelope established");

    let (sink, stream) = ws.split();
    let (out_tx, out_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE_DEPTH);
    let handle = ConnectionHandle::new(conn_id, out_tx);
    let liveness = Liveness::new();

    let outbound = tokio::spawn(outbound_loop(sink, cipher.clone(), out_rx));
    let hb = tokio::spawn(heartbeat::run(handle.clone(), liveness.clone()));

    let mut ctx = ConnCtx::new(conn_id, handle, liveness);
    inbound_loop(&state, &mut ctx, stream, &cipher, remote).await;

    // Terminal path.
    hb.abort();
    if let Some(user) = ctx.authed {
        if state.registry.unregister_if(user, conn_id).await {
            state.calls.on_disconnect(user).await;
        }
    }
    state.limiter.forget(remote.ip()).await;
    drop(ctx);

    let _ = outbound.await;
    info!(conn = %conn_id.short(), "connection closed");
}

async fn perform_handshake<S>(ws: &mut WebSocketStream<S>) -> Result<FrameCipher, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = ServerHandshake::initiate();
    let hello = Envelope::reply(MsgType::Handshake, handshake.hello());
    let text = serde_json::to_string(&hello).map_err(|e| HandshakeError::Malformed(e.to_string()))?;
    ws.send(Message::Text(text)).await?;

    let reply = tokio::time::timeout(
        Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        next_text_frame(ws),
    )
    .await
    .map_err(|_| HandshakeError::Timeout)??;

    let env: Envelope = serde_json::from_str(&reply)
        .map_err(|e| HandshakeError::Malformed(e.to_string()))?;
    if env.msg_type != MsgType::Handshake.as_str() {
        return Err(HandshakeError::Malformed(format!(
            "expected handshake, got {}",
            env.msg_type
        )));
    }
    let payload: HandshakeReply = env
        .typed_payload()
        .map_err(|e| HandshakeError::Malformed(e.to_string()))?;

    handshake
        .complete(&payload)
        .map_err(|e| HandshakeError::Malformed(e.to_string()))
}

async fn next_text_frame<S>(ws: &mut WebSocketStream<S>) -> Result<String, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => return Ok(text),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return Err(HandshakeError::Closed),
            other => {
                return Err(HandshakeError::Malformed(format!(
                    "unexpected frame during handshake: {other:?}"
                )))
            }
        }
    }
    Err(HandshakeError::Closed)
}

/// Decrypt frames in arrival order and hand them to the router. Returns when
/// the connection is done for any reason.
async fn inbound_loop<S>(
    state: &Arc<AppState>,
    ctx: &mut ConnCtx,
    mut stream: SplitStream<WebSocketStream<S>>,
    cipher: &FrameCipher,
    remote: SocketAddr,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(conn = %ctx.conn_id.short(), error = %e, "transport error");
                return;
            }
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return,
            // The protocol is text frames only; anything else is fatal.
            other => {
                warn!(conn = %ctx.conn_id.short(), "non-text frame ({other:?}), dropping connection");
                return;
            }
        };

        if text.len() > MAX_FRAME_SIZE {
            warn!(conn = %ctx.conn_id.short(), size = text.len(), "oversized frame, dropping connection");
            return;
        }

        if !state.limiter.check(remote.ip()).await {
            warn!(conn = %ctx.conn_id.short(), "rate limit exceeded, closing");
            ctx.handle
                .close(close_codes::RATE_LIMIT, "rate limit exceeded")
                .await;
            return;
        }

        // Post-handshake, every frame must be ciphertext. A plaintext or
        // undecryptable frame is fatal with no reply.
        let frame: CipherFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(_) => {
                warn!(conn = %ctx.conn_id.short(), "plaintext frame after handshake, dropping connection");
                return;
            }
        };
        let plaintext = match cipher.open(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(conn = %ctx.conn_id.short(), error = %e, "decrypt failure, dropping connection");
                return;
            }
        };

        // A decrypted-but-malformed envelope is a validation error, not a
        // transport one; the connection survives.
        let env: Envelope = match serde_json::from_slice(&plaintext) {
            Ok(env) => env,
            Err(e) => {
                let reply = Envelope::failure(
                    "unknown",
                    crate::error::codes::SCHEMA_ERROR,
                    format!("malformed message: {e}"),
                );
                if !ctx.handle.send(reply).await {
                    return;
                }
                continue;
            }
        };

        if let Some(reply) = router::route(state, ctx, env).await {
            if !ctx.handle.send(reply).await {
                return;
            }
        }
    }
}

/// Drain the outbound queue: encrypt and write frames in enqueue order,
/// stop on the first close command or sink error.
async fn outbound_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    cipher: FrameCipher,
    mut rx: mpsc::Receiver<Outbound>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Outbound::Frame(env) => {
                let plaintext = match serde_json::to_vec(&env) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize outbound frame");
                        continue;
                    }
                };
                let frame = match cipher.seal(&plaintext) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "failed to seal outbound frame");
                        break;
                    }
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize cipher frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}
