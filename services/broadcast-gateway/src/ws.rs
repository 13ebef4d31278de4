//! The gateway's single WebSocket surface (spec.md §6): auth, per-IP/
//! per-tenant admission, then a `subscribe`/`unsubscribe`/`ping`/
//! `gen_request` loop. Shaped like the teacher's `ws_forwarder_handler` /
//! `handle_forwarder_socket` pair -- header bearer-token extraction on
//! upgrade, a single `tokio::select!` loop mixing inbound reads with
//! channel-driven outbound pushes.

use crate::auth::extract_bearer;
use crate::broadcast::{SocketId, WsOutbound};
use crate::state::GatewayState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use chrono::{Duration as ChronoDuration, Utc};
use futures_util::{SinkExt, StreamExt};
use scene_protocol::{
    close_codes, error_codes, ClientMessage, Envelope, SceneRequest, ServerMessage, Subject, REALITY_STREAM_CHANNEL,
    REALITY_STREAM_SCOPE,
};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .map(str::to_owned);
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr.ip().to_string(), token))
}

async fn send_error(socket: &mut WebSocket, code: &str, message: &str) {
    let msg = ServerMessage::Error { code: code.to_owned(), message: message.to_owned() };
    if let Ok(json) = serde_json::to_string(&msg) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState, ip: String, token: Option<String>) {
    let Some(token) = token else {
        send_error(&mut socket, error_codes::POLICY, "missing Authorization header").await;
        return;
    };
    let claims = match state.verifier.verify(&token).await {
        Ok(c) => c,
        Err(e) => {
            send_error(&mut socket, error_codes::POLICY, &e.to_string()).await;
            return;
        }
    };

    if !state.try_reserve_connection(&ip, &claims.tenant_id).await {
        send_error(&mut socket, error_codes::BACKPRESSURE, "connection cap reached for this ip or tenant").await;
        return;
    }
    info!(tenant_id = %claims.tenant_id, sub = %claims.sub, ip = %ip, "client connected");

    let connected = ServerMessage::Connected { tenant_id: claims.tenant_id.clone(), server_ts: Utc::now().timestamp_millis() };
    if let Ok(json) = serde_json::to_string(&connected) {
        if socket.send(Message::Text(json.into())).await.is_err() {
            state.release_connection(&ip, &claims.tenant_id).await;
            return;
        }
    }

    let mut frame_sub: Option<(SocketId, mpsc::Receiver<WsOutbound>)> = None;
    let (gen_result_tx, mut gen_result_rx) = mpsc::channel::<ServerMessage>(16);

    loop {
        let next_frame = async {
            match frame_sub.as_mut() {
                Some((_, rx)) => rx.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Subscribe { channel }) if channel == REALITY_STREAM_CHANNEL => {
                                if frame_sub.is_none() && claims.has_scope(REALITY_STREAM_SCOPE) {
                                    let (socket_id, rx) = state.broadcast.register(claims.tenant_id.clone(), claims.scopes.clone()).await;
                                    frame_sub = Some((socket_id, rx));
                                } else if !claims.has_scope(REALITY_STREAM_SCOPE) {
                                    send_error(&mut socket, error_codes::POLICY, "token lacks reality.stream scope").await;
                                }
                            }
                            Ok(ClientMessage::Subscribe { .. }) => {
                                send_error(&mut socket, error_codes::INVALID_REQUEST, "unknown channel").await;
                            }
                            Ok(ClientMessage::Unsubscribe { .. }) => {
                                if let Some((socket_id, _)) = frame_sub.take() {
                                    state.broadcast.unregister(socket_id).await;
                                }
                            }
                            Ok(ClientMessage::Ping { ts }) => {
                                let pong = ServerMessage::Pong { ts };
                                if let Ok(json) = serde_json::to_string(&pong) {
                                    if socket.send(Message::Text(json.into())).await.is_err() { break; }
                                }
                            }
                            Ok(ClientMessage::GenRequest { job_id, payload, deadline_ms }) => {
                                spawn_gen_request(state.clone(), claims.tenant_id.clone(), job_id, payload, deadline_ms, gen_result_tx.clone());
                            }
                            Err(e) => {
                                send_error(&mut socket, error_codes::INVALID_REQUEST, &format!("invalid JSON: {e}")).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => { warn!(error = %e, "ws read error"); break; }
                }
            }
            outbound = next_frame => {
                match outbound {
                    Some(WsOutbound::Frame(frame)) => {
                        let msg = ServerMessage::Frame { scene_id: frame.scene_id, seq: frame.seq, body: frame.body };
                        let Ok(json) = serde_json::to_string(&msg) else { continue };
                        let bytes = json.len() as u64;
                        let socket_id = frame_sub.as_ref().map(|(id, _)| *id).unwrap_or(0);
                        match tokio::time::timeout(crate::broadcast::WRITE_TIMEOUT, socket.send(Message::Text(json.into()))).await {
                            Ok(Ok(())) => state.broadcast.report_write(socket_id, bytes, true).await,
                            Ok(Err(_)) => { state.broadcast.report_write(socket_id, 0, false).await; break; }
                            Err(_) => scene_telemetry::metrics::record_frame_drop("write_timeout"),
                        }
                    }
                    Some(WsOutbound::Close(code)) => {
                        let _ = socket.send(Message::Close(Some(CloseFrame { code, reason: "draining".into() }))).await;
                        break;
                    }
                    None => { frame_sub = None; }
                }
            }
            Some(server_msg) = gen_result_rx.recv() => {
                if let Ok(json) = serde_json::to_string(&server_msg) {
                    if socket.send(Message::Text(json.into())).await.is_err() { break; }
                }
            }
        }
    }

    if let Some((socket_id, _)) = frame_sub {
        state.broadcast.unregister(socket_id).await;
    }
    state.release_connection(&ip, &claims.tenant_id).await;
    info!(tenant_id = %claims.tenant_id, sub = %claims.sub, "client disconnected");
}

/// `gen_request` handling runs off the connection's own select loop so a
/// slow generation doesn't stall frame delivery or pings on the same
/// socket -- the gateway-side analogue of the teacher's `cmd_tx`-fed
/// forwarder command replies.
fn spawn_gen_request(
    state: GatewayState,
    tenant_id: String,
    job_id: uuid::Uuid,
    payload: serde_json::Value,
    deadline_ms: i64,
    reply_tx: mpsc::Sender<ServerMessage>,
) {
    tokio::spawn(async move {
        let now = Utc::now();
        let request = SceneRequest {
            job_id,
            tenant_id,
            payload,
            deadline: now + ChronoDuration::milliseconds(deadline_ms.max(0)),
            submitted_at: now,
        };
        if let Err(e) = request.validate() {
            let _ = reply_tx
                .send(ServerMessage::GenResult { job_id, success: false, scene_id: None, error: Some(e.to_string()) })
                .await;
            return;
        }

        let envelope = Envelope::new(&Subject::GenRequest, request);
        let bytes = match envelope.encode() {
            Ok(b) => b,
            Err(e) => {
                let _ = reply_tx
                    .send(ServerMessage::GenResult { job_id, success: false, scene_id: None, error: Some(e.to_string()) })
                    .await;
                return;
            }
        };
        if let Err(e) = state.bus.publish(&Subject::GenRequest, bytes).await {
            let _ = reply_tx
                .send(ServerMessage::GenResult { job_id, success: false, scene_id: None, error: Some(e.to_string()) })
                .await;
            return;
        }

        let result = state.correlator.wait_for(job_id).await;
        let server_msg = match result {
            Ok(r) => ServerMessage::GenResult { job_id, success: r.success, scene_id: r.scene_id, error: r.error },
            Err(e) => ServerMessage::GenResult { job_id, success: false, scene_id: None, error: Some(e.to_string()) },
        };
        let _ = reply_tx.send(server_msg).await;
    });
}
