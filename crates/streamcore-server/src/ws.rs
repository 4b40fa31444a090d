//! WebSocket delivery endpoint: `HANDSHAKE -> READY -> LIVE <-> COMMAND -> TERMINATED`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::sse::request_context;
use crate::state::AppState;
use streamcore::{Broker, QueueHandle};
use streamcore_auth::TokenSource;

/// Close code for policy violations: missing/invalid token, or a
/// connection-limit rejection at handshake.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Deserialize)]
struct CommandFrame {
    action: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct WelcomeFrame<'a> {
    event: &'static str,
    client_id: &'a str,
    tenant_id: &'a str,
    ts: String,
    seq: u64,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query, headers))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, query: HashMap<String, String>, headers: HeaderMap) {
    let Some(token) = query.get("token").cloned() else {
        let _ = socket
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: "missing token".into(),
            })))
            .await;
        return;
    };

    let ctx = match state
        .verifier
        .verify_with_context(&token, None, TokenSource::Query, "ws", &request_context(&headers))
        .await
    {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!(error = %e, "websocket auth failed");
            let _ = socket
                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "invalid token".into(),
                })))
                .await;
            return;
        }
    };
    let tenant_id = ctx.tid.clone();

    if !state.rate_limiter.allow_connection(&tenant_id).await {
        let _ = socket
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: "connection limit exceeded".into(),
            })))
            .await;
        return;
    }
    if !state.rate_limiter.allow_qps(&tenant_id, 1.0).await {
        state.rate_limiter.remove_connection(&tenant_id).await;
        let _ = socket
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: "rate limit exceeded".into(),
            })))
            .await;
        return;
    }
    state.rate_limiter.add_connection(&tenant_id).await;

    run_session(socket, state.clone(), tenant_id.clone()).await;
    state.rate_limiter.remove_connection(&tenant_id).await;
}

/// A live per-topic forwarder: owns the [`QueueHandle`] until it is told to
/// stop, at which point it unsubscribes itself rather than leaving the
/// broker-side registration to leak behind an aborted task.
struct Subscription {
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

async fn run_session(mut socket: WebSocket, state: AppState, tenant_id: String) {
    let client_id = Uuid::new_v4().to_string();
    let welcome = WelcomeFrame {
        event: "welcome",
        client_id: &client_id,
        tenant_id: &tenant_id,
        ts: chrono::Utc::now().to_rfc3339(),
        seq: 0,
    };
    if socket
        .send(Message::Text(serde_json::to_string(&welcome).unwrap_or_default()))
        .await
        .is_err()
    {
        return;
    }

    let (forward_tx, mut forward_rx) = tokio::sync::mpsc::channel::<String>(256);
    let mut subscriptions: HashMap<String, Subscription> = HashMap::new();
    let mut messages_sent = 0u64;

    info!(tenant_id = %tenant_id, client_id = %client_id, "websocket session ready");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !state.rate_limiter.allow_qps(&tenant_id, 0.1).await {
                            let _ = socket.send(Message::Text(json!({"ok": false, "error": "rate_limited", "detail": "command rate exceeded, slow down"}).to_string())).await;
                            continue;
                        }
                        handle_command(&text, &state, &mut subscriptions, &forward_tx, &mut socket).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket recv error");
                        break;
                    }
                }
            }
            Some(frame) = forward_rx.recv() => {
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
                messages_sent += 1;
            }
        }
    }

    for (_, sub) in subscriptions.drain() {
        let _ = sub.shutdown.send(());
        let _ = sub.task.await;
    }
    info!(tenant_id = %tenant_id, client_id = %client_id, messages_sent, "websocket session terminated");
}

async fn handle_command(
    text: &str,
    state: &AppState,
    subscriptions: &mut HashMap<String, Subscription>,
    forward_tx: &tokio::sync::mpsc::Sender<String>,
    socket: &mut WebSocket,
) {
    let frame: CommandFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            let _ = socket
                .send(Message::Text(json!({"ok": false, "error": "unknown_action", "detail": e.to_string()}).to_string()))
                .await;
            return;
        }
    };

    match frame.action.as_str() {
        "subscribe" => {
            for topic in &frame.topics {
                if subscriptions.contains_key(topic) {
                    continue;
                }
                let handle = state.broker.subscribe(topic).await;
                let (shutdown_tx, shutdown_rx) = oneshot::channel();
                let tx = forward_tx.clone();
                let broker = state.broker.clone();
                let heartbeat_secs = state.config.heartbeat_secs;
                let task = tokio::spawn(forward_loop(handle, broker, tx, heartbeat_secs, shutdown_rx));
                subscriptions.insert(topic.clone(), Subscription { shutdown: shutdown_tx, task });
            }
            let current: Vec<&str> = subscriptions.keys().map(String::as_str).collect();
            let _ = socket
                .send(Message::Text(json!({"event": "subscribed", "topics": current}).to_string()))
                .await;
        }
        "unsubscribe" => {
            for topic in &frame.topics {
                if let Some(sub) = subscriptions.remove(topic) {
                    let _ = sub.shutdown.send(());
                    let _ = sub.task.await;
                }
            }
            let current: Vec<&str> = subscriptions.keys().map(String::as_str).collect();
            let _ = socket
                .send(Message::Text(json!({"event": "unsubscribed", "topics": current}).to_string()))
                .await;
        }
        "ping" => {
            let _ = socket
                .send(Message::Text(json!({"event": "pong", "payload": frame.payload}).to_string()))
                .await;
        }
        "stats" => {
            let stats = state.broker.stats().await;
            let _ = socket
                .send(Message::Text(
                    json!({
                        "event": "stats",
                        "subscriptions": subscriptions.keys().collect::<HashSet<_>>(),
                        "broker_published": stats.published,
                        "broker_dropped": stats.dropped,
                    })
                    .to_string(),
                ))
                .await;
        }
        _ => {
            let _ = socket
                .send(Message::Text(json!({"ok": false, "error": "unknown_action", "detail": format!("unrecognized action {:?}", frame.action)}).to_string()))
                .await;
        }
    }
}

#[instrument(skip(handle, broker, tx, shutdown))]
async fn forward_loop(
    mut handle: QueueHandle,
    broker: Arc<Broker>,
    tx: tokio::sync::mpsc::Sender<String>,
    heartbeat_secs: u64,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            envelope = handle.next_message(heartbeat_secs) => {
                let Ok(json) = envelope.to_json() else { continue };
                if tx.send(json).await.is_err() {
                    break;
                }
            }
        }
    }
    broker.unsubscribe(handle).await;
}
