//! The push channel: one task per subscriber.
//!
//! Each subscriber gets the full sequence on attach, then deltas computed
//! against its own last-sent snapshot whenever the store publishes. The
//! server heartbeats every 30 s and drops peers that have been silent past
//! the idle limit. Send failures are treated as a close; cleanup runs once
//! via the slot guard.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use procscope_core::process::ProcessRecord;

use crate::delta::{compute_delta, Delta};
use crate::server::AppState;

/// Server-to-client frames. The `type` key leads every frame.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerFrame<'a> {
    Initial { data: &'a [ProcessRecord] },
    Delta { data: &'a Delta },
    Heartbeat,
    Pong,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let engine = state.engine;

    // Connection cap: the slot is released on drop, whatever the exit path.
    let Some(_slot) = engine.try_attach_subscriber() else {
        warn!("subscriber limit reached, rejecting attachment");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "subscriber limit reached".into(),
            })))
            .await;
        return;
    };

    let subscriber = Uuid::new_v4();
    info!(subscriber = %subscriber, "subscriber attached");

    let mut seq_rx = engine.store().subscribe();
    let mut shutdown = engine.shutdown_signal();
    let mut last_sent: Arc<Vec<ProcessRecord>> = seq_rx.borrow_and_update().clone();

    if send_frame(&mut socket, &ServerFrame::Initial { data: last_sent.as_slice() })
        .await
        .is_err()
    {
        return;
    }

    let heartbeat_period = Duration::from_secs(engine.config().server.heartbeat_secs);
    let idle_limit = Duration::from_secs(engine.config().server.client_idle_secs);
    let mut heartbeat =
        tokio::time::interval_at(Instant::now() + heartbeat_period, heartbeat_period);
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            changed = seq_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = seq_rx.borrow_and_update().clone();
                let delta = compute_delta(&last_sent, &current);
                if delta.is_empty() {
                    continue;
                }
                if send_frame(&mut socket, &ServerFrame::Delta { data: &delta }).await.is_err() {
                    break;
                }
                last_sent = current;
            }
            _ = heartbeat.tick() => {
                if send_frame(&mut socket, &ServerFrame::Heartbeat).await.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(last_inbound + idle_limit) => {
                info!(subscriber = %subscriber, "closing silent subscriber");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            msg = socket.recv() => {
                match msg {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        if client_frame_type(&text).as_deref() == Some("ping") {
                            if send_frame(&mut socket, &ServerFrame::Pong).await.is_err() {
                                break;
                            }
                        }
                        // Everything else is ignored.
                    }
                    Some(Ok(_)) => {
                        last_inbound = Instant::now();
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!(subscriber = %subscriber, "closing subscriber for shutdown");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    info!(subscriber = %subscriber, "subscriber detached");
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame<'_>) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).unwrap_or_default();
    socket.send(Message::Text(json.into())).await
}

fn client_frame_type(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_have_type_first() {
        let frame = ServerFrame::Heartbeat;
        assert_eq!(serde_json::to_string(&frame).unwrap(), r#"{"type":"heartbeat"}"#);

        let frame = ServerFrame::Pong;
        assert_eq!(serde_json::to_string(&frame).unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn initial_frame_wraps_data() {
        let rows: Vec<ProcessRecord> = vec![];
        let json = serde_json::to_string(&ServerFrame::Initial { data: &rows }).unwrap();
        assert_eq!(json, r#"{"type":"initial","data":[]}"#);
    }

    #[test]
    fn delta_frame_shape() {
        let delta = Delta {
            added: vec![],
            updated: vec![],
            removed: vec![42],
        };
        let json = serde_json::to_string(&ServerFrame::Delta { data: &delta }).unwrap();
        assert_eq!(
            json,
            r#"{"type":"delta","data":{"added":[],"updated":[],"removed":[42]}}"#
        );
    }

    #[test]
    fn client_frame_type_parses() {
        assert_eq!(client_frame_type(r#"{"type":"ping"}"#).as_deref(), Some("ping"));
        assert_eq!(client_frame_type(r#"{"type":"pong"}"#).as_deref(), Some("pong"));
        assert!(client_frame_type("not json").is_none());
        assert!(client_frame_type(r#"{"other":1}"#).is_none());
    }
}
