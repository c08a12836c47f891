use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};

use super::protocol::WsIncomingMessage;
use crate::core::cancel::CancellationToken;
use crate::core::errors::ApiError;
use crate::state::AppState;
use crate::synthesis::{EventSubscription, SynthesisEvent};

/// One in-flight synthesis on a socket.
struct ActiveRun {
    events: EventSubscription,
    cancel: CancellationToken,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<WsIncomingMessage>();

    tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsIncomingMessage>(&text) {
                    Ok(incoming) => {
                        if tx.send(incoming).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::debug!("Ignoring malformed websocket frame: {}", err);
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let mut active: Option<ActiveRun> = None;

    loop {
        tokio::select! {
            incoming = rx.recv() => {
                let Some(incoming) = incoming else {
                    break;
                };
                // Rejections are not run events; a run's terminal frame is
                // always `complete` or `error`.
                if let Err(err) = handle_message(&mut sender, &state, &mut active, incoming).await {
                    if send_json(&mut sender, json!({"type": "rejected", "message": err.to_string()}))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
            event = next_event(&mut active) => {
                let Some(event) = event else {
                    active = None;
                    continue;
                };
                let terminal = event.is_terminal();
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
                if terminal {
                    active = None;
                }
            }
        }
    }

    if let Some(run) = active.take() {
        run.cancel.cancel();
    }
}

async fn handle_message(
    sender: &mut SplitSink<WebSocket, Message>,
    state: &Arc<AppState>,
    active: &mut Option<ActiveRun>,
    data: WsIncomingMessage,
) -> Result<(), ApiError> {
    let msg_type = data.msg_type.as_deref().unwrap_or("");

    match msg_type {
        "stop" => {
            // The run still delivers its terminal event through the loop.
            if let Some(run) = active.as_ref() {
                run.cancel.cancel();
            }
            send_json(sender, json!({"type": "stopped"})).await
        }
        "synthesize" => {
            if active.is_some() {
                return Err(ApiError::BadRequest(
                    "a synthesis is already running on this connection".to_string(),
                ));
            }

            let cancel = CancellationToken::new();
            match state.orchestrator.stream(data.request, cancel.clone()) {
                Ok(events) => {
                    *active = Some(ActiveRun { events, cancel });
                    Ok(())
                }
                Err(err) => {
                    let event = SynthesisEvent::Error {
                        message: err.to_string(),
                        kind: err.kind(),
                    };
                    send_event(sender, &event).await
                }
            }
        }
        other => Err(ApiError::BadRequest(format!(
            "unknown message type '{}'",
            other
        ))),
    }
}

async fn next_event(active: &mut Option<ActiveRun>) -> Option<SynthesisEvent> {
    match active {
        Some(run) => run.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &SynthesisEvent,
) -> Result<(), ApiError> {
    let payload = serde_json::to_value(event).map_err(ApiError::internal)?;
    send_json(sender, payload).await
}

pub async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    payload: Value,
) -> Result<(), ApiError> {
    let text = serde_json::to_string(&payload).map_err(ApiError::internal)?;
    sender
        .send(Message::Text(text))
        .await
        .map_err(ApiError::internal)?;
    Ok(())
}
