//! The `/ws` endpoint: wires axum WebSockets into the hub.
//!
//! Each connection gets a reader task (parsing client envelopes, enforcing
//! the idle timeout) and a writer task (draining the bounded outbound
//! queue). Streamed actions run on their own task and address this
//! connection only; the periodic updates flow through the hub's topic
//! routing.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};

use crate::{
    actions::ContainerAction,
    config::HUB_DRAIN_DEADLINE,
    hub::{ActionOutput, ActionPhase, ClientMessage, ConnectionHandle, ServerMessage},
};

use super::state::ServerState;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Handler for GET /api/ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    let Some((handle, rx)) = state.hub.register() else {
        // Shutting down; close immediately.
        let mut socket = socket;
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    handle.mark_open();

    let (sender, receiver) = socket.split();
    let writer = tokio::spawn(write_loop(sender, rx, handle.clone()));

    read_loop(receiver, handle.clone(), state.clone()).await;

    // Reader is done (disconnect, idle timeout or protocol end): drain the
    // writer and drop the registration.
    handle.drain();
    let _ = tokio::time::timeout(HUB_DRAIN_DEADLINE, writer).await;
    state.hub.unregister(handle.id());
}

/// Drains the outbound queue into the socket until the queue closes or the
/// connection is cancelled.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: tokio::sync::mpsc::Receiver<ServerMessage>,
    handle: Arc<ConnectionHandle>,
) {
    loop {
        tokio::select! {
            _ = handle.cancelled().cancelled() => {
                // Draining: flush whatever is already queued, then close.
                while let Result::Ok(message) = rx.try_recv() {
                    if send_envelope(&mut sender, &message).await.is_err() {
                        break;
                    }
                }
                break;
            }
            message = rx.recv() => {
                let Some(message) = message else {
                    break;
                };
                if send_envelope(&mut sender, &message).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = sender.send(Message::Close(None)).await;
    handle.close();
}

async fn send_envelope(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|_| ())?;
    sender.send(Message::Text(json)).await.map_err(|_| ())
}

/// Parses client envelopes until disconnect or idle timeout.
async fn read_loop(
    mut receiver: impl futures_util::Stream<Item = Result<Message, axum::Error>> + Unpin,
    handle: Arc<ConnectionHandle>,
    state: ServerState,
) {
    let idle_timeout = Duration::from_secs(state.config.runtime.hub_idle_timeout_secs);

    loop {
        let message = match tokio::time::timeout(idle_timeout, receiver.next()).await {
            Result::Ok(Some(Result::Ok(message))) => message,
            Result::Ok(Some(Result::Err(_))) | Result::Ok(None) => return,
            Result::Err(_) => {
                tracing::info!(connection = handle.id(), "closing idle connection");
                return;
            }
        };

        match message {
            Message::Text(raw) => match serde_json::from_str::<ClientMessage>(&raw) {
                Result::Ok(message) => handle_client_message(message, &handle, &state),
                Result::Err(e) => {
                    state.hub.send_to(
                        &handle,
                        ServerMessage::Error {
                            message: format!("invalid message: {e}"),
                        },
                    );
                }
            },
            Message::Close(_) => return,
            _ => {}
        }
    }
}

fn handle_client_message(
    message: ClientMessage,
    handle: &Arc<ConnectionHandle>,
    state: &ServerState,
) {
    match message {
        ClientMessage::Ping => {
            state.hub.send_to(handle, ServerMessage::Pong);
        }
        ClientMessage::Subscribe { topic } => {
            handle.subscribe(topic);
            state.hub.send_to(handle, ServerMessage::Subscribed { topic });
        }
        ClientMessage::Unsubscribe { topic } => {
            handle.unsubscribe(topic);
            state
                .hub
                .send_to(handle, ServerMessage::Unsubscribed { topic });
        }
        ClientMessage::ActionStart { container, action } => {
            let handle = handle.clone();
            let state = state.clone();
            tokio::spawn(async move {
                run_streamed_action(container, action, handle, state).await;
            });
        }
    }
}

/// Runs a container action for one connection, emitting the
/// `started → {completed, failed}` envelope sequence.
async fn run_streamed_action(
    container: String,
    action: String,
    handle: Arc<ConnectionHandle>,
    state: ServerState,
) {
    let parsed = match ContainerAction::parse(&action) {
        Result::Ok(parsed) => parsed,
        Result::Err(e) => {
            state.hub.send_to(
                &handle,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            );
            return;
        }
    };

    let started = std::time::Instant::now();
    state.hub.send_to(
        &handle,
        ServerMessage::ActionOutput(ActionOutput {
            container: container.clone(),
            action: action.clone(),
            status: ActionPhase::Started,
            output: Some(format!("starting {action} on {container}...\n")),
            error: None,
            duration_ms: None,
        }),
    );

    // The client going away cancels delivery; the engine call itself still
    // completes so the audit entry is terminal.
    let result = state.engine.container_action(&container, parsed).await;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    let envelope = match result {
        Result::Ok(output) => {
            state.monitor.force_broadcast();
            ServerMessage::ActionOutput(ActionOutput {
                container,
                action,
                status: ActionPhase::Completed,
                output: Some(output),
                error: None,
                duration_ms: Some(duration_ms),
            })
        }
        Result::Err(e) => ServerMessage::ActionOutput(ActionOutput {
            container,
            action,
            status: ActionPhase::Failed,
            output: None,
            error: Some(e.to_string()),
            duration_ms: Some(duration_ms),
        }),
    };
    state.hub.send_to(&handle, envelope);
}
