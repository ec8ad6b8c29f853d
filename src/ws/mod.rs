//! The WebSocket transport: split the socket, `select!` between inbound
//! frames and outbound broadcasts. A connection subscribes to its role's
//! multi-channel fan-out (`fanout::SessionChannels::channels_for_role`)
//! plus, for participants, a unicast mailbox.

mod controller;
pub mod handlers;
mod participant;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::Role;
use handlers::ConnContext;

pub async fn ws_handler(ws: WebSocketUpgrade, connect_info: Option<ConnectInfo<SocketAddr>>, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ip = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, ip, state))
}

/// Fan a session's broadcast channels (and, for a participant, its unicast
/// mailbox) into a single combined queue the socket loop can `select!` on.
fn spawn_forwarders(
    receivers: Vec<broadcast::Receiver<ServerMessage>>,
    unicast: Option<mpsc::UnboundedReceiver<ServerMessage>>,
    initial: Vec<ServerMessage>,
) -> (mpsc::UnboundedReceiver<ServerMessage>, Vec<JoinHandle<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut handles = Vec::new();

    // Queued ahead of anything the broadcast/unicast forwarders deliver, so a
    // freshly-subscribed connection sees its initial snapshot (e.g.
    // `lobby_state`) before any subsequent live update.
    for msg in initial {
        let _ = tx.send(msg);
    }

    for mut receiver in receivers {
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    if let Some(mut unicast) = unicast {
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            while let Some(msg) = unicast.recv().await {
                if tx.send(msg).is_err() {
                    break;
                }
            }
        }));
    }

    (rx, handles)
}

async fn handle_socket(socket: WebSocket, ip: String, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut ctx = ConnContext { ip, connection_id: ulid::Ulid::new().to_string(), ..ConnContext::default() };

    let mut fanout_rx: Option<mpsc::UnboundedReceiver<ServerMessage>> = None;
    let mut forwarder_handles: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            outgoing = async {
                match &mut fanout_rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                let Some(msg) = outgoing else { continue };
                if send_message(&mut sender, &msg).await.is_err() {
                    break;
                }
            }

            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let was_authenticated = ctx.role.is_some();
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(response) = handlers::handle_message(client_msg, &mut ctx, &state).await {
                                    if send_message(&mut sender, &response).await.is_err() {
                                        break;
                                    }
                                }
                                if !was_authenticated && ctx.role.is_some() {
                                    if let Some(session_id) = ctx.session_id.clone() {
                                        subscribe_after_handshake(&state, &session_id, &mut ctx, &mut fanout_rx, &mut forwarder_handles).await;
                                    }
                                }
                            }
                            Err(err) => {
                                tracing::debug!(error = %err, "failed to parse client message");
                                let error = ServerMessage::Error { event: "parse".into(), error: crate::error::ErrorCode::InvalidSchema };
                                let _ = send_message(&mut sender, &error).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    for handle in forwarder_handles {
        handle.abort();
    }
    teardown_connection(&state, &ctx).await;
}

async fn subscribe_after_handshake(
    state: &Arc<AppState>,
    session_id: &str,
    ctx: &mut ConnContext,
    fanout_rx: &mut Option<mpsc::UnboundedReceiver<ServerMessage>>,
    forwarder_handles: &mut Vec<JoinHandle<()>>,
) {
    let Some(role) = ctx.role else { return };
    let Some(channels) = state.channels_for(session_id).await else { return };

    let broadcast_receivers = channels.channels_for_role(role);
    let unicast_rx = if role == Role::Participant {
        ctx.participant_id.clone().map(|pid| channels.register_participant(pid))
    } else {
        None
    };
    let unicast_rx = match unicast_rx {
        Some(fut) => Some(fut.await),
        None => None,
    };

    // A freshly-subscribed big screen or participant connection gets the
    // current roster (§6 `lobby_state`) right away rather than waiting for
    // the next join/kick/ban to trigger a broadcast.
    let initial = if matches!(role, Role::BigScreen | Role::Participant) {
        state.lobby_state(session_id).await.into_iter().collect()
    } else {
        Vec::new()
    };

    let (rx, handles) = spawn_forwarders(broadcast_receivers, unicast_rx, initial);
    *fanout_rx = Some(rx);
    *forwarder_handles = handles;

    state.bump_connection_count(session_id, role, 1).await;
}

async fn teardown_connection(state: &Arc<AppState>, ctx: &ConnContext) {
    let Some(session_id) = ctx.session_id.clone() else { return };
    let Some(role) = ctx.role else { return };

    if let Some(participant_id) = ctx.participant_id.clone() {
        if let Some(channels) = state.channels_for(&session_id).await {
            channels.unregister_participant(&participant_id).await;
        }
    }
    state.bump_connection_count(&session_id, role, -1).await;
}

async fn send_message(sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), msg: &ServerMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize outgoing message");
            Ok(())
        }
    }
}
