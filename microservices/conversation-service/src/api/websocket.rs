//! WebSocket handler for realtime events
//!
//! A socket authenticates once with `?token=` and then receives the realtime events
//! of every conversation its actor is an active member of.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use huddle_conversation::{ReadOutcome, ReadTarget, RealtimeEvent};
use huddle_core::Actor;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::handlers::MarkReadCommand;
use crate::infrastructure::RealtimeDelivery;

#[derive(Debug, Deserialize)]
pub struct WsAuth {
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(auth): Query<WsAuth>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.identity.verify_actor(&auth.token).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, actor)))
}

/// Server-to-client WebSocket messages
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    Connected { user_id: Uuid },
    Event { event: RealtimeEvent },
    ReadAck { conversation_id: Uuid, outcome: ReadOutcome },
    Pong,
    Error { code: String, message: String },
}

/// Client-to-server WebSocket messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Typing { conversation_id: Uuid, is_typing: bool },
    MarkRead { conversation_id: Uuid, target: ReadTarget },
    Ping,
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, actor: Actor) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.dispatcher.events().subscribe_realtime();
    state.metrics.ws_sessions.inc();
    info!(user_id = %actor.user_id, "WebSocket session opened");

    let welcome = WsMessage::Connected {
        user_id: actor.user_id,
    };
    if let Ok(json) = serde_json::to_string(&welcome) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    loop {
        let outbound = tokio::select! {
            event = events.recv() => match event {
                Ok(delivery) => {
                    if !should_forward(actor, &delivery) {
                        continue;
                    }
                    WsMessage::Event { event: delivery.event.clone() }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user_id = %actor.user_id, skipped, "WebSocket subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => match handle_client_message(&state, actor, msg).await {
                            Some(reply) => reply,
                            None => continue,
                        },
                        Err(e) => WsMessage::Error {
                            code: "VALIDATION_ERROR".to_string(),
                            message: e.to_string(),
                        },
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };

        match serde_json::to_string(&outbound) {
            Ok(json) => {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => debug!(error = %e, "Failed to encode WebSocket message"),
        }
    }

    state.metrics.ws_sessions.dec();
    info!(user_id = %actor.user_id, "WebSocket session closed");
}

/// Members see their conversations' events, minus their own typing echo
fn should_forward(actor: Actor, delivery: &RealtimeDelivery) -> bool {
    let own_typing = matches!(delivery.event, RealtimeEvent::TypingChanged { .. })
        && delivery.event.user_id() == actor.user_id;
    !own_typing && delivery.reaches(actor.user_id)
}

async fn handle_client_message(state: &AppState, actor: Actor, msg: ClientMessage) -> Option<WsMessage> {
    let result = match msg {
        ClientMessage::Typing {
            conversation_id,
            is_typing,
        } => state
            .dispatcher
            .set_typing(actor, conversation_id, is_typing)
            .await
            .map(|_| None),
        ClientMessage::MarkRead {
            conversation_id,
            target,
        } => state
            .dispatcher
            .mark_read(MarkReadCommand {
                conversation_id,
                reader: actor,
                target,
                idempotency_key: None,
            })
            .await
            .map(|outcome| {
                Some(WsMessage::ReadAck {
                    conversation_id,
                    outcome,
                })
            }),
        ClientMessage::Ping => Ok(Some(WsMessage::Pong)),
    };

    result.unwrap_or_else(|e| {
        Some(WsMessage::Error {
            code: e.error_code().to_string(),
            message: e.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_parse() {
        let conversation_id = Uuid::new_v4();
        let typing: ClientMessage = serde_json::from_value(serde_json::json!({
            "type": "typing",
            "conversation_id": conversation_id,
            "is_typing": true,
        }))
        .unwrap();
        assert!(matches!(typing, ClientMessage::Typing { is_typing: true, .. }));

        let read: ClientMessage = serde_json::from_value(serde_json::json!({
            "type": "mark_read",
            "conversation_id": conversation_id,
            "target": {"mode": "all"},
        }))
        .unwrap();
        assert!(matches!(read, ClientMessage::MarkRead { target: ReadTarget::All, .. }));
    }

    #[test]
    fn test_forwarding_uses_published_audience() {
        let (conversation_id, me, peer) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let actor = Actor::user(me);

        let peer_typing = RealtimeDelivery::new(
            RealtimeEvent::typing(conversation_id, peer, true),
            vec![me, peer],
        );
        assert!(should_forward(actor, &peer_typing));

        let own_typing = RealtimeDelivery::new(
            RealtimeEvent::typing(conversation_id, me, true),
            vec![me, peer],
        );
        assert!(!should_forward(actor, &own_typing));

        let elsewhere = RealtimeDelivery::new(
            RealtimeEvent::typing(Uuid::new_v4(), peer, true),
            vec![peer],
        );
        assert!(!should_forward(actor, &elsewhere));
    }

    #[test]
    fn test_event_envelope() {
        let event = RealtimeEvent::typing(Uuid::new_v4(), Uuid::new_v4(), true);
        let json = serde_json::to_value(WsMessage::Event { event }).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"]["type"], "typing.changed");
        assert_eq!(json["event"]["payload"]["is_typing"], true);
    }
}
