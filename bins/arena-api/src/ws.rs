// WebSocket push channel: forwards hub events to the client as JSON text

use crate::notify::NotificationHub;
use crate::AppState;
use arena_common::types::SessionId;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    #[serde(rename = "SID")]
    pub session_id: Option<SessionId>,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Register {
        #[serde(rename = "SID")]
        session_id: SessionId,
    },
}

/// GET / and GET /ws - upgrade to a push channel
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, hub, params.session_id))
}

async fn serve_socket(socket: WebSocket, hub: Arc<NotificationHub>, session_id: Option<SessionId>) {
    let (connection, mut events) = hub.register(session_id).await;
    let (mut sink, mut stream) = socket.split();

    let mut push = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode push event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let listen_hub = hub.clone();
    let mut listen = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => match parse_client_message(&text) {
                    Some(ClientMessage::Register { session_id }) => {
                        listen_hub.bind(connection, session_id).await;
                    }
                    None => debug!(connection_id = connection, "Ignoring unknown client message"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Either side ending closes the channel
    tokio::select! {
        _ = &mut push => listen.abort(),
        _ = &mut listen => push.abort(),
    }

    hub.unregister(connection).await;
}

fn parse_client_message(text: &str) -> Option<ClientMessage> {
    serde_json::from_str(text).ok()
}
