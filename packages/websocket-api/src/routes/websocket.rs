use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use shared::models::events::ClientEvent;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    actions, middleware::auth::CallerIdentity, registry::ConnectionHandle, state::AppState,
};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    caller: CallerIdentity,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, caller, state))
}

/// Single writer per socket: replies and fan-out events both go through the
/// connection's channel.
async fn handle_socket(mut socket: WebSocket, caller: CallerIdentity, state: AppState) {
    let (sender, mut outbound) = mpsc::unbounded_channel::<ClientEvent>();
    let connection = ConnectionHandle::new(sender);

    info!(
        "WebSocket connection {} established for {}",
        connection.connection_id, caller.user_id
    );

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = send_event(&mut socket, &event).await {
                    warn!("Failed to write to connection {}: {}", connection.connection_id, e);
                    break;
                }
            }
            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) => {
                    debug!("Message from connection {}: {}", connection.connection_id, text.as_str());
                    actions::handle_message(&state, &caller, &connection, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Connection {} errored: {}", connection.connection_id, e);
                    break;
                }
            }
        }
    }

    actions::disconnect::handle_disconnect(&state, &connection).await;
}

async fn send_event(socket: &mut WebSocket, event: &ClientEvent) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to serialize {:?}: {}", event, e);
            return Ok(());
        }
    };
    socket.send(Message::Text(payload.into())).await
}
