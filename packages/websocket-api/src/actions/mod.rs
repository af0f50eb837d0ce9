use serde::Deserialize;
use shared::models::events::ClientEvent;
use tracing::debug;

use crate::{middleware::auth::CallerIdentity, registry::ConnectionHandle, state::AppState};

pub mod cancel_queue;
pub mod disconnect;
pub mod join_queue;

/// Inbound WebSocket message, routed on its `action` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    JoinQueue { schedule_id: String },
    CancelQueue { schedule_id: String },
    Ping,
}

pub async fn handle_message(
    state: &AppState,
    caller: &CallerIdentity,
    connection: &ConnectionHandle,
    body: &str,
) {
    let action = match serde_json::from_str::<ClientAction>(body) {
        Ok(action) => action,
        Err(e) => {
            debug!(
                "Rejecting message on connection {}: {}",
                connection.connection_id, e
            );
            connection.send(ClientEvent::error(format!("Invalid message: {}", e)));
            return;
        }
    };

    match action {
        ClientAction::JoinQueue { schedule_id } => {
            join_queue::handle_join_queue(state, caller, connection, &schedule_id).await
        }
        ClientAction::CancelQueue { schedule_id } => {
            cancel_queue::handle_cancel_queue(state, caller, connection, &schedule_id).await
        }
        ClientAction::Ping => {
            connection.send(ClientEvent::Pong);
        }
    }
}
