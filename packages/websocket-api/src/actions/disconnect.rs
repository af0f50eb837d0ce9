use tracing::info;

use crate::{registry::ConnectionHandle, state::AppState};

pub async fn handle_disconnect(state: &AppState, connection: &ConnectionHandle) {
    let cancelled = state
        .queue_service
        .disconnect(&connection.connection_id)
        .await;

    info!(
        "WebSocket connection {} closed; cancelled {} search(es)",
        connection.connection_id,
        cancelled.len()
    );
}
