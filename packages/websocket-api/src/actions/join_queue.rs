use shared::models::events::ClientEvent;
use tracing::{debug, error};

use crate::{middleware::auth::CallerIdentity, registry::ConnectionHandle, state::AppState};

pub async fn handle_join_queue(
    state: &AppState,
    caller: &CallerIdentity,
    connection: &ConnectionHandle,
    schedule_id: &str,
) {
    match state
        .queue_service
        .join_queue(&caller.user_id, schedule_id, connection)
        .await
    {
        // `accepted` was already sent on the connection by the service.
        Ok(()) => debug!("User {} is searching with {}", caller.user_id, schedule_id),
        Err(e) => {
            error!(
                "Failed to join queue for user {} with schedule {}: {}",
                caller.user_id, schedule_id, e
            );
            connection.send(ClientEvent::error(e.to_string()));
        }
    }
}
