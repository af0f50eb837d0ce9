use shared::models::events::ClientEvent;
use tracing::error;

use crate::{middleware::auth::CallerIdentity, registry::ConnectionHandle, state::AppState};

/// On success the `cancelled` event reaches the client through its registry
/// entry; only refusals are answered here.
pub async fn handle_cancel_queue(
    state: &AppState,
    caller: &CallerIdentity,
    connection: &ConnectionHandle,
    schedule_id: &str,
) {
    match state
        .queue_service
        .cancel_queue(&caller.user_id, schedule_id)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            connection.send(ClientEvent::error(format!(
                "Schedule {} is not searching",
                schedule_id
            )));
        }
        Err(e) => {
            error!(
                "Failed to cancel schedule {} for user {}: {}",
                schedule_id, caller.user_id, e
            );
            connection.send(ClientEvent::error(e.to_string()));
        }
    }
}
