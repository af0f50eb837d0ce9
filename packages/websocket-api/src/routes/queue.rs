use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    error::ApiError,
    middleware::auth::CallerIdentity,
    services::queue_service::{CredentialResponse, QueueStatus},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CancelQueueRequest {
    pub schedule_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelQueueResponse {
    pub accepted: bool,
}

pub async fn cancel_queue(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(payload): Json<CancelQueueRequest>,
) -> Result<Json<CancelQueueResponse>, ApiError> {
    let accepted = state
        .queue_service
        .cancel_queue(&caller.user_id, &payload.schedule_id)
        .await
        .map_err(|e| {
            error!(
                "Failed to cancel schedule {} for {}: {}",
                payload.schedule_id, caller.user_id, e
            );
            ApiError::from(e)
        })?;

    debug!(
        "Cancel of schedule {} by {} accepted: {}",
        payload.schedule_id, caller.user_id, accepted
    );
    Ok(Json(CancelQueueResponse { accepted }))
}

pub async fn queue_status(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(schedule_id): Path<String>,
) -> Result<Json<QueueStatus>, ApiError> {
    let status = state
        .queue_service
        .queue_status(&caller.user_id, &schedule_id)
        .await?;
    Ok(Json(status))
}

pub async fn reissue_credential(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(schedule_id): Path<String>,
) -> Result<Json<CredentialResponse>, ApiError> {
    let credential = state
        .queue_service
        .reissue_credential(&caller.user_id, &schedule_id)
        .await
        .map_err(|e| {
            error!(
                "Failed to re-issue credential for schedule {} ({}): {}",
                schedule_id, caller.user_id, e
            );
            ApiError::from(e)
        })?;
    Ok(Json(credential))
}
