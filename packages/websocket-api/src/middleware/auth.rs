use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use serde::Deserialize;

use crate::{error::ApiError, state::AppState};

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)]
struct IdentityQuery {
    user_id: Option<String>,
}

/// The authenticated caller. Authentication happens upstream; this reads the
/// user id it forwards in the `x-user-id` header, or the `user_id` query
/// parameter for browser WebSocket clients that cannot set headers.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: String,
}

impl FromRequestParts<AppState> for CallerIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let user_id = match from_header {
            Some(user_id) => Some(user_id),
            None => Query::<IdentityQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(query)| query.user_id),
        };

        match user_id {
            Some(user_id) if !user_id.trim().is_empty() => Ok(CallerIdentity {
                user_id: user_id.trim().to_string(),
            }),
            _ => Err(ApiError::Unauthorized),
        }
    }
}
