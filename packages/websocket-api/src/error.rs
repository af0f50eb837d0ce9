use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::services::errors::queue_service_errors::QueueServiceError;

#[derive(Debug)]
pub enum ApiError {
    QueueService(QueueServiceError),
    Unauthorized,
}

impl From<QueueServiceError> for ApiError {
    fn from(error: QueueServiceError) -> Self {
        ApiError::QueueService(error)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::QueueService(QueueServiceError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::QueueService(QueueServiceError::InvalidState(_)) => StatusCode::CONFLICT,
            ApiError::QueueService(QueueServiceError::Downstream(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::QueueService(e) => e.to_string(),
            ApiError::Unauthorized => "Missing caller identity".to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(QueueServiceError::NotFound, StatusCode::NOT_FOUND)]
    #[case(QueueServiceError::InvalidState("matched".to_string()), StatusCode::CONFLICT)]
    #[case(QueueServiceError::Downstream("timeout".to_string()), StatusCode::SERVICE_UNAVAILABLE)]
    fn test_queue_errors_map_to_status(
        #[case] error: QueueServiceError,
        #[case] expected: StatusCode,
    ) {
        assert_eq!(ApiError::from(error).into_response().status(), expected);
    }

    #[test]
    fn test_unauthorized() {
        assert_eq!(
            ApiError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
