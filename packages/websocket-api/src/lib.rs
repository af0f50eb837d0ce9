use axum::{
    routing::{get, post},
    Router,
};

pub mod actions;
pub mod dispatcher;
pub mod error;
pub mod middleware;
pub mod registry;
pub mod routes;
pub mod services;
pub mod state;

use state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/ws", get(routes::websocket::ws_handler))
        .route("/queue/cancel", post(routes::queue::cancel_queue))
        .route("/queue/{schedule_id}/status", get(routes::queue::queue_status))
        .route(
            "/queue/{schedule_id}/credential",
            post(routes::queue::reissue_credential),
        )
        .with_state(state)
}
