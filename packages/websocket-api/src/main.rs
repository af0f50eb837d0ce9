use std::sync::Arc;

use matchmaking_processor::processor::MatchmakingProcessor;
use shared::clock::{Clock, SystemClock};
use shared::config::MatchmakingConfig;
use shared::repositories::Repositories;
use shared::services::video_room_service::{LiveKitVideoRoom, VideoRoomProvider};
use shared::telemetry::init_tracing;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use websocket_api::dispatcher::NotificationDispatcher;
use websocket_api::registry::ConnectionRegistry;
use websocket_api::services::queue_service::QueueService;
use websocket_api::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = MatchmakingConfig::from_env()?;
    let repositories = Repositories::connect(&config).await;
    let video_room: Arc<dyn VideoRoomProvider + Send + Sync> =
        Arc::new(LiveKitVideoRoom::new(&config.video_room));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let registry = Arc::new(ConnectionRegistry::new());
    let queue_service = Arc::new(QueueService::new(
        &repositories,
        registry.clone(),
        video_room.clone(),
        clock.clone(),
        config.policy.clone(),
    ));

    // Subscribe before anything can publish.
    let dispatcher =
        NotificationDispatcher::new(registry.clone(), repositories.notifications.subscribe());
    tokio::spawn(dispatcher.run());
    let _event_poller = repositories.start_event_poller();

    if config.embedded_worker {
        let processor = MatchmakingProcessor::new(&repositories, video_room, clock, &config);
        tokio::spawn(async move { processor.run().await });
        info!("Embedded matchmaking worker started");
    }

    // TODO: restrict origins once the frontend host is part of the config
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = websocket_api::app(AppState {
        queue_service,
        registry,
    })
    .layer(cors)
    .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down websocket api");
        })
        .await?;

    Ok(())
}
