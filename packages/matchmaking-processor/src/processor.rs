use std::sync::Arc;

use shared::clock::{Clock, SystemClock};
use shared::config::MatchmakingConfig;
use shared::repositories::Repositories;
use shared::services::video_room_service::{LiveKitVideoRoom, VideoRoomProvider};

use crate::services::{MatchCommitter, MatchmakingService, TimeoutSweeper};

/// The worker loop and the timeout sweeper, wired to one set of stores.
#[derive(Clone)]
pub struct MatchmakingProcessor {
    pub service: MatchmakingService,
    pub sweeper: TimeoutSweeper,
}

impl MatchmakingProcessor {
    pub fn new(
        repositories: &Repositories,
        video_room: Arc<dyn VideoRoomProvider + Send + Sync>,
        clock: Arc<dyn Clock>,
        config: &MatchmakingConfig,
    ) -> Self {
        let committer = MatchCommitter::new(
            repositories.schedules.clone(),
            video_room,
            repositories.notifications.clone(),
            clock.clone(),
        );
        let service = MatchmakingService::new(
            repositories.queue.clone(),
            repositories.schedules.clone(),
            committer,
            config.policy.clone(),
            config.worker.clone(),
        );
        let sweeper = TimeoutSweeper::new(
            repositories.queue.clone(),
            repositories.schedules.clone(),
            repositories.notifications.clone(),
            clock,
            config.policy.clone(),
            config.worker.sweep_interval,
        );
        Self { service, sweeper }
    }

    pub fn from_config(config: &MatchmakingConfig, repositories: &Repositories) -> Self {
        Self::new(
            repositories,
            Arc::new(LiveKitVideoRoom::new(&config.video_room)),
            Arc::new(SystemClock),
            config,
        )
    }

    /// Runs both loops until the future is dropped.
    pub async fn run(&self) {
        tokio::join!(self.service.run(), self.sweeper.run());
    }
}
