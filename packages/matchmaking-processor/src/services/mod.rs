pub mod errors;
pub mod match_commit;
pub mod matchmaking_service;
pub mod timeout_sweeper;

pub use match_commit::MatchCommitter;
pub use matchmaking_service::{MatchmakingService, TickOutcome};
pub use timeout_sweeper::TimeoutSweeper;
