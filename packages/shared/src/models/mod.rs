pub mod events;
pub mod match_record;
pub mod policy;
pub mod queue;
pub mod schedule;
pub mod video;
