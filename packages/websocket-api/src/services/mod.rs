pub mod errors;
pub mod queue_service;
