use std::sync::Arc;

use crate::registry::ConnectionRegistry;
use crate::services::queue_service::QueueService;

#[derive(Clone)]
pub struct AppState {
    pub queue_service: Arc<QueueService>,
    pub registry: Arc<ConnectionRegistry>,
}
