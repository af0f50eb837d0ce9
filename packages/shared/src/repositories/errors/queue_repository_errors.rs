#[derive(Debug)]
pub enum QueueRepositoryError {
    Serialization(String),
    DynamoDb(String),
}

impl std::fmt::Display for QueueRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueRepositoryError::Serialization(msg) => {
                write!(f, "Queue entry serialization error: {}", msg)
            }
            QueueRepositoryError::DynamoDb(msg) => write!(f, "Queue store error: {}", msg),
        }
    }
}

impl std::error::Error for QueueRepositoryError {}
