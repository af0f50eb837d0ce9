use std::fmt;

#[derive(Debug)]
pub enum VideoRoomError {
    ValidationError(String),
    SigningError(String),
    Unavailable(String),
}

impl fmt::Display for VideoRoomError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VideoRoomError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            VideoRoomError::SigningError(msg) => write!(f, "Credential signing error: {}", msg),
            VideoRoomError::Unavailable(msg) => write!(f, "Video room unavailable: {}", msg),
        }
    }
}

impl std::error::Error for VideoRoomError {}
