use serde::{Deserialize, Serialize};

/// A joinable credential for one identity in one video room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCredential {
    pub token: String,
    pub server_url: String,
}
