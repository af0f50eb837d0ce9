use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::config::VideoRoomSettings;
use crate::models::video::VideoCredential;
use crate::services::errors::video_room_errors::VideoRoomError;

#[async_trait]
pub trait VideoRoomProvider: Send + Sync {
    /// Issues a credential for `identity` to join `room_name` with publish and
    /// subscribe rights.
    async fn issue_credential(
        &self,
        identity: &str,
        room_name: &str,
    ) -> Result<VideoCredential, VideoRoomError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room: String,
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub name: String,
    pub nbf: usize,
    pub exp: usize,
    pub video: VideoGrant,
}

/// Signs LiveKit access tokens locally with the API key/secret pair; no
/// network round trip is involved.
pub struct LiveKitVideoRoom {
    api_key: String,
    api_secret: String,
    server_url: String,
    ttl: Duration,
}

impl LiveKitVideoRoom {
    pub fn new(settings: &VideoRoomSettings) -> Self {
        LiveKitVideoRoom {
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            server_url: settings.server_url.clone(),
            ttl: Duration::seconds(settings.credential_ttl.as_secs() as i64),
        }
    }
}

#[async_trait]
impl VideoRoomProvider for LiveKitVideoRoom {
    async fn issue_credential(
        &self,
        identity: &str,
        room_name: &str,
    ) -> Result<VideoCredential, VideoRoomError> {
        if identity.is_empty() || room_name.is_empty() {
            return Err(VideoRoomError::ValidationError(
                "Identity and room name cannot be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let claims = AccessTokenClaims {
            iss: self.api_key.clone(),
            sub: identity.to_string(),
            name: identity.to_string(),
            nbf: now.timestamp() as usize,
            exp: (now + self.ttl).timestamp() as usize,
            video: VideoGrant {
                room: room_name.to_string(),
                room_join: true,
                can_publish: true,
                can_subscribe: true,
            },
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.api_secret.as_ref()),
        )
        .map_err(|e| VideoRoomError::SigningError(format!("{:#?}", e)))?;

        Ok(VideoCredential {
            token,
            server_url: self.server_url.clone(),
        })
    }
}
