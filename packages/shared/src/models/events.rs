use serde::{Deserialize, Serialize};

use crate::models::video::VideoCredential;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchParticipant {
    pub user_id: String,
    pub schedule_id: String,
    /// Absent when issuance failed after the match was committed; the client
    /// re-requests it through the credential endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<VideoCredential>,
}

/// Payload carried on the fan-out topic. A match carries both participants
/// in one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchmakingEvent {
    Matched {
        match_id: String,
        room_name: String,
        session_id: String,
        participants: Vec<MatchParticipant>,
    },
    TimedOut {
        user_id: String,
        schedule_id: String,
    },
    Cancelled {
        user_id: String,
        schedule_id: String,
    },
}

/// Message sent down a client's live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Accepted {
        schedule_id: String,
    },
    Match {
        match_id: String,
        session_id: String,
        room_name: String,
        schedule_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_url: Option<String>,
    },
    Timeout {
        schedule_id: String,
    },
    Cancelled {
        schedule_id: String,
    },
    Error {
        message: String,
    },
    Pong,
}

impl ClientEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ClientEvent::Error {
            message: message.into(),
        }
    }
}

/// One client-facing event addressed to a `(user_id, schedule_id)` holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub user_id: String,
    pub schedule_id: String,
    pub event: ClientEvent,
}

impl MatchmakingEvent {
    pub fn deliveries(&self) -> Vec<Delivery> {
        match self {
            MatchmakingEvent::Matched {
                match_id,
                room_name,
                session_id,
                participants,
            } => participants
                .iter()
                .map(|participant| Delivery {
                    user_id: participant.user_id.clone(),
                    schedule_id: participant.schedule_id.clone(),
                    event: ClientEvent::Match {
                        match_id: match_id.clone(),
                        session_id: session_id.clone(),
                        room_name: room_name.clone(),
                        schedule_id: participant.schedule_id.clone(),
                        credential: participant.credential.as_ref().map(|c| c.token.clone()),
                        server_url: participant
                            .credential
                            .as_ref()
                            .map(|c| c.server_url.clone()),
                    },
                })
                .collect(),
            MatchmakingEvent::TimedOut {
                user_id,
                schedule_id,
            } => vec![Delivery {
                user_id: user_id.clone(),
                schedule_id: schedule_id.clone(),
                event: ClientEvent::Timeout {
                    schedule_id: schedule_id.clone(),
                },
            }],
            MatchmakingEvent::Cancelled {
                user_id,
                schedule_id,
            } => vec![Delivery {
                user_id: user_id.clone(),
                schedule_id: schedule_id.clone(),
                event: ClientEvent::Cancelled {
                    schedule_id: schedule_id.clone(),
                },
            }],
        }
    }
}
