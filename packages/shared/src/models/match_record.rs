use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::schedule::ScheduleRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Active,
    Completed,
}

/// One successful pairing. Created exactly once, together with the
/// `searching -> matched` transition of both schedules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub schedule_id_a: String,
    pub schedule_id_b: String,
    pub user_id_a: String,
    pub user_id_b: String,
    pub category: String,
    pub room_name: String,
    pub session_id: String,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn new(
        a: &ScheduleRecord,
        b: &ScheduleRecord,
        room_name: &str,
        session_id: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        MatchRecord {
            match_id: Uuid::new_v4().to_string(),
            schedule_id_a: a.schedule_id.clone(),
            schedule_id_b: b.schedule_id.clone(),
            user_id_a: a.owner_user_id.clone(),
            user_id_b: b.owner_user_id.clone(),
            category: a.interview_category.clone(),
            room_name: room_name.to_string(),
            session_id: session_id.to_string(),
            status: MatchStatus::Active,
            created_at,
        }
    }

    pub fn references_schedule(&self, schedule_id: &str) -> bool {
        self.schedule_id_a == schedule_id || self.schedule_id_b == schedule_id
    }
}
