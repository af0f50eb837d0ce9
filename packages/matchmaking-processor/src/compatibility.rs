use std::fmt;

use shared::models::policy::MatchPolicy;
use shared::models::schedule::{InterviewMode, ScheduleRecord};

/// Why two searching schedules cannot be paired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incompatibility {
    SameSchedule,
    SameUser,
    CategoryMismatch,
    NotPeerToPeer,
    OutsideMatchWindow { gap_secs: i64 },
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incompatibility::SameSchedule => write!(f, "both entries reference the same schedule"),
            Incompatibility::SameUser => write!(f, "both schedules belong to the same user"),
            Incompatibility::CategoryMismatch => write!(f, "interview categories differ"),
            Incompatibility::NotPeerToPeer => write!(f, "a schedule is not peer-to-peer"),
            Incompatibility::OutsideMatchWindow { gap_secs } => {
                write!(f, "scheduled times are {}s apart", gap_secs)
            }
        }
    }
}

/// Checks whether two schedules may be paired. Categories are compared on
/// their normalized bucket key, so "System Design" and "system design" match.
pub fn check_compatibility(
    a: &ScheduleRecord,
    b: &ScheduleRecord,
    policy: &MatchPolicy,
) -> Result<(), Incompatibility> {
    if a.schedule_id == b.schedule_id {
        return Err(Incompatibility::SameSchedule);
    }

    if a.owner_user_id == b.owner_user_id {
        return Err(Incompatibility::SameUser);
    }

    match (a.bucket_key(), b.bucket_key()) {
        (Some(left), Some(right)) if left == right => {}
        _ => return Err(Incompatibility::CategoryMismatch),
    }

    if a.interview_mode != InterviewMode::PeerToPeer || b.interview_mode != InterviewMode::PeerToPeer
    {
        return Err(Incompatibility::NotPeerToPeer);
    }

    if !policy.within_match_window(a.scheduled_time, b.scheduled_time) {
        return Err(Incompatibility::OutsideMatchWindow {
            gap_secs: (a.scheduled_time - b.scheduled_time).num_seconds().abs(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rstest::rstest;
    use shared::models::schedule::ScheduleStatus;

    fn schedule(id: &str, user: &str, category: &str, offset_secs: i64) -> ScheduleRecord {
        ScheduleRecord {
            schedule_id: id.to_string(),
            owner_user_id: user.to_string(),
            scheduled_time: Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
            interview_category: category.to_string(),
            interview_mode: InterviewMode::PeerToPeer,
            status: ScheduleStatus::Searching,
            match_id: None,
        }
    }

    #[test]
    fn test_compatible_pair() {
        let a = schedule("s1", "alice", "Technical", 0);
        let b = schedule("s2", "bob", "technical", 90);

        assert_eq!(check_compatibility(&a, &b, &MatchPolicy::default()), Ok(()));
        assert_eq!(check_compatibility(&b, &a, &MatchPolicy::default()), Ok(()));
    }

    #[test]
    fn test_same_user_is_never_compatible() {
        let a = schedule("s1", "alice", "Technical", 0);
        let b = schedule("s2", "alice", "Technical", 0);

        assert_eq!(
            check_compatibility(&a, &b, &MatchPolicy::default()),
            Err(Incompatibility::SameUser)
        );
    }

    #[test]
    fn test_same_schedule_is_never_compatible() {
        let a = schedule("s1", "alice", "Technical", 0);

        assert_eq!(
            check_compatibility(&a, &a.clone(), &MatchPolicy::default()),
            Err(Incompatibility::SameSchedule)
        );
    }

    #[test]
    fn test_categories_must_match() {
        let a = schedule("s1", "alice", "Technical", 0);
        let b = schedule("s2", "bob", "Behavioral", 0);

        assert_eq!(
            check_compatibility(&a, &b, &MatchPolicy::default()),
            Err(Incompatibility::CategoryMismatch)
        );
    }

    #[test]
    fn test_both_must_be_peer_to_peer() {
        let a = schedule("s1", "alice", "Technical", 0);
        let mut b = schedule("s2", "bob", "Technical", 0);
        b.interview_mode = InterviewMode::Ai;

        assert_eq!(
            check_compatibility(&a, &b, &MatchPolicy::default()),
            Err(Incompatibility::NotPeerToPeer)
        );
    }

    #[rstest]
    #[case(120, true)]
    #[case(121, false)]
    #[case(-600, false)]
    fn test_match_window(#[case] gap_secs: i64, #[case] expected: bool) {
        let a = schedule("s1", "alice", "Technical", 0);
        let b = schedule("s2", "bob", "Technical", gap_secs);

        assert_eq!(check_compatibility(&a, &b, &MatchPolicy::default()).is_ok(), expected);
    }

    #[test]
    fn test_bypass_flag_ignores_time_gap() {
        let policy = MatchPolicy {
            skip_time_window_check: true,
            ..MatchPolicy::default()
        };
        let a = schedule("s1", "alice", "Technical", 0);
        let b = schedule("s2", "bob", "Technical", 86_400);

        assert_eq!(check_compatibility(&a, &b, &policy), Ok(()));
    }
}
