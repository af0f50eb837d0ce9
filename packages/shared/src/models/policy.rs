use chrono::{DateTime, Duration, Utc};

/// Timing policy shared by the join handler, the worker and the sweeper.
#[derive(Debug, Clone)]
pub struct MatchPolicy {
    /// Largest allowed gap between two partners' scheduled times.
    pub match_window: Duration,
    /// How long an entry may wait in its bucket before it is cancelled.
    pub wait_budget: Duration,
    /// How early before `scheduled_time` a user may start searching.
    pub join_early: Duration,
    /// How late after `scheduled_time` a user may still start searching.
    pub join_late: Duration,
    /// Disables both time-window checks. Intended for test environments.
    pub skip_time_window_check: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            match_window: Duration::minutes(2),
            wait_budget: Duration::seconds(120),
            join_early: Duration::minutes(2),
            join_late: Duration::minutes(5),
            skip_time_window_check: false,
        }
    }
}

impl MatchPolicy {
    pub fn within_join_window(&self, scheduled_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.skip_time_window_check {
            return true;
        }
        now >= scheduled_time - self.join_early && now <= scheduled_time + self.join_late
    }

    pub fn within_match_window(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        if self.skip_time_window_check {
            return true;
        }
        (a - b).abs() <= self.match_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(-121, false)]
    #[case(-120, true)]
    #[case(0, true)]
    #[case(300, true)]
    #[case(301, false)]
    fn test_join_window_bounds(#[case] offset_secs: i64, #[case] expected: bool) {
        let policy = MatchPolicy::default();
        let scheduled = Utc::now();
        let now = scheduled + Duration::seconds(offset_secs);

        assert_eq!(policy.within_join_window(scheduled, now), expected);
    }

    #[rstest]
    #[case(0, true)]
    #[case(60, true)]
    #[case(-120, true)]
    #[case(121, false)]
    fn test_match_window_is_symmetric(#[case] gap_secs: i64, #[case] expected: bool) {
        let policy = MatchPolicy::default();
        let a = Utc::now();
        let b = a + Duration::seconds(gap_secs);

        assert_eq!(policy.within_match_window(a, b), expected);
        assert_eq!(policy.within_match_window(b, a), expected);
    }

    #[test]
    fn test_bypass_flag_disables_time_checks() {
        let policy = MatchPolicy {
            skip_time_window_check: true,
            ..MatchPolicy::default()
        };
        let scheduled = Utc::now();

        assert!(policy.within_join_window(scheduled, scheduled + Duration::days(3)));
        assert!(policy.within_match_window(scheduled, scheduled - Duration::hours(5)));
    }
}
