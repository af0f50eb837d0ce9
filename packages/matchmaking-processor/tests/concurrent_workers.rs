use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use matchmaking_processor::services::{MatchCommitter, MatchmakingService};
use proptest::prelude::*;
use shared::clock::SystemClock;
use shared::config::WorkerSettings;
use shared::models::match_record::MatchRecord;
use shared::models::policy::MatchPolicy;
use shared::models::queue::QueueEntry;
use shared::models::schedule::{InterviewMode, ScheduleRecord, ScheduleStatus};
use shared::models::video::VideoCredential;
use shared::repositories::memory::{
    InMemoryNotificationRepository, InMemoryQueueRepository, InMemoryScheduleRepository,
};
use shared::repositories::QueueRepository;
use shared::services::errors::video_room_errors::VideoRoomError;
use shared::services::video_room_service::VideoRoomProvider;

const CATEGORIES: [&str; 3] = ["Technical", "Behavioral", "System Design"];

struct StaticVideoRoom;

#[async_trait]
impl VideoRoomProvider for StaticVideoRoom {
    async fn issue_credential(
        &self,
        identity: &str,
        room_name: &str,
    ) -> Result<VideoCredential, VideoRoomError> {
        Ok(VideoCredential {
            token: format!("{}@{}", identity, room_name),
            server_url: "wss://video.test".to_string(),
        })
    }
}

struct RunResult {
    schedules: HashMap<String, ScheduleRecord>,
    matches: Vec<MatchRecord>,
    queued: Vec<QueueEntry>,
    statuses: HashMap<String, Option<ScheduleStatus>>,
}

/// `joins` is a list of (user index, category index). Every join gets its own
/// schedule. Workers race over the same in-memory stores.
fn run_workers(joins: &[(usize, usize)], workers: usize, ticks: usize) -> RunResult {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let queue = Arc::new(InMemoryQueueRepository::new());
        let schedules = Arc::new(InMemoryScheduleRepository::new());
        let mut records = HashMap::new();

        for (i, (user, category)) in joins.iter().enumerate() {
            let record = ScheduleRecord {
                schedule_id: format!("s{}", i),
                owner_user_id: format!("u{}", user),
                scheduled_time: Utc::now(),
                interview_category: CATEGORIES[*category].to_string(),
                interview_mode: InterviewMode::PeerToPeer,
                status: ScheduleStatus::Searching,
                match_id: None,
            };
            schedules.insert_schedule(record.clone());
            queue
                .push_back(
                    &record.bucket_key().unwrap(),
                    &QueueEntry::new(&record.owner_user_id, &record.schedule_id, Utc::now()),
                )
                .await
                .unwrap();
            records.insert(record.schedule_id.clone(), record);
        }

        let committer = MatchCommitter::new(
            schedules.clone(),
            Arc::new(StaticVideoRoom),
            Arc::new(InMemoryNotificationRepository::new()),
            Arc::new(SystemClock),
        );
        let settings = WorkerSettings {
            pop_timeout: Duration::from_millis(1),
            ..WorkerSettings::default()
        };
        let service = MatchmakingService::new(
            queue.clone(),
            schedules.clone(),
            committer,
            MatchPolicy::default(),
            settings,
        );

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    for _ in 0..ticks {
                        service.run_once().await.unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut queued = Vec::new();
        for bucket in queue.buckets().await.unwrap() {
            queued.extend(queue.list(&bucket).await.unwrap());
        }
        let statuses = records
            .keys()
            .map(|id| (id.clone(), schedules.status_of(id)))
            .collect();

        RunResult {
            schedules: records,
            matches: schedules.matches(),
            queued,
            statuses,
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_concurrent_workers_never_double_match(
        joins in prop::collection::vec((0usize..5, 0usize..3), 2..24),
        workers in 1usize..4,
    ) {
        let result = run_workers(&joins, workers, joins.len() * 2);

        let mut matched = HashSet::new();
        for record in &result.matches {
            prop_assert!(matched.insert(record.schedule_id_a.clone()));
            prop_assert!(matched.insert(record.schedule_id_b.clone()));
            prop_assert_ne!(&record.user_id_a, &record.user_id_b);

            let a = &result.schedules[&record.schedule_id_a];
            let b = &result.schedules[&record.schedule_id_b];
            prop_assert_eq!(a.bucket_key(), b.bucket_key());
        }

        let mut queued = HashSet::new();
        for entry in &result.queued {
            prop_assert!(queued.insert(entry.schedule_id.clone()), "entry queued twice");
            prop_assert!(!matched.contains(&entry.schedule_id));
        }

        // Every schedule is either matched exactly once or still waiting.
        prop_assert_eq!(matched.len() + queued.len(), joins.len());
        for (schedule_id, status) in &result.statuses {
            let expected = if matched.contains(schedule_id) {
                ScheduleStatus::Matched
            } else {
                ScheduleStatus::Searching
            };
            prop_assert_eq!(*status, Some(expected));
        }
    }
}
