use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, to_item};
use tracing::{info, warn};

use crate::models::match_record::MatchRecord;
use crate::models::schedule::{ScheduleRecord, ScheduleStatus};
use crate::repositories::errors::schedule_repository_errors::ScheduleRepositoryError;

/// Scheduling records and match records, owned by the scheduling service.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn get_schedule(&self, schedule_id: &str)
        -> Result<ScheduleRecord, ScheduleRepositoryError>;

    /// Moves `schedule_id` from `expected` to `next`. Returns `false` when the
    /// current status is not `expected` (or the schedule does not exist).
    async fn compare_and_swap_status(
        &self,
        schedule_id: &str,
        expected: ScheduleStatus,
        next: ScheduleStatus,
    ) -> Result<bool, ScheduleRepositoryError>;

    /// Creates the match record and moves both schedules
    /// `searching -> matched` as one all-or-nothing write. Fails with
    /// `Conflict`, writing nothing, when either schedule has left `searching`.
    async fn create_match(
        &self,
        a: &ScheduleRecord,
        b: &ScheduleRecord,
        room_name: &str,
        session_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<MatchRecord, ScheduleRepositoryError>;

    async fn get_match(&self, match_id: &str) -> Result<MatchRecord, ScheduleRepositoryError>;
}

pub struct DynamoDbScheduleRepository {
    pub client: Client,
    pub schedules_table: String,
    pub matches_table: String,
}

impl DynamoDbScheduleRepository {
    pub fn new(client: Client, schedules_table: &str, matches_table: &str) -> Self {
        Self {
            client,
            schedules_table: schedules_table.to_string(),
            matches_table: matches_table.to_string(),
        }
    }

    fn build_mark_matched_item(
        &self,
        schedule_id: &str,
        match_id: &str,
    ) -> Result<TransactWriteItem, ScheduleRepositoryError> {
        let update = Update::builder()
            .table_name(&self.schedules_table)
            .key("schedule_id", AttributeValue::S(schedule_id.to_string()))
            .update_expression("SET #status = :matched, match_id = :match_id")
            .condition_expression("#status = :searching")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(
                ":matched",
                AttributeValue::S(ScheduleStatus::Matched.as_str().to_string()),
            )
            .expression_attribute_values(
                ":searching",
                AttributeValue::S(ScheduleStatus::Searching.as_str().to_string()),
            )
            .expression_attribute_values(":match_id", AttributeValue::S(match_id.to_string()))
            .build()
            .map_err(|e| ScheduleRepositoryError::DynamoDb(e.to_string()))?;

        Ok(TransactWriteItem::builder().update(update).build())
    }

    fn build_create_match_item(
        &self,
        record: &MatchRecord,
    ) -> Result<TransactWriteItem, ScheduleRepositoryError> {
        let item =
            to_item(record).map_err(|e| ScheduleRepositoryError::Serialization(e.to_string()))?;

        let put = Put::builder()
            .table_name(&self.matches_table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(match_id)")
            .build()
            .map_err(|e| ScheduleRepositoryError::DynamoDb(e.to_string()))?;

        Ok(TransactWriteItem::builder().put(put).build())
    }
}

#[async_trait]
impl ScheduleRepository for DynamoDbScheduleRepository {
    async fn get_schedule(
        &self,
        schedule_id: &str,
    ) -> Result<ScheduleRecord, ScheduleRepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.schedules_table)
            .key("schedule_id", AttributeValue::S(schedule_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| ScheduleRepositoryError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => {
                from_item(item).map_err(|e| ScheduleRepositoryError::Serialization(e.to_string()))
            }
            None => Err(ScheduleRepositoryError::NotFound),
        }
    }

    async fn compare_and_swap_status(
        &self,
        schedule_id: &str,
        expected: ScheduleStatus,
        next: ScheduleStatus,
    ) -> Result<bool, ScheduleRepositoryError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.schedules_table)
            .key("schedule_id", AttributeValue::S(schedule_id.to_string()))
            .update_expression("SET #status = :next")
            .condition_expression("#status = :expected")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":next", AttributeValue::S(next.as_str().to_string()))
            .expression_attribute_values(
                ":expected",
                AttributeValue::S(expected.as_str().to_string()),
            )
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if service_err.err().is_conditional_check_failed_exception() {
                        return Ok(false);
                    }
                }
                Err(ScheduleRepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn create_match(
        &self,
        a: &ScheduleRecord,
        b: &ScheduleRecord,
        room_name: &str,
        session_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<MatchRecord, ScheduleRepositoryError> {
        let record = MatchRecord::new(a, b, room_name, session_id, created_at);

        let transact_items = vec![
            self.build_create_match_item(&record)?,
            self.build_mark_matched_item(&a.schedule_id, &record.match_id)?,
            self.build_mark_matched_item(&b.schedule_id, &record.match_id)?,
        ];

        match self
            .client
            .transact_write_items()
            .set_transact_items(Some(transact_items))
            .send()
            .await
        {
            Ok(_) => {
                info!(
                    "Created match {} for schedules {} and {}",
                    record.match_id, a.schedule_id, b.schedule_id
                );
                Ok(record)
            }
            Err(e) => {
                if let Some(service_error) = e.as_service_error() {
                    if matches!(
                        service_error,
                        TransactWriteItemsError::TransactionCanceledException(_)
                    ) {
                        warn!(
                            "Match transaction cancelled for schedules {} and {}",
                            a.schedule_id, b.schedule_id
                        );
                        return Err(ScheduleRepositoryError::Conflict);
                    }
                }
                Err(ScheduleRepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn get_match(&self, match_id: &str) -> Result<MatchRecord, ScheduleRepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.matches_table)
            .key("match_id", AttributeValue::S(match_id.to_string()))
            .send()
            .await
            .map_err(|e| ScheduleRepositoryError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => {
                from_item(item).map_err(|e| ScheduleRepositoryError::Serialization(e.to_string()))
            }
            None => Err(ScheduleRepositoryError::NotFound),
        }
    }
}
