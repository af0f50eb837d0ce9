use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, ReturnValue, TransactWriteItem};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, to_item};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::queue::{BucketKey, ClaimedEntry, QueueEntry};
use crate::repositories::errors::queue_repository_errors::QueueRepositoryError;

/// Durable FIFO buckets shared by every worker and connection process.
///
/// Popping claims an entry instead of deleting it. A claimed entry is hidden
/// from other poppers until its lease runs out, and leaves the queue only
/// through `acknowledge`, `requeue` or `remove`. An entry whose holder died
/// therefore becomes poppable again and stays visible to `list`.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Appends `entry` at the tail of `bucket`.
    async fn push_back(
        &self,
        bucket: &BucketKey,
        entry: &QueueEntry,
    ) -> Result<(), QueueRepositoryError>;

    /// Claims the oldest unclaimed entry of `bucket` without waiting. Each
    /// claim is handed to exactly one caller, even with concurrent poppers.
    async fn pop_front(
        &self,
        bucket: &BucketKey,
    ) -> Result<Option<ClaimedEntry>, QueueRepositoryError>;

    /// Waits up to `timeout` for any of `buckets` to hold an unclaimed entry
    /// and claims it. Buckets are tried in the order given.
    async fn pop_blocking(
        &self,
        buckets: &[BucketKey],
        timeout: Duration,
    ) -> Result<Option<ClaimedEntry>, QueueRepositoryError>;

    /// Deletes a claimed entry. `false` means the claim was lost: the entry
    /// was removed, or its lease ran out and someone else claimed it.
    async fn acknowledge(&self, claim: &ClaimedEntry) -> Result<bool, QueueRepositoryError>;

    /// Atomically moves a claimed entry to the tail of its bucket, unclaimed
    /// and with its original `enqueued_at`. `false` means the claim was lost.
    async fn requeue(&self, claim: &ClaimedEntry) -> Result<bool, QueueRepositoryError>;

    /// Removes the entry for `schedule_id`, claimed or not. Returns whether
    /// anything was removed; removing an absent entry is not an error.
    async fn remove(
        &self,
        bucket: &BucketKey,
        schedule_id: &str,
    ) -> Result<bool, QueueRepositoryError>;

    /// Snapshot of every entry stored in `bucket`, claimed ones included,
    /// head first.
    async fn list(&self, bucket: &BucketKey) -> Result<Vec<QueueEntry>, QueueRepositoryError>;

    /// Every bucket that has ever received an entry.
    async fn buckets(&self) -> Result<Vec<BucketKey>, QueueRepositoryError>;
}

/// Partition of the bucket registry item. `BucketKey` never starts with `#`.
const REGISTRY_KEY: &str = "#registry";

const HEAD_PAGE_SIZE: i32 = 25;

/// Stored shape of a queue entry. `position` orders the bucket and is
/// regenerated on every push, so a re-queued entry lands at the tail.
/// `claimed_until` is epoch milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct QueueItem {
    bucket: String,
    position: String,
    user_id: String,
    schedule_id: String,
    enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claim_receipt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claimed_until: Option<i64>,
}

impl QueueItem {
    fn unclaimed(bucket: &BucketKey, entry: &QueueEntry) -> Self {
        QueueItem {
            bucket: bucket.to_string(),
            position: next_position(),
            user_id: entry.user_id.clone(),
            schedule_id: entry.schedule_id.clone(),
            enqueued_at: entry.enqueued_at,
            claim_receipt: None,
            claimed_until: None,
        }
    }

    fn is_claimable(&self, now_millis: i64) -> bool {
        self.claimed_until.map_or(true, |until| until <= now_millis)
    }
}

impl From<QueueItem> for QueueEntry {
    fn from(item: QueueItem) -> Self {
        QueueEntry {
            user_id: item.user_id,
            schedule_id: item.schedule_id,
            enqueued_at: item.enqueued_at,
        }
    }
}

fn next_position() -> String {
    format!(
        "{:020}#{}",
        Utc::now().timestamp_micros(),
        Uuid::new_v4().simple()
    )
}

/// Bucket `B` is the partition `bucket = B`, sorted by `position`. Pops claim
/// an item with a conditional update that stamps a receipt and a lease, so
/// only one popper gets it until the lease runs out.
pub struct DynamoDbQueueRepository {
    pub client: Client,
    pub table_name: String,
    pub poll_interval: Duration,
    pub claim_lease: Duration,
}

impl DynamoDbQueueRepository {
    pub fn new(
        client: Client,
        table_name: &str,
        poll_interval: Duration,
        claim_lease: Duration,
    ) -> Self {
        Self {
            client,
            table_name: table_name.to_string(),
            poll_interval,
            claim_lease,
        }
    }

    async fn query_page(
        &self,
        bucket: &BucketKey,
        limit: Option<i32>,
        start_key: Option<HashMap<String, AttributeValue>>,
    ) -> Result<
        (
            Vec<HashMap<String, AttributeValue>>,
            Option<HashMap<String, AttributeValue>>,
        ),
        QueueRepositoryError,
    > {
        let page = self
            .client
            .query()
            .table_name(&self.table_name)
            .key_condition_expression("#bucket = :bucket")
            .expression_attribute_names("#bucket", "bucket")
            .expression_attribute_values(":bucket", AttributeValue::S(bucket.to_string()))
            .consistent_read(true)
            .scan_index_forward(true)
            .set_limit(limit)
            .set_exclusive_start_key(start_key)
            .send()
            .await
            .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

        Ok((page.items.unwrap_or_default(), page.last_evaluated_key))
    }

    async fn query_bucket(&self, bucket: &BucketKey) -> Result<Vec<QueueItem>, QueueRepositoryError> {
        let mut items = Vec::new();
        let mut start_key = None;

        loop {
            let (page, next) = self.query_page(bucket, None, start_key).await?;
            for item in page {
                match from_item::<QueueItem>(item) {
                    Ok(item) => items.push(item),
                    Err(e) => warn!("Skipping malformed queue item in bucket {}: {}", bucket, e),
                }
            }

            start_key = next;
            if start_key.is_none() {
                break;
            }
        }

        Ok(items)
    }

    /// Stamps a fresh receipt and lease on the item at `position` if nobody
    /// holds a live claim on it. `None` means another caller got there first.
    async fn claim(
        &self,
        bucket: &BucketKey,
        position: &str,
        now_millis: i64,
    ) -> Result<Option<ClaimedEntry>, QueueRepositoryError> {
        let receipt = Uuid::new_v4().to_string();
        let claimed_until = now_millis + self.claim_lease.as_millis() as i64;

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("bucket", AttributeValue::S(bucket.to_string()))
            .key("position", AttributeValue::S(position.to_string()))
            .update_expression("SET #receipt = :receipt, #until = :until")
            .condition_expression(
                "attribute_exists(#position) AND (attribute_not_exists(#until) OR #until <= :now)",
            )
            .expression_attribute_names("#position", "position")
            .expression_attribute_names("#receipt", "claim_receipt")
            .expression_attribute_names("#until", "claimed_until")
            .expression_attribute_values(":receipt", AttributeValue::S(receipt.clone()))
            .expression_attribute_values(":until", AttributeValue::N(claimed_until.to_string()))
            .expression_attribute_values(":now", AttributeValue::N(now_millis.to_string()))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        let attributes = match result {
            Ok(output) => output.attributes,
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if service_err.err().is_conditional_check_failed_exception() {
                        return Ok(None);
                    }
                }
                return Err(QueueRepositoryError::DynamoDb(e.to_string()));
            }
        };

        let Some(attributes) = attributes else {
            return Ok(None);
        };
        let item: QueueItem =
            from_item(attributes).map_err(|e| QueueRepositoryError::Serialization(e.to_string()))?;
        let position = item.position.clone();

        Ok(Some(ClaimedEntry {
            bucket: bucket.clone(),
            entry: item.into(),
            position,
            receipt,
        }))
    }

    /// Deletes the item at `position`, optionally only while `receipt` still
    /// holds it. Returns whether this call deleted it.
    async fn delete_at(
        &self,
        bucket: &BucketKey,
        position: &str,
        receipt: Option<&str>,
    ) -> Result<bool, QueueRepositoryError> {
        let request = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("bucket", AttributeValue::S(bucket.to_string()))
            .key("position", AttributeValue::S(position.to_string()));

        let request = match receipt {
            Some(receipt) => request
                .condition_expression("#receipt = :receipt")
                .expression_attribute_names("#receipt", "claim_receipt")
                .expression_attribute_values(":receipt", AttributeValue::S(receipt.to_string())),
            None => request
                .condition_expression("attribute_exists(#position)")
                .expression_attribute_names("#position", "position"),
        };

        match request.send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if service_err.err().is_conditional_check_failed_exception() {
                        return Ok(false);
                    }
                }
                Err(QueueRepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn register_bucket(&self, bucket: &BucketKey) -> Result<(), QueueRepositoryError> {
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key("bucket", AttributeValue::S(REGISTRY_KEY.to_string()))
            .key("position", AttributeValue::S(REGISTRY_KEY.to_string()))
            .update_expression("ADD #keys :key")
            .expression_attribute_names("#keys", "keys")
            .expression_attribute_values(":key", AttributeValue::Ss(vec![bucket.to_string()]))
            .send()
            .await
            .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl QueueRepository for DynamoDbQueueRepository {
    async fn push_back(
        &self,
        bucket: &BucketKey,
        entry: &QueueEntry,
    ) -> Result<(), QueueRepositoryError> {
        self.register_bucket(bucket).await?;

        let item = to_item(QueueItem::unclaimed(bucket, entry))
            .map_err(|e| QueueRepositoryError::Serialization(e.to_string()))?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

        debug!("Pushed schedule {} onto bucket {}", entry.schedule_id, bucket);
        Ok(())
    }

    async fn pop_front(
        &self,
        bucket: &BucketKey,
    ) -> Result<Option<ClaimedEntry>, QueueRepositoryError> {
        let now_millis = Utc::now().timestamp_millis();
        let mut start_key = None;

        // Walk the bucket a page at a time, skipping live claims.
        loop {
            let (page, next) = self
                .query_page(bucket, Some(HEAD_PAGE_SIZE), start_key)
                .await?;

            for item in page {
                let item: QueueItem = match from_item(item) {
                    Ok(item) => item,
                    Err(e) => {
                        warn!("Skipping malformed queue item in bucket {}: {}", bucket, e);
                        continue;
                    }
                };
                if !item.is_claimable(now_millis) {
                    continue;
                }
                if let Some(claim) = self.claim(bucket, &item.position, now_millis).await? {
                    return Ok(Some(claim));
                }
            }

            start_key = next;
            if start_key.is_none() {
                return Ok(None);
            }
        }
    }

    async fn pop_blocking(
        &self,
        buckets: &[BucketKey],
        timeout: Duration,
    ) -> Result<Option<ClaimedEntry>, QueueRepositoryError> {
        let deadline = Instant::now() + timeout;

        loop {
            for bucket in buckets {
                if let Some(claim) = self.pop_front(bucket).await? {
                    return Ok(Some(claim));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn acknowledge(&self, claim: &ClaimedEntry) -> Result<bool, QueueRepositoryError> {
        self.delete_at(&claim.bucket, &claim.position, Some(&claim.receipt))
            .await
    }

    async fn requeue(&self, claim: &ClaimedEntry) -> Result<bool, QueueRepositoryError> {
        let fresh = to_item(QueueItem::unclaimed(&claim.bucket, &claim.entry))
            .map_err(|e| QueueRepositoryError::Serialization(e.to_string()))?;

        let delete = Delete::builder()
            .table_name(&self.table_name)
            .key("bucket", AttributeValue::S(claim.bucket.to_string()))
            .key("position", AttributeValue::S(claim.position.clone()))
            .condition_expression("#receipt = :receipt")
            .expression_attribute_names("#receipt", "claim_receipt")
            .expression_attribute_values(":receipt", AttributeValue::S(claim.receipt.clone()))
            .build()
            .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;
        let put = Put::builder()
            .table_name(&self.table_name)
            .set_item(Some(fresh))
            .build()
            .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

        match self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().delete(delete).build())
            .transact_items(TransactWriteItem::builder().put(put).build())
            .send()
            .await
        {
            Ok(_) => {
                debug!(
                    "Re-queued schedule {} at the tail of bucket {}",
                    claim.entry.schedule_id, claim.bucket
                );
                Ok(true)
            }
            Err(e) => {
                if let Some(TransactWriteItemsError::TransactionCanceledException(_)) =
                    e.as_service_error()
                {
                    return Ok(false);
                }
                Err(QueueRepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn remove(
        &self,
        bucket: &BucketKey,
        schedule_id: &str,
    ) -> Result<bool, QueueRepositoryError> {
        let mut removed = false;

        for item in self.query_bucket(bucket).await? {
            if item.schedule_id != schedule_id {
                continue;
            }
            if self.delete_at(bucket, &item.position, None).await? {
                removed = true;
            }
        }

        Ok(removed)
    }

    async fn list(&self, bucket: &BucketKey) -> Result<Vec<QueueEntry>, QueueRepositoryError> {
        Ok(self
            .query_bucket(bucket)
            .await?
            .into_iter()
            .map(QueueEntry::from)
            .collect())
    }

    async fn buckets(&self) -> Result<Vec<BucketKey>, QueueRepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("bucket", AttributeValue::S(REGISTRY_KEY.to_string()))
            .key("position", AttributeValue::S(REGISTRY_KEY.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

        let keys = match result.item.as_ref().and_then(|item| item.get("keys")) {
            Some(AttributeValue::Ss(keys)) => keys.clone(),
            _ => Vec::new(),
        };

        let mut buckets: Vec<BucketKey> = keys
            .iter()
            .filter_map(|key| BucketKey::from_category(key))
            .collect();
        buckets.sort();
        Ok(buckets)
    }
}
