#![allow(dead_code)]

use async_trait::async_trait;
use aws_credential_types::Credentials;
use chrono::Utc;
use healthion_ingest::services::dispatcher::{DispatchError, TaskDispatcher};
use healthion_ingest::services::post_policy::{
    GrantConditions, PostPolicySigner, PresignedPost,
};
use healthion_ingest::services::queue::{NotificationQueue, QueueError, QueueMessage};
use healthion_ingest::services::storage::{
    ObjectMetadata, ObjectStore, StorageError, StorageResult,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

pub const BUCKET: &str = "apple-health-healthion";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Reachable,
    Missing,
    Denied,
}

pub struct MockObjectStore {
    pub bucket_state: Mutex<BucketState>,
    pub objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    pub fail_uploads: Mutex<bool>,
    /// Keys whose upload fails while others succeed
    pub fail_upload_keys: Mutex<Vec<String>>,
    signer: PostPolicySigner,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self {
            bucket_state: Mutex::new(BucketState::Reachable),
            objects: Mutex::new(HashMap::new()),
            fail_uploads: Mutex::new(false),
            fail_upload_keys: Mutex::new(Vec::new()),
            signer: PostPolicySigner::new("eu-north-1", None),
        }
    }

    pub fn put(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    fn bucket(&self) -> &str {
        BUCKET
    }

    async fn check_bucket(&self) -> StorageResult<()> {
        match *self.bucket_state.lock().unwrap() {
            BucketState::Reachable => Ok(()),
            BucketState::Missing => Err(StorageError::BucketNotFound(BUCKET.to_string())),
            BucketState::Denied => Err(StorageError::BucketAccessDenied(BUCKET.to_string())),
        }
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectMetadata> {
        let data = self
            .get(BUCKET, key)
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;
        Ok(ObjectMetadata {
            size: data.len() as i64,
            content_type: Some("application/xml".to_string()),
            last_modified: Some(Utc::now()),
        })
    }

    async fn presign_post(
        &self,
        key: &str,
        conditions: &GrantConditions,
    ) -> StorageResult<PresignedPost> {
        let creds = Credentials::new("AKIDEXAMPLE", "secret", None, None, "test");
        Ok(self.signer.sign(&creds, BUCKET, key, conditions, Utc::now()))
    }

    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64> {
        let data = self
            .get(bucket, key)
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;
        tokio::fs::write(dest, &data).await?;
        Ok(data.len() as u64)
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        _content_type: &str,
    ) -> StorageResult<()> {
        let rejected = self.fail_upload_keys.lock().unwrap().iter().any(|k| k == key);
        if rejected || *self.fail_uploads.lock().unwrap() {
            return Err(StorageError::Backend {
                code: "InternalError".to_string(),
            });
        }
        let data = tokio::fs::read(src).await?;
        self.put(bucket, key, data);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockQueue {
    pub pending: Mutex<Vec<QueueMessage>>,
    pub acknowledged: Mutex<Vec<String>>,
    pub released: Mutex<Vec<String>>,
}

impl MockQueue {
    pub fn with_bodies(bodies: &[&str]) -> Self {
        let queue = Self::default();
        {
            let mut pending = queue.pending.lock().unwrap();
            for (i, body) in bodies.iter().enumerate() {
                pending.push(QueueMessage {
                    message_id: format!("msg-{}", i),
                    receipt_handle: format!("rh-{}", i),
                    body: body.to_string(),
                });
            }
        }
        queue
    }
}

#[async_trait]
impl NotificationQueue for MockQueue {
    async fn receive(
        &self,
        max_messages: i32,
        _wait_seconds: i32,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut pending = self.pending.lock().unwrap();
        let n = pending.len().min(max_messages.max(0) as usize);
        Ok(pending.drain(..n).collect())
    }

    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.acknowledged
            .lock()
            .unwrap()
            .push(receipt_handle.to_string());
        Ok(())
    }

    async fn release(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.released.lock().unwrap().push(receipt_handle.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDispatcher {
    pub dispatched: Mutex<Vec<(String, String)>>,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl TaskDispatcher for MockDispatcher {
    async fn dispatch(&self, bucket: &str, key: &str) -> Result<Uuid, DispatchError> {
        if *self.fail.lock().unwrap() {
            return Err(DispatchError::Rejected("queue full".to_string()));
        }
        self.dispatched
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));
        Ok(Uuid::new_v4())
    }
}

pub fn s3_event(bucket: &str, key: &str) -> String {
    serde_json::json!({
        "Records": [{
            "eventVersion": "2.1",
            "eventSource": "aws:s3",
            "eventName": "ObjectCreated:Post",
            "s3": {
                "bucket": { "name": bucket },
                "object": { "key": key, "size": 1024 }
            }
        }]
    })
    .to_string()
}

pub const SAMPLE_EXPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<HealthData locale="en_US">
 <Record type="HKQuantityTypeIdentifierStepCount" sourceName="Watch" sourceVersion="10.1" unit="count" creationDate="2024-03-01 09:00:00 +0100" startDate="2024-03-01 08:00:00 +0100" endDate="2024-03-01 08:30:00 +0100" value="412"/>
 <Record type="HKQuantityTypeIdentifierHeartRate" sourceName="Watch" unit="count/min" creationDate="2024-03-01 09:00:00 +0100" startDate="2024-03-01 08:10:00 +0100" endDate="2024-03-01 08:10:00 +0100" value="72"/>
 <Workout workoutActivityType="HKWorkoutActivityTypeRunning" duration="31.5" durationUnit="min" sourceName="Watch" creationDate="2024-03-01 09:00:00 +0100" startDate="2024-03-01 08:00:00 +0100" endDate="2024-03-01 08:31:30 +0100">
  <WorkoutStatistics type="HKQuantityTypeIdentifierDistanceWalkingRunning" startDate="2024-03-01 08:00:00 +0100" endDate="2024-03-01 08:31:30 +0100" sum="5.2" unit="km"/>
 </Workout>
</HealthData>
"#;
