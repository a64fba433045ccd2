use std::env;
use std::path::PathBuf;

/// Policy deciding when a notification message is deleted from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Delete only once every store record in the message was dispatched.
    /// Failed messages are released for redelivery (and eventually the DLQ).
    AfterDispatch,
    /// Delete every received message, even when parsing or dispatch failed.
    Always,
}

impl AckPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "after-dispatch" | "after_dispatch" | "on-success" => Some(Self::AfterDispatch),
            "always" => Some(Self::Always),
            _ => None,
        }
    }
}

/// Runtime configuration for the ingest service
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bucket receiving raw uploads and processed artifacts
    pub bucket_name: String,

    /// AWS region (default: "eu-north-1")
    pub region: String,

    /// Static access key; falls back to the default provider chain when unset
    pub access_key: Option<String>,
    pub secret_key: Option<String>,

    /// Custom endpoint for S3-compatible stores (MinIO etc.), path-style addressing
    pub s3_endpoint: Option<String>,

    /// SQS queue carrying bucket notifications. Polling is disabled without it.
    pub queue_url: Option<String>,

    /// Messages per receive call (SQS caps this at 10)
    pub queue_max_messages: i32,

    /// Long-poll wait in seconds (SQS caps this at 20)
    pub queue_wait_seconds: i32,

    pub ack_policy: AckPolicy,

    /// Idle pause between background poll cycles in seconds
    pub poll_interval_seconds: u64,

    /// Maximum conversions running at once
    pub worker_concurrency: usize,

    /// Pending jobs buffered before dispatch applies backpressure
    pub worker_queue_capacity: usize,

    /// Rows per columnar batch written during conversion
    pub conversion_batch_rows: usize,

    /// Parent directory for per-task scratch dirs (system temp dir when unset)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bucket_name: "apple-health-healthion".to_string(),
            region: "eu-north-1".to_string(),
            access_key: None,
            secret_key: None,
            s3_endpoint: None,
            queue_url: None,
            queue_max_messages: 10,
            queue_wait_seconds: 20,
            ack_policy: AckPolicy::AfterDispatch,
            poll_interval_seconds: 1,
            worker_concurrency: 4,
            worker_queue_capacity: 256,
            conversion_batch_rows: 50_000,
            scratch_dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            bucket_name: env::var("AWS_BUCKET_NAME")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.bucket_name),

            region: env::var("AWS_REGION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.region),

            access_key: non_empty_var("AWS_ACCESS_KEY"),
            secret_key: non_empty_var("AWS_SECRET_ACCESS_KEY"),
            s3_endpoint: non_empty_var("S3_ENDPOINT"),
            queue_url: non_empty_var("SQS_QUEUE_URL"),

            queue_max_messages: env::var("SQS_MAX_MESSAGES")
                .ok()
                .and_then(|v| v.parse::<i32>().ok())
                .map(|v| v.clamp(1, 10))
                .unwrap_or(default.queue_max_messages),

            queue_wait_seconds: env::var("SQS_WAIT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<i32>().ok())
                .map(|v| v.clamp(0, 20))
                .unwrap_or(default.queue_wait_seconds),

            ack_policy: env::var("SQS_ACK_POLICY")
                .ok()
                .and_then(|v| AckPolicy::parse(&v))
                .unwrap_or(default.ack_policy),

            poll_interval_seconds: env::var("POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.poll_interval_seconds),

            worker_concurrency: env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(default.worker_concurrency),

            worker_queue_capacity: env::var("WORKER_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(default.worker_queue_capacity),

            conversion_batch_rows: env::var("CONVERSION_BATCH_ROWS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(default.conversion_batch_rows),

            scratch_dir: non_empty_var("SCRATCH_DIR").map(PathBuf::from),
        }
    }

    /// Config for local runs against MinIO / LocalStack
    pub fn development() -> Self {
        Self {
            bucket_name: "healthion-dev".to_string(),
            region: "us-east-1".to_string(),
            s3_endpoint: Some("http://127.0.0.1:9000".to_string()),
            queue_wait_seconds: 1,
            worker_concurrency: 2,
            conversion_batch_rows: 1_000,
            ..Self::default()
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.bucket_name, "apple-health-healthion");
        assert_eq!(config.region, "eu-north-1");
        assert_eq!(config.queue_max_messages, 10);
        assert_eq!(config.queue_wait_seconds, 20);
        assert_eq!(config.ack_policy, AckPolicy::AfterDispatch);
        assert!(config.queue_url.is_none());
    }

    #[test]
    fn test_development_config() {
        let config = AppConfig::development();
        assert!(config.s3_endpoint.is_some());
        assert_eq!(config.worker_concurrency, 2);
    }

    #[test]
    fn test_ack_policy_parse() {
        assert_eq!(AckPolicy::parse("always"), Some(AckPolicy::Always));
        assert_eq!(
            AckPolicy::parse(" After-Dispatch "),
            Some(AckPolicy::AfterDispatch)
        );
        assert_eq!(AckPolicy::parse("sometimes"), None);
    }

    #[test]
    fn test_from_env_clamps_queue_limits() {
        unsafe {
            env::set_var("SQS_MAX_MESSAGES", "50");
            env::set_var("SQS_WAIT_SECONDS", "-3");
        }
        let config = AppConfig::from_env();
        unsafe {
            env::remove_var("SQS_MAX_MESSAGES");
            env::remove_var("SQS_WAIT_SECONDS");
        }
        assert_eq!(config.queue_max_messages, 10);
        assert_eq!(config.queue_wait_seconds, 0);
    }
}
