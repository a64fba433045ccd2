use aws_config::SdkConfig;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::services::queue::SqsNotificationQueue;

/// `None` when no queue URL is configured; polling is then unavailable
pub fn setup_queue(config: &AppConfig, sdk: &SdkConfig) -> Option<Arc<SqsNotificationQueue>> {
    let Some(queue_url) = config.queue_url.clone() else {
        warn!("📭 SQS_QUEUE_URL not set, notification polling disabled");
        return None;
    };

    info!("📬 SQS queue: {}", queue_url);
    let client = aws_sdk_sqs::Client::new(sdk);
    Some(Arc::new(SqsNotificationQueue::new(client, queue_url)))
}
