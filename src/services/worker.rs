use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

use crate::services::poller::NotificationPoller;

/// Drives the notification poller until shutdown
pub struct BackgroundWorker {
    poller: Arc<NotificationPoller>,
    idle_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        poller: Arc<NotificationPoller>,
        idle_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            poller,
            idle_interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Notification worker started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            // A long poll may block for the full wait; shutdown must not
            tokio::select! {
                _ = self.shutdown.changed() => break,
                result = self.poller.poll_once() => {
                    let pause = match result {
                        Ok(summary) if summary.total_messages > 0 => None,
                        Ok(_) => Some(self.idle_interval),
                        Err(e) => {
                            tracing::error!(error = %e, "Poll cycle failed");
                            Some(self.idle_interval.max(Duration::from_secs(5)))
                        }
                    };
                    if let Some(pause) = pause {
                        tokio::select! {
                            _ = self.shutdown.changed() => break,
                            _ = sleep(pause) => {}
                        }
                    }
                }
            }
        }

        tracing::info!("🛑 Notification worker shutting down");
    }
}
