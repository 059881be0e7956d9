//! Completion notification over a webhook.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::registry::Job;
use crate::service::{JobSummary, SubtitleService};

/// POSTs a JSON summary of every job that settles
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn notify(&self, job: &Job) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&JobSummary::from(job))
            .send()
            .await?
            .error_for_status()?;

        debug!("Delivered webhook for job {}", job.id);
        Ok(())
    }

    /// Listen for settled jobs until the service's event channel closes.
    pub fn spawn(self, service: Arc<SubtitleService>) -> JoinHandle<()> {
        let mut events = service.subscribe();
        info!("Webhook notifications enabled: {}", self.url);

        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Webhook notifier missed {} job event(s)", missed);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                if !event.status.is_settled() {
                    continue;
                }

                match service.status(&event.job_id) {
                    Ok(job) => {
                        if let Err(e) = self.notify(&job).await {
                            warn!("Webhook for job {} failed: {}", job.id, e);
                        }
                    }
                    Err(e) => warn!("Webhook skipped for job {}: {}", event.job_id, e),
                }
            }
        })
    }
}
