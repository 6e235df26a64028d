use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Publisher;
use crate::error::Result;
use crate::naming::REGISTRATION_TOPIC;

/// Announces the module on the discovery topic.
pub struct Registration {
    module: String,
    publisher: Arc<dyn Publisher>,
    interval: Option<Duration>,
}

impl Registration {
    pub fn new(module: &str, publisher: Arc<dyn Publisher>, interval: Option<Duration>) -> Self {
        Self {
            module: module.to_string(),
            publisher,
            interval,
        }
    }

    /// Publish the current UTC timestamp keyed by module name.
    pub async fn register(&self) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.publisher
            .publish(REGISTRATION_TOPIC, &self.module, now.clone().into_bytes())
            .await?;
        info!(module = %self.module, at = %now, "Module registered");
        Ok(())
    }

    /// Register once, then again on every interval tick until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.register().await?;

        let Some(period) = self.interval else {
            return Ok(());
        };
        let mut interval = tokio::time::interval(period);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = interval.tick() => self.register().await?,
            }
        }
    }
}
