use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::time::timeout;

use crate::{
    config::models::{HealthStatus, ServiceEntry},
    core::registry::ServiceRegistry,
    metrics,
    ports::http_client::HttpClient,
};

/// Probes every registered service on demand.
///
/// There is no background loop: each `GET /health` fans out one probe per service
/// and waits for all of them.
pub struct HealthChecker {
    registry: Arc<ServiceRegistry>,
    http_client: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        http_client: Arc<dyn HttpClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            http_client,
            timeout,
        }
    }

    /// Status of every service, in registration order. Probes run concurrently and
    /// each is bounded by the configured timeout; one failure never affects another.
    pub async fn check_all(&self) -> Vec<(String, HealthStatus)> {
        let probes = self
            .registry
            .entries()
            .iter()
            .map(|entry| self.check_service(entry));

        join_all(probes).await
    }

    async fn check_service(&self, entry: &ServiceEntry) -> (String, HealthStatus) {
        let url = format!(
            "{}{}",
            entry.base_url.trim_end_matches('/'),
            entry.health_path
        );

        let probe = self.http_client.health_check(&url, self.timeout);
        let healthy = match timeout(self.timeout, probe).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(err)) => {
                tracing::warn!("Health check failed for service {}: {}", entry.name, err);
                false
            }
            Err(_) => {
                tracing::warn!(
                    "Health check for service {} exceeded {:?}",
                    entry.name,
                    self.timeout
                );
                false
            }
        };

        metrics::set_service_health_status(&entry.name, healthy);

        let status = if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        tracing::debug!(service = %entry.name, %url, %status, "Health probe finished");
        (entry.name.clone(), status)
    }
}
