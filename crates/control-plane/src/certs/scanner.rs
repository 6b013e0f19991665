use crate::certs::{ArtifactStore, CertQueue, shutdown_requested};
use crate::registry::SiteRegistry;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// 周期性扫描所有启用 TLS 的站点，将缺失或即将过期的证书重新加入队列
pub struct ExpiryScanner {
    registry: Arc<SiteRegistry>,
    artifacts: ArtifactStore,
    queue: CertQueue,
    renew_before: Duration,
    interval: std::time::Duration,
}

impl ExpiryScanner {
    pub fn new(
        registry: Arc<SiteRegistry>,
        artifacts: ArtifactStore,
        queue: CertQueue,
        renew_before: Duration,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            registry,
            artifacts,
            queue,
            renew_before,
            interval,
        }
    }

    /// One pass over the registry. Returns how many domains were newly queued.
    pub async fn scan_once(&self) -> usize {
        let mut queued = 0;
        for site in self.registry.list().await {
            if !site.ssl {
                continue;
            }
            if self.artifacts.is_fresh(&site.domain, self.renew_before).await {
                continue;
            }
            if self.queue.enqueue(&site.domain).await {
                info!(domain = %site.domain, "certificate missing or expiring, queued for renewal");
                queued += 1;
            }
        }
        queued
    }

    /// Scans immediately, then once per interval until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "expiry scanner started");
        loop {
            let queued = self.scan_once().await;
            debug!(queued, "expiry scan finished");
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
        info!("expiry scanner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::testing::self_signed;
    use tempfile::TempDir;
    use webfront_common::SitePayload;

    async fn setup() -> (TempDir, Arc<SiteRegistry>, ArtifactStore, CertQueue) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(
            SiteRegistry::open(dir.path().join("sites.json"))
                .await
                .unwrap(),
        );
        let artifacts = ArtifactStore::new(dir.path().join("certs"));
        (dir, registry, artifacts, CertQueue::default())
    }

    async fn add(registry: &SiteRegistry, domain: &str, ssl: bool) {
        registry
            .create(SitePayload {
                domain: domain.to_string(),
                ssl,
                ssl_provider: String::new(),
                proxy_pass: "http://127.0.0.1:9000".to_string(),
                proxy_headers: Default::default(),
            })
            .await
            .unwrap();
    }

    fn scanner(
        registry: &Arc<SiteRegistry>,
        artifacts: &ArtifactStore,
        queue: &CertQueue,
    ) -> ExpiryScanner {
        ExpiryScanner::new(
            registry.clone(),
            artifacts.clone(),
            queue.clone(),
            Duration::days(30),
            std::time::Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn queues_expiring_and_missing_only() {
        let (_dir, registry, artifacts, queue) = setup().await;
        add(&registry, "fresh.example.com", true).await;
        add(&registry, "soon.example.com", true).await;
        add(&registry, "missing.example.com", true).await;
        add(&registry, "plain.example.com", false).await;
        artifacts
            .install("fresh.example.com", &self_signed("fresh.example.com", 90))
            .await
            .unwrap();
        artifacts
            .install("soon.example.com", &self_signed("soon.example.com", 10))
            .await
            .unwrap();

        let queued = scanner(&registry, &artifacts, &queue).scan_once().await;

        assert_eq!(queued, 2);
        assert_eq!(
            queue.snapshot().await,
            vec!["soon.example.com", "missing.example.com"]
        );
    }

    #[tokio::test]
    async fn repeated_scans_do_not_duplicate() {
        let (_dir, registry, artifacts, queue) = setup().await;
        add(&registry, "soon.example.com", true).await;
        let scanner = scanner(&registry, &artifacts, &queue);

        assert_eq!(scanner.scan_once().await, 1);
        assert_eq!(scanner.scan_once().await, 0);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn run_scans_immediately_and_stops_on_shutdown() {
        let (_dir, registry, artifacts, queue) = setup().await;
        add(&registry, "missing.example.com", true).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scanner(&registry, &artifacts, &queue).run(rx));

        for _ in 0..100 {
            if queue.len().await == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(queue.contains("missing.example.com").await);

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
