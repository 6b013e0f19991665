use crate::certs::{ArtifactStore, CertQueue};
use crate::nginx::NginxManager;
use crate::registry::SiteRegistry;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use webfront_common::models::CertificateStatus;
use webfront_common::{Result, Site, SitePayload, WebfrontError, validate_payload};

/// 站点变更编排：注册表写入 → 全量生成配置并重载 → 按需加入证书队列
#[derive(Clone)]
pub struct SiteService {
    registry: Arc<SiteRegistry>,
    nginx: Arc<NginxManager>,
    queue: CertQueue,
    artifacts: ArtifactStore,
}

impl SiteService {
    pub fn new(
        registry: Arc<SiteRegistry>,
        nginx: Arc<NginxManager>,
        queue: CertQueue,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            registry,
            nginx,
            queue,
            artifacts,
        }
    }

    pub fn queue(&self) -> &CertQueue {
        &self.queue
    }

    pub async fn list(&self) -> Vec<Site> {
        self.registry.list().await
    }

    pub async fn get(&self, id: Uuid) -> Result<Site> {
        self.registry.get(id).await
    }

    pub async fn create(&self, payload: SitePayload) -> Result<Site> {
        let payload = validate_payload(payload)?;
        let site = self.registry.create(payload).await?;
        info!(id = %site.id, domain = %site.domain, ssl = site.ssl, "site created");
        self.converge(&site).await?;
        Ok(site)
    }

    pub async fn update(&self, id: Uuid, payload: SitePayload) -> Result<Site> {
        let payload = validate_payload(payload)?;
        let site = self.registry.update(id, payload).await?;
        info!(id = %site.id, domain = %site.domain, ssl = site.ssl, "site updated");
        self.converge(&site).await?;
        Ok(site)
    }

    /// Unknown ids are accepted; configs are regenerated either way.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if let Some(site) = self.registry.delete(id).await? {
            info!(id = %site.id, domain = %site.domain, "site deleted");
        }
        self.apply().await
    }

    /// Queues (re)issuance for a TLS-enabled site. Returns whether a new task was added.
    pub async fn request_certificate(&self, id: Uuid) -> Result<bool> {
        let site = self.registry.get(id).await?;
        if !site.ssl {
            return Err(WebfrontError::BadRequest(format!(
                "site {} does not have TLS enabled",
                site.domain
            )));
        }
        let added = self.queue.enqueue(&site.domain).await;
        info!(domain = %site.domain, added, "certificate task requested");
        Ok(added)
    }

    pub async fn certificate_status(&self, id: Uuid) -> Result<CertificateStatus> {
        let site = self.registry.get(id).await?;
        let (present, expires_at) = self.artifacts.status(&site.domain).await;
        Ok(CertificateStatus {
            queued: self.queue.contains(&site.domain).await,
            domain: site.domain,
            present,
            expires_at,
        })
    }

    /// Regenerates every config and reloads. A failed reload is logged, not returned.
    pub async fn apply(&self) -> Result<()> {
        let sites = self.registry.list().await;
        if !self.nginx.apply(&sites).await? {
            warn!("nginx reload failed; previous configuration stays active");
        }
        Ok(())
    }

    async fn converge(&self, site: &Site) -> Result<()> {
        self.apply().await?;
        if site.ssl {
            self.queue.enqueue(&site.domain).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn service(dir: &TempDir, reload: &str) -> SiteService {
        let artifacts = ArtifactStore::new(dir.path().join("certs"));
        let registry = Arc::new(
            SiteRegistry::open(dir.path().join("sites.json"))
                .await
                .unwrap(),
        );
        let nginx = Arc::new(NginxManager::new(
            dir.path().join("conf"),
            artifacts.clone(),
            vec!["true".to_string()],
            vec![reload.to_string()],
            Duration::from_secs(5),
        ));
        SiteService::new(registry, nginx, CertQueue::default(), artifacts)
    }

    fn payload(domain: &str, ssl: bool) -> SitePayload {
        SitePayload {
            domain: domain.to_string(),
            ssl,
            ssl_provider: "zerossl".to_string(),
            proxy_pass: "http://127.0.0.1:9000".to_string(),
            proxy_headers: BTreeMap::new(),
        }
    }

    fn conf_files(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path().join("conf"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn creating_tls_site_writes_config_and_queues_once() {
        let dir = TempDir::new().unwrap();
        let sites = service(&dir, "true").await;

        let site = sites.create(payload("a.example.com", true)).await.unwrap();

        assert_eq!(sites.list().await.len(), 1);
        assert_eq!(conf_files(&dir), vec!["a.example.com.conf"]);
        let conf = std::fs::read_to_string(dir.path().join("conf/a.example.com.conf")).unwrap();
        assert!(conf.contains("listen 80;"));
        assert!(conf.contains("proxy_pass http://127.0.0.1:9000;"));
        assert_eq!(sites.queue().snapshot().await, vec!["a.example.com"]);

        sites.update(site.id, payload("a.example.com", true)).await.unwrap();
        assert_eq!(sites.queue().snapshot().await, vec!["a.example.com"]);
    }

    #[tokio::test]
    async fn plain_site_is_not_queued() {
        let dir = TempDir::new().unwrap();
        let sites = service(&dir, "true").await;
        sites.create(payload("plain.example.com", false)).await.unwrap();
        assert_eq!(sites.queue().len().await, 0);
    }

    #[tokio::test]
    async fn invalid_payload_never_reaches_registry() {
        let dir = TempDir::new().unwrap();
        let sites = service(&dir, "true").await;
        let err = sites.create(payload("../etc", true)).await.unwrap_err();
        assert!(matches!(err, WebfrontError::Validation(_)));
        assert!(sites.list().await.is_empty());
    }

    #[tokio::test]
    async fn reload_failure_does_not_fail_the_request() {
        let dir = TempDir::new().unwrap();
        let sites = service(&dir, "false").await;
        let site = sites.create(payload("a.example.com", true)).await.unwrap();
        assert_eq!(sites.get(site.id).await.unwrap().domain, "a.example.com");
    }

    #[tokio::test]
    async fn delete_unknown_still_regenerates() {
        let dir = TempDir::new().unwrap();
        let sites = service(&dir, "true").await;
        let keep = sites.create(payload("keep.example.com", false)).await.unwrap();
        let gone = sites.create(payload("gone.example.com", false)).await.unwrap();

        sites.delete(gone.id).await.unwrap();
        sites.delete(Uuid::new_v4()).await.unwrap();

        assert_eq!(sites.list().await, vec![keep]);
        assert_eq!(conf_files(&dir), vec!["keep.example.com.conf"]);
    }

    #[tokio::test]
    async fn certificate_request_requires_tls() {
        let dir = TempDir::new().unwrap();
        let sites = service(&dir, "true").await;
        let plain = sites.create(payload("plain.example.com", false)).await.unwrap();
        let tls = sites.create(payload("tls.example.com", true)).await.unwrap();

        assert!(matches!(
            sites.request_certificate(plain.id).await,
            Err(WebfrontError::BadRequest(_))
        ));
        assert!(matches!(
            sites.request_certificate(Uuid::new_v4()).await,
            Err(WebfrontError::NotFound(_))
        ));
        assert!(!sites.request_certificate(tls.id).await.unwrap());

        let status = sites.certificate_status(tls.id).await.unwrap();
        assert_eq!(status.domain, "tls.example.com");
        assert!(!status.present);
        assert!(status.expires_at.is_none());
        assert!(status.queued);
    }
}
