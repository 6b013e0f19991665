use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;
use webfront_common::{Result, Site, SitePayload, WebfrontError};

/// 站点注册表：JSON 文件持久化，内存中保留完整副本
///
/// Every mutation holds the write lock across read-modify-write and the
/// wholesale rewrite of the backing file.
pub struct SiteRegistry {
    path: PathBuf,
    sites: RwLock<Vec<Site>>,
}

impl SiteRegistry {
    /// Loads the registry file, creating an empty one when absent.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let sites = match fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                persist(&path, &[]).await?;
                Vec::new()
            }
            Err(err) => return Err(err.into()),
        };
        info!(path = %path.display(), sites = sites.len(), "site registry loaded");
        Ok(Self {
            path,
            sites: RwLock::new(sites),
        })
    }

    pub async fn list(&self) -> Vec<Site> {
        self.sites.read().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Result<Site> {
        self.sites
            .read()
            .await
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| WebfrontError::not_found(format!("site {}", id)))
    }

    pub async fn create(&self, payload: SitePayload) -> Result<Site> {
        let mut sites = self.sites.write().await;
        ensure_unique(&sites, &payload.domain, None)?;

        let site = Site::from_payload(Uuid::new_v4(), payload);
        let mut next = sites.clone();
        next.push(site.clone());
        persist(&self.path, &next).await?;
        *sites = next;

        debug!(id = %site.id, domain = %site.domain, "site created");
        Ok(site)
    }

    /// Replaces every mutable field. The id never changes.
    pub async fn update(&self, id: Uuid, payload: SitePayload) -> Result<Site> {
        let mut sites = self.sites.write().await;
        let index = sites
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| WebfrontError::not_found(format!("site {}", id)))?;
        ensure_unique(&sites, &payload.domain, Some(id))?;

        let site = Site::from_payload(id, payload);
        let mut next = sites.clone();
        next[index] = site.clone();
        persist(&self.path, &next).await?;
        *sites = next;

        debug!(id = %site.id, domain = %site.domain, "site updated");
        Ok(site)
    }

    /// Removes the site if present. Returns the removed record; an unknown id is not an error.
    pub async fn delete(&self, id: Uuid) -> Result<Option<Site>> {
        let mut sites = self.sites.write().await;
        let Some(index) = sites.iter().position(|s| s.id == id) else {
            debug!(id = %id, "delete of unknown site ignored");
            return Ok(None);
        };

        let mut next = sites.clone();
        let removed = next.remove(index);
        persist(&self.path, &next).await?;
        *sites = next;

        debug!(id = %removed.id, domain = %removed.domain, "site deleted");
        Ok(Some(removed))
    }
}

fn ensure_unique(sites: &[Site], domain: &str, except: Option<Uuid>) -> Result<()> {
    let taken = sites
        .iter()
        .any(|s| s.domain == domain && Some(s.id) != except);
    if taken {
        return Err(WebfrontError::validation(format!(
            "domain {} is already registered",
            domain
        )));
    }
    Ok(())
}

async fn persist(path: &Path, sites: &[Site]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(sites)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn payload(domain: &str) -> SitePayload {
        let mut headers = BTreeMap::new();
        headers.insert("Host".to_string(), "example.org".to_string());
        SitePayload {
            domain: domain.to_string(),
            ssl: true,
            ssl_provider: "zerossl".to_string(),
            proxy_pass: "http://127.0.0.1:9000".to_string(),
            proxy_headers: headers,
        }
    }

    #[tokio::test]
    async fn open_creates_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("sites.json");
        let registry = SiteRegistry::open(&path).await.unwrap();
        assert!(registry.list().await.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "[]");
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let registry = SiteRegistry::open(dir.path().join("sites.json")).await.unwrap();
        let created = registry.create(payload("a.example.com")).await.unwrap();
        let fetched = registry.get(created.id).await.unwrap();

        assert_eq!(fetched.domain, "a.example.com");
        assert!(fetched.ssl);
        assert_eq!(fetched.proxy_pass, "http://127.0.0.1:9000");
        assert_eq!(fetched.proxy_headers, payload("a.example.com").proxy_headers);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sites.json");
        let id = {
            let registry = SiteRegistry::open(&path).await.unwrap();
            registry.create(payload("a.example.com")).await.unwrap().id
        };
        let reopened = SiteRegistry::open(&path).await.unwrap();
        assert_eq!(reopened.get(id).await.unwrap().domain, "a.example.com");
        assert!(!dir.path().join("sites.json.tmp").exists());
    }

    #[tokio::test]
    async fn duplicate_domain_is_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = SiteRegistry::open(dir.path().join("sites.json")).await.unwrap();
        registry.create(payload("a.example.com")).await.unwrap();
        let err = registry.create(payload("a.example.com")).await.unwrap_err();
        assert!(matches!(err, WebfrontError::Validation(_)));
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn update_keeps_id_and_rejects_unknown() {
        let dir = TempDir::new().unwrap();
        let registry = SiteRegistry::open(dir.path().join("sites.json")).await.unwrap();
        let site = registry.create(payload("a.example.com")).await.unwrap();

        let mut changed = payload("a.example.com");
        changed.ssl = false;
        let updated = registry.update(site.id, changed.clone()).await.unwrap();
        assert_eq!(updated.id, site.id);
        assert!(!updated.ssl);

        let err = registry.update(Uuid::new_v4(), changed).await.unwrap_err();
        assert!(matches!(err, WebfrontError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_lenient() {
        let dir = TempDir::new().unwrap();
        let registry = SiteRegistry::open(dir.path().join("sites.json")).await.unwrap();
        let site = registry.create(payload("a.example.com")).await.unwrap();

        assert!(registry.delete(Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(registry.delete(site.id).await.unwrap().unwrap().id, site.id);
        assert!(registry.list().await.is_empty());
        assert!(registry.delete(site.id).await.unwrap().is_none());
    }
}
