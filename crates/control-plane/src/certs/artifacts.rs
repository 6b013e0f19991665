use crate::certs::IssuedCertificate;
use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};
use webfront_common::{Result, WebfrontError};
use x509_parser::pem::parse_x509_pem;

/// 每个域名的证书文件与私钥文件，路径由域名确定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    cert_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
        }
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.cert_dir).await?;
        Ok(())
    }

    pub fn paths(&self, domain: &str) -> ArtifactPaths {
        ArtifactPaths {
            cert: self.cert_dir.join(format!("{}.crt", domain)),
            key: self.cert_dir.join(format!("{}.key", domain)),
        }
    }

    /// Both files on disk, or `None`. Config rendering only references present pairs.
    pub fn present(&self, domain: &str) -> Option<ArtifactPaths> {
        let paths = self.paths(domain);
        (paths.cert.is_file() && paths.key.is_file()).then_some(paths)
    }

    pub async fn expiry(&self, domain: &str) -> Result<DateTime<Utc>> {
        let pem = fs::read(self.paths(domain).cert).await?;
        parse_cert_expiry(&pem)
    }

    /// A pair is fresh when both files exist and the leaf expires after `now + renew_before`.
    pub async fn is_fresh(&self, domain: &str, renew_before: Duration) -> bool {
        if self.present(domain).is_none() {
            return false;
        }
        match self.expiry(domain).await {
            Ok(expires_at) => {
                debug!(domain = %domain, expires_at = %expires_at, "certificate expiry");
                expires_at > Utc::now() + renew_before
            }
            Err(err) => {
                warn!(domain = %domain, error = %err, "unreadable certificate treated as expiring");
                false
            }
        }
    }

    /// Presence and expiry for the status endpoint.
    pub async fn status(&self, domain: &str) -> (bool, Option<DateTime<Utc>>) {
        if self.present(domain).is_none() {
            return (false, None);
        }
        (true, self.expiry(domain).await.ok())
    }

    /// Writes the combined chain and key for `domain`.
    ///
    /// Both files go to temporary names first. The old certificate is removed
    /// before the key is renamed into place, so a renewal passes through
    /// "key without certificate" (not present) and never pairs a new key with
    /// an old certificate. Callers serialize this against config regeneration.
    pub async fn install(&self, domain: &str, issued: &IssuedCertificate) -> Result<DateTime<Utc>> {
        let chain = combine_chain(&issued.certificate, &issued.ca_bundle);
        let expires_at = parse_cert_expiry(chain.as_bytes())?;

        self.ensure_dir().await?;
        let paths = self.paths(domain);
        let cert_tmp = self.cert_dir.join(format!(".{}.crt.tmp", domain));
        let key_tmp = self.cert_dir.join(format!(".{}.key.tmp", domain));

        let staged = async {
            fs::write(&key_tmp, issued.private_key.as_bytes()).await?;
            fs::write(&cert_tmp, chain.as_bytes()).await?;
            match fs::remove_file(&paths.cert).await {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => return Err(err),
                _ => {}
            }
            fs::rename(&key_tmp, &paths.key).await?;
            fs::rename(&cert_tmp, &paths.cert).await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(err) = staged {
            let _ = fs::remove_file(&key_tmp).await;
            let _ = fs::remove_file(&cert_tmp).await;
            return Err(err.into());
        }
        Ok(expires_at)
    }
}

/// Leaf first, then the CA bundle; each part has trailing whitespace trimmed.
pub fn combine_chain(certificate: &str, ca_bundle: &str) -> String {
    let leaf = certificate.trim_end();
    let bundle = ca_bundle.trim_end();
    if bundle.is_empty() {
        format!("{}\n", leaf)
    } else {
        format!("{}\n{}\n", leaf, bundle)
    }
}

/// 解析 PEM 中第一张证书的过期时间
pub fn parse_cert_expiry(cert_pem: &[u8]) -> Result<DateTime<Utc>> {
    let (_, pem) = parse_x509_pem(cert_pem)
        .map_err(|err| WebfrontError::Internal(anyhow!("invalid certificate PEM: {}", err)))?;
    let cert = pem
        .parse_x509()
        .map_err(|err| WebfrontError::Internal(anyhow!("invalid certificate: {}", err)))?;
    let not_after = cert.validity().not_after.to_datetime();
    let timestamp = not_after.unix_timestamp();
    let nanos = not_after.nanosecond();
    DateTime::<Utc>::from_timestamp(timestamp, nanos)
        .ok_or_else(|| WebfrontError::Internal(anyhow!("invalid certificate timestamp")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::testing::self_signed;
    use tempfile::TempDir;

    #[test]
    fn combine_chain_trims_and_joins() {
        assert_eq!(combine_chain("LEAF\n\n", "CA\n"), "LEAF\nCA\n");
        assert_eq!(combine_chain("LEAF  \n", ""), "LEAF\n");
    }

    #[tokio::test]
    async fn install_writes_pair_and_reports_expiry() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let issued = self_signed("a.example.com", 90);

        let expires_at = store.install("a.example.com", &issued).await.unwrap();
        assert!(expires_at > Utc::now() + Duration::days(80));

        let paths = store.present("a.example.com").expect("both files present");
        let cert = std::fs::read_to_string(&paths.cert).unwrap();
        assert!(cert.starts_with(issued.certificate.trim_end()));
        assert!(cert.ends_with(&format!("{}\n", issued.ca_bundle.trim_end())));
        let key = std::fs::read_to_string(&paths.key).unwrap();
        assert_eq!(key, issued.private_key);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn install_rejects_garbage_without_touching_disk() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let issued = IssuedCertificate {
            certificate: "not a certificate".to_string(),
            ca_bundle: String::new(),
            private_key: "key".to_string(),
        };
        assert!(store.install("a.example.com", &issued).await.is_err());
        assert!(!store.paths("a.example.com").key.exists());
        assert!(!store.paths("a.example.com").cert.exists());
    }

    #[tokio::test]
    async fn freshness_follows_threshold() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        store
            .install("fresh.example.com", &self_signed("fresh.example.com", 90))
            .await
            .unwrap();
        store
            .install("soon.example.com", &self_signed("soon.example.com", 10))
            .await
            .unwrap();

        assert!(store.is_fresh("fresh.example.com", Duration::days(30)).await);
        assert!(!store.is_fresh("soon.example.com", Duration::days(30)).await);
        assert!(store.is_fresh("soon.example.com", Duration::days(5)).await);
        assert!(!store.is_fresh("missing.example.com", Duration::days(30)).await);
    }

    #[tokio::test]
    async fn renewal_replaces_both_files_of_existing_pair() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        store
            .install("a.example.com", &self_signed("a.example.com", 10))
            .await
            .unwrap();

        let renewed = self_signed("a.example.com", 90);
        let expires_at = store.install("a.example.com", &renewed).await.unwrap();

        let paths = store.present("a.example.com").expect("both files present");
        let cert = std::fs::read_to_string(&paths.cert).unwrap();
        assert!(cert.starts_with(renewed.certificate.trim_end()));
        assert_eq!(std::fs::read_to_string(&paths.key).unwrap(), renewed.private_key);
        assert_eq!(store.expiry("a.example.com").await.unwrap(), expires_at);
        assert!(expires_at > Utc::now() + Duration::days(80));
    }

    #[tokio::test]
    async fn key_without_cert_is_not_present() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let issued = self_signed("a.example.com", 90);
        std::fs::write(store.paths("a.example.com").key, &issued.private_key).unwrap();

        assert!(store.present("a.example.com").is_none());
        assert!(!store.is_fresh("a.example.com", Duration::days(30)).await);
    }

    #[tokio::test]
    async fn cert_without_key_is_not_present() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let issued = self_signed("a.example.com", 90);
        std::fs::write(store.paths("a.example.com").cert, &issued.certificate).unwrap();

        assert!(store.present("a.example.com").is_none());
        assert!(!store.is_fresh("a.example.com", Duration::days(30)).await);
        assert_eq!(store.status("a.example.com").await, (false, None));
    }
}
