//! 签发流水线
//!
//! CSR 生成 → 创建订单 → 发布 DNS CNAME 验证记录 → 触发验证并轮询
//! `pending_validation` → 轮询 `issued` → 下载 PEM。各步骤严格顺序执行。

use crate::certs::csr::generate_csr;
use crate::certs::{IssuedCertificate, Issuer};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use webfront_common::{AppConfig, Result, WebfrontError};

/// Certificate state as reported by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaStatus {
    Draft,
    PendingValidation,
    Issued,
    Cancelled,
    Revoked,
    Expired,
    #[default]
    #[serde(other)]
    Unknown,
}

impl CaStatus {
    fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Cancelled | Self::Revoked | Self::Expired)
    }
}

/// 单个域名的 CNAME 验证记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsChallenge {
    pub domain: String,
    pub cname_name: String,
    pub cname_target: String,
}

#[derive(Debug, Clone)]
pub struct CertificateOrder {
    pub id: String,
    pub challenges: Vec<DnsChallenge>,
}

/// Download payload. The authority is eventually consistent, so either field may be missing.
#[derive(Debug, Clone, Default)]
pub struct CertificateBundle {
    pub certificate: Option<String>,
    pub ca_bundle: Option<String>,
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn create_order(&self, domains: &[String], csr_pem: &str) -> Result<CertificateOrder>;
    /// Asks the authority to validate the published challenges and returns the current state.
    async fn start_validation(&self, order_id: &str) -> Result<CaStatus>;
    async fn status(&self, order_id: &str) -> Result<CaStatus>;
    async fn download(&self, order_id: &str) -> Result<CertificateBundle>;
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Creates a CNAME and returns the provider's record id.
    async fn create_cname(&self, zone_id: &str, name: &str, target: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct IssuanceSettings {
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub download_attempts: u32,
    pub download_delay: Duration,
}

impl Default for IssuanceSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(20),
            poll_timeout: Duration::from_secs(300),
            download_attempts: 5,
            download_delay: Duration::from_secs(5),
        }
    }
}

impl IssuanceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.cert_poll_interval_secs),
            poll_timeout: Duration::from_secs(config.cert_poll_timeout_secs),
            download_attempts: config.cert_download_attempts.max(1),
            download_delay: Duration::from_secs(config.cert_download_delay_secs),
        }
    }
}

pub struct IssuancePipeline {
    ca: Arc<dyn CertificateAuthority>,
    dns: Arc<dyn DnsProvider>,
    zone_ids: HashMap<String, String>,
    settings: IssuanceSettings,
}

impl IssuancePipeline {
    pub fn new(
        ca: Arc<dyn CertificateAuthority>,
        dns: Arc<dyn DnsProvider>,
        zone_ids: HashMap<String, String>,
        settings: IssuanceSettings,
    ) -> Self {
        Self {
            ca,
            dns,
            zone_ids,
            settings,
        }
    }

    fn zone_for(&self, host: &str) -> Result<&str> {
        let base = base_domain(host);
        self.zone_ids.get(&base).map(String::as_str).ok_or_else(|| {
            WebfrontError::validation(format!(
                "no DNS zone configured for {} (base domain {})",
                host, base
            ))
        })
    }

    async fn publish_challenges(&self, order: &CertificateOrder) -> Result<()> {
        if order.challenges.is_empty() {
            return Err(WebfrontError::issuance(format!(
                "order {} carries no CNAME challenges",
                order.id
            )));
        }
        for challenge in &order.challenges {
            let zone_id = self.zone_for(&challenge.domain)?;
            info!(
                domain = %challenge.domain,
                name = %challenge.cname_name,
                target = %challenge.cname_target,
                "publishing CNAME challenge"
            );
            self.dns
                .create_cname(zone_id, &challenge.cname_name, &challenge.cname_target)
                .await?;
        }
        Ok(())
    }

    /// Two poll phases sharing one deadline: `pending_validation`, then `issued`.
    async fn await_issuance(&self, order_id: &str) -> Result<()> {
        let interval = self.settings.poll_interval;
        let deadline = Instant::now() + self.settings.poll_timeout;

        sleep(interval).await;
        loop {
            if Instant::now() >= deadline {
                return Err(WebfrontError::timeout(format!(
                    "order {} never reached pending_validation",
                    order_id
                )));
            }
            let status = self.ca.start_validation(order_id).await?;
            debug!(order_id = %order_id, status = ?status, "validation poll");
            match status {
                CaStatus::PendingValidation => break,
                CaStatus::Issued => return Ok(()),
                s if s.is_terminal_failure() => {
                    return Err(WebfrontError::issuance(format!(
                        "order {} ended in state {:?}",
                        order_id, s
                    )));
                }
                _ => sleep(interval).await,
            }
        }

        sleep(interval).await;
        loop {
            if Instant::now() >= deadline {
                return Err(WebfrontError::timeout(format!(
                    "order {} was not issued in time",
                    order_id
                )));
            }
            let status = self.ca.status(order_id).await?;
            debug!(order_id = %order_id, status = ?status, "issuance poll");
            match status {
                CaStatus::Issued => return Ok(()),
                s if s.is_terminal_failure() => {
                    return Err(WebfrontError::issuance(format!(
                        "order {} ended in state {:?}",
                        order_id, s
                    )));
                }
                _ => sleep(interval).await,
            }
        }
    }

    async fn fetch_bundle(&self, order_id: &str) -> Result<Option<(String, String)>> {
        let attempts = self.settings.download_attempts;
        for attempt in 1..=attempts {
            sleep(self.settings.download_delay).await;
            let bundle = self.ca.download(order_id).await?;
            match (bundle.certificate, bundle.ca_bundle) {
                (Some(cert), Some(ca)) if !cert.trim().is_empty() && !ca.trim().is_empty() => {
                    return Ok(Some((cert, ca)));
                }
                _ => debug!(order_id = %order_id, attempt, "PEM bundle not ready"),
            }
        }
        warn!(order_id = %order_id, attempts, "PEM bundle still incomplete");
        Ok(None)
    }
}

#[async_trait]
impl Issuer for IssuancePipeline {
    async fn issue(&self, domains: &[String]) -> Result<Option<IssuedCertificate>> {
        for domain in domains {
            self.zone_for(domain)?;
        }

        let csr = generate_csr(domains)?;
        let order = self.ca.create_order(domains, &csr.csr_pem).await?;
        info!(order_id = %order.id, domains = ?domains, "certificate order created");

        self.publish_challenges(&order).await?;
        info!(order_id = %order.id, "waiting for DNS validation and issuance");
        self.await_issuance(&order.id).await?;

        info!(order_id = %order.id, "certificate issued, fetching PEM bundle");
        let Some((certificate, ca_bundle)) = self.fetch_bundle(&order.id).await? else {
            return Ok(None);
        };
        Ok(Some(IssuedCertificate {
            certificate,
            ca_bundle,
            private_key: csr.private_key_pem,
        }))
    }
}

/// Registrable base domain, approximated by the last two labels.
pub fn base_domain(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    labels[labels.len() - 2..].join(".")
}
