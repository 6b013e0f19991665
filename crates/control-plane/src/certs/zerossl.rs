//! ZeroSSL REST 客户端
//!
//! 所有请求通过 `access_key` 查询参数鉴权。非 2xx 状态码与传输错误一律视为
//! 签发错误；创建订单时的 `success: false` 同样如此，而轮询响应中的
//! `success: false` 只视为状态未知，由流水线继续轮询直到超时。

use crate::certs::pipeline::{
    CaStatus, CertificateAuthority, CertificateBundle, CertificateOrder, DnsChallenge,
};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use webfront_common::{Result, WebfrontError};

pub const ZEROSSL_API_BASE: &str = "https://api.zerossl.com";

const VALIDATION_METHOD: &str = "CNAME_CSR_HASH";

#[derive(Debug, Clone)]
pub struct ZeroSslClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ZeroSslClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            WebfrontError::issuance(format!("failed to create HTTP client: {}", e))
        })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str, extra: &[(&str, &str)]) -> Result<Url> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| WebfrontError::issuance("ZEROSSL_API_KEY is not configured"))?;
        let mut params = vec![("access_key", key)];
        params.extend_from_slice(extra);
        Url::parse_with_params(&format!("{}{}", self.base_url, path), &params)
            .map_err(|e| WebfrontError::issuance(format!("invalid ZeroSSL URL: {}", e)))
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response, action: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WebfrontError::issuance(format!(
                "{} failed: HTTP {} - {}",
                action, status, body
            )));
        }
        response.json().await.map_err(|e| {
            WebfrontError::issuance(format!("{}: unexpected response: {}", action, e))
        })
    }

    async fn certificate_call(&self, request: reqwest::RequestBuilder, action: &str) -> Result<CaStatus> {
        let response = request
            .send()
            .await
            .map_err(|e| WebfrontError::issuance(format!("{} failed: {}", action, e)))?;
        let body: CertificateResponse = Self::read(response, action).await?;
        if let Err(err) = body.check(action) {
            warn!(error = %err, "treating rejected poll as unknown status");
            return Ok(CaStatus::Unknown);
        }
        Ok(body.status)
    }
}

#[async_trait]
impl CertificateAuthority for ZeroSslClient {
    async fn create_order(&self, domains: &[String], csr_pem: &str) -> Result<CertificateOrder> {
        let url = self.url("/certificates", &[])?;
        let request = CreateCertificateRequest {
            certificate_domains: domains.join(","),
            certificate_csr: csr_pem,
        };
        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| WebfrontError::issuance(format!("create certificate failed: {}", e)))?;

        let body: CertificateResponse = Self::read(response, "create certificate").await?;
        body.check("create certificate")?;
        let id = body
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WebfrontError::issuance("create certificate: response carries no id"))?;

        let challenges = body
            .validation
            .map(|v| v.other_methods)
            .unwrap_or_default()
            .into_iter()
            .map(|(domain, method)| DnsChallenge {
                domain,
                cname_name: method.cname_validation_p1,
                cname_target: method.cname_validation_p2,
            })
            .collect();

        debug!(order_id = %id, "ZeroSSL certificate created");
        Ok(CertificateOrder { id, challenges })
    }

    async fn start_validation(&self, order_id: &str) -> Result<CaStatus> {
        let url = self.url(&format!("/certificates/{}/challenges", order_id), &[])?;
        let request = self.client.post(url).json(&ValidationRequest {
            validation_method: VALIDATION_METHOD,
        });
        self.certificate_call(request, "start validation").await
    }

    async fn status(&self, order_id: &str) -> Result<CaStatus> {
        let url = self.url(&format!("/certificates/{}", order_id), &[])?;
        self.certificate_call(self.client.get(url), "certificate status")
            .await
    }

    async fn download(&self, order_id: &str) -> Result<CertificateBundle> {
        let url = self.url(
            &format!("/certificates/{}/download/return", order_id),
            &[("format", "pem")],
        )?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WebfrontError::issuance(format!("download certificate failed: {}", e)))?;
        let body: DownloadResponse = Self::read(response, "download certificate").await?;
        Ok(CertificateBundle {
            certificate: body.certificate,
            ca_bundle: body.ca_bundle,
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateCertificateRequest<'a> {
    certificate_domains: String,
    certificate_csr: &'a str,
}

#[derive(Debug, Serialize)]
struct ValidationRequest {
    validation_method: &'static str,
}

/// Shared shape of create, challenge and status responses.
#[derive(Debug, Deserialize)]
struct CertificateResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: CaStatus,
    #[serde(default)]
    validation: Option<Validation>,
    #[serde(default)]
    error: Option<ApiError>,
}

impl CertificateResponse {
    fn check(&self, action: &str) -> Result<()> {
        if self.success == Some(false) || self.error.is_some() {
            let detail = self
                .error
                .as_ref()
                .map(|e| format!("{} ({})", e.kind, e.code))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(WebfrontError::issuance(format!(
                "{} rejected by ZeroSSL: {}",
                action, detail
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Validation {
    #[serde(default)]
    other_methods: BTreeMap<String, CnameMethod>,
}

#[derive(Debug, Deserialize)]
struct CnameMethod {
    cname_validation_p1: String,
    cname_validation_p2: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    #[serde(rename = "certificate.crt", default)]
    certificate: Option<String>,
    #[serde(rename = "ca_bundle.crt", default)]
    ca_bundle: Option<String>,
}
