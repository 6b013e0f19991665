use crate::certs::pipeline::DnsProvider;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use webfront_common::{Result, WebfrontError};

pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Challenge records only need to live until the authority has validated them.
const CHALLENGE_TTL: u32 = 120;

/// Cloudflare DNS 客户端，仅负责创建验证用 CNAME 记录
#[derive(Debug, Clone)]
pub struct CloudflareClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl CloudflareClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            WebfrontError::issuance(format!("failed to create HTTP client: {}", e))
        })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl DnsProvider for CloudflareClient {
    async fn create_cname(&self, zone_id: &str, name: &str, target: &str) -> Result<String> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| WebfrontError::issuance("CLOUDFLARE_API_TOKEN is not configured"))?;

        let request = CreateRecordRequest {
            kind: "CNAME",
            name,
            content: target,
            ttl: CHALLENGE_TTL,
            proxied: false,
        };
        let response = self
            .client
            .post(format!("{}/zones/{}/dns_records", self.base_url, zone_id))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| WebfrontError::issuance(format!("failed to create CNAME {}: {}", name, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WebfrontError::issuance(format!(
                "failed to create CNAME {}: HTTP {} - {}",
                name, status, body
            )));
        }

        let body: RecordResponse = response.json().await.map_err(|e| {
            WebfrontError::issuance(format!("failed to parse Cloudflare response: {}", e))
        })?;
        let record = match body.result {
            Some(record) if body.success => record,
            _ => {
                let errors = body
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(WebfrontError::issuance(format!(
                    "Cloudflare rejected CNAME {}: {}",
                    name, errors
                )));
            }
        };

        debug!(zone_id = %zone_id, record_id = %record.id, name = %name, "CNAME record created");
        Ok(record.id)
    }
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

#[derive(Debug, Deserialize)]
struct RecordResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    #[serde(default)]
    result: Option<Record>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
}
