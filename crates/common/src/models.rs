use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 反向代理站点记录，`domain` 在注册表中唯一
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub domain: String,
    pub ssl: bool,
    pub ssl_provider: String,
    pub proxy_pass: String,
    pub proxy_headers: BTreeMap<String, String>,
}

impl Site {
    pub fn from_payload(id: Uuid, payload: SitePayload) -> Self {
        Self {
            id,
            domain: payload.domain,
            ssl: payload.ssl,
            ssl_provider: payload.ssl_provider,
            proxy_pass: payload.proxy_pass,
            proxy_headers: payload.proxy_headers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitePayload {
    pub domain: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub ssl_provider: String,
    #[serde(default)]
    pub proxy_pass: String,
    #[serde(default)]
    pub proxy_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// 站点证书在磁盘上的状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateStatus {
    pub domain: String,
    pub present: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub queued: bool,
}
