//! 站点配置验证模块
//!
//! 域名会被用作证书与配置文件名，请求头会被原样写入 nginx 指令，
//! 因此在进入注册表之前统一做规范化和校验。

use crate::error::{Result, WebfrontError};
use crate::models::SitePayload;
use regex::Regex;
use std::sync::OnceLock;

const MAX_DOMAIN_LEN: usize = 253;

/// 正则编译结果，编译失败时在使用处转换为内部错误
type CompiledRegex = std::result::Result<Regex, regex::Error>;

fn label_regex() -> Result<&'static Regex> {
    static RE: OnceLock<CompiledRegex> = OnceLock::new();
    compiled(RE.get_or_init(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")))
}

fn header_name_regex() -> Result<&'static Regex> {
    static RE: OnceLock<CompiledRegex> = OnceLock::new();
    compiled(RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]+$")))
}

fn compiled(re: &'static CompiledRegex) -> Result<&'static Regex> {
    re.as_ref()
        .map_err(|err| WebfrontError::Internal(anyhow::anyhow!("invalid built-in regex: {}", err)))
}

/// 规范化并校验站点载荷，返回可直接入库的载荷
pub fn validate_payload(mut payload: SitePayload) -> Result<SitePayload> {
    payload.domain = normalize_domain(&payload.domain)?;
    payload.ssl_provider = payload.ssl_provider.trim().to_string();
    payload.proxy_pass = validate_proxy_pass(&payload.proxy_pass)?;
    for (name, value) in &payload.proxy_headers {
        validate_header(name, value)?;
    }
    Ok(payload)
}

/// 小写化并校验域名
pub fn normalize_domain(raw: &str) -> Result<String> {
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return Err(WebfrontError::validation("domain is required"));
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(WebfrontError::validation(format!(
            "domain {} exceeds {} characters",
            domain, MAX_DOMAIN_LEN
        )));
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(WebfrontError::validation(format!(
            "domain {} must have at least two labels",
            domain
        )));
    }
    let label_re = label_regex()?;
    if let Some(bad) = labels.iter().find(|label| !label_re.is_match(label)) {
        return Err(WebfrontError::validation(format!(
            "domain {} has invalid label '{}'",
            domain, bad
        )));
    }
    Ok(domain)
}

fn validate_proxy_pass(raw: &str) -> Result<String> {
    let target = raw.trim();
    if target.is_empty() {
        return Err(WebfrontError::validation("proxy_pass is required"));
    }
    let rest = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
        .ok_or_else(|| {
            WebfrontError::validation(format!("proxy_pass {} must be an http(s) URL", target))
        })?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(WebfrontError::validation(format!(
            "proxy_pass {} is missing a host",
            target
        )));
    }
    if target.chars().any(|c| c.is_whitespace() || matches!(c, ';' | '{' | '}')) {
        return Err(WebfrontError::validation(format!(
            "proxy_pass {} contains forbidden characters",
            target
        )));
    }
    Ok(target.to_string())
}

fn validate_header(name: &str, value: &str) -> Result<()> {
    if !header_name_regex()?.is_match(name) {
        return Err(WebfrontError::validation(format!(
            "invalid proxy header name '{}'",
            name
        )));
    }
    if value.trim().is_empty() {
        return Err(WebfrontError::validation(format!(
            "proxy header {} has an empty value",
            name
        )));
    }
    // 值以单个未加引号的 nginx 参数写出
    if value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, ';' | '{' | '}' | '#' | '"' | '\'' | '\\'))
    {
        return Err(WebfrontError::validation(format!(
            "proxy header {} value contains forbidden characters",
            name
        )));
    }
    Ok(())
}
