use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub control_plane_addr: String,
    pub sites_file: PathBuf,
    pub static_dir: PathBuf,
    pub nginx_conf_dir: PathBuf,
    pub nginx_cert_dir: PathBuf,
    pub nginx_test_cmd: Vec<String>,
    pub nginx_reload_cmd: Vec<String>,
    pub nginx_command_timeout_secs: u64,
    pub zerossl_api_key: Option<String>,
    pub zerossl_api_url: String,
    pub cloudflare_api_token: Option<String>,
    pub cloudflare_api_url: String,
    pub cloudflare_zone_ids: HashMap<String, String>,
    pub cert_renew_before_days: i64,
    pub cert_poll_interval_secs: u64,
    pub cert_poll_timeout_secs: u64,
    pub cert_download_attempts: u32,
    pub cert_download_delay_secs: u64,
    pub cert_scan_interval_secs: u64,
    pub auth_username: String,
    pub auth_password: String,
    pub auth_jwt_secret: Option<String>,
    pub auth_token_ttl_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        // Load .env early so process env reads pick it up.
        let _ = dotenvy::dotenv();

        let control_plane_addr =
            env::var("CONTROL_PLANE_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let sites_file = env_path("SITES_FILE", "data/sites.json");
        let static_dir = env_path("STATIC_DIR", "dist");
        let nginx_conf_dir = env_path("NGINX_CONF_DIR", "/etc/nginx/conf.d");
        let nginx_cert_dir = env_path("NGINX_CERT_DIR", "/etc/nginx/certs");

        let nginx_test_cmd = parse_command(
            "NGINX_TEST_CMD",
            &env::var("NGINX_TEST_CMD").unwrap_or_else(|_| "nginx -t".to_string()),
        )?;
        let nginx_reload_cmd = parse_command(
            "NGINX_RELOAD_CMD",
            &env::var("NGINX_RELOAD_CMD").unwrap_or_else(|_| "nginx -s reload".to_string()),
        )?;
        let nginx_command_timeout_secs = env_u64("NGINX_COMMAND_TIMEOUT_SECS", 10);

        let zerossl_api_key = env_opt("ZEROSSL_API_KEY");
        let zerossl_api_url = env::var("ZEROSSL_API_URL")
            .unwrap_or_else(|_| "https://api.zerossl.com".to_string());
        let cloudflare_api_token = env_opt("CLOUDFLARE_API_TOKEN");
        let cloudflare_api_url = env::var("CLOUDFLARE_API_URL")
            .unwrap_or_else(|_| "https://api.cloudflare.com/client/v4".to_string());
        let cloudflare_zone_ids =
            parse_zone_ids(&env::var("CLOUDFLARE_ZONE_IDS").unwrap_or_default())?;

        let cert_renew_before_days = env_u64("CERT_RENEW_BEFORE_DAYS", 30) as i64;
        let cert_poll_interval_secs = env_u64("CERT_POLL_INTERVAL_SECS", 20);
        let cert_poll_timeout_secs = env_u64("CERT_POLL_TIMEOUT_SECS", 300);
        let cert_download_attempts = env_u64("CERT_DOWNLOAD_ATTEMPTS", 5).max(1) as u32;
        let cert_download_delay_secs = env_u64("CERT_DOWNLOAD_DELAY_SECS", 5);
        let cert_scan_interval_secs = env_u64("CERT_SCAN_INTERVAL_SECS", 24 * 3600).max(60);

        let auth_username = env::var("AUTH_USERNAME").unwrap_or_else(|_| "admin".to_string());
        let auth_password = env::var("AUTH_PASSWORD").unwrap_or_else(|_| "admin123".to_string());
        let auth_jwt_secret = env_opt("AUTH_JWT_SECRET");
        let auth_token_ttl_secs = env_u64("AUTH_TOKEN_TTL_SECS", 24 * 3600);

        Ok(Self {
            control_plane_addr,
            sites_file,
            static_dir,
            nginx_conf_dir,
            nginx_cert_dir,
            nginx_test_cmd,
            nginx_reload_cmd,
            nginx_command_timeout_secs,
            zerossl_api_key,
            zerossl_api_url,
            cloudflare_api_token,
            cloudflare_api_url,
            cloudflare_zone_ids,
            cert_renew_before_days,
            cert_poll_interval_secs,
            cert_poll_timeout_secs,
            cert_download_attempts,
            cert_download_delay_secs,
            cert_scan_interval_secs,
            auth_username,
            auth_password,
            auth_jwt_secret,
            auth_token_ttl_secs,
        })
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

/// 将命令行字符串按空白拆分为 argv
pub fn parse_command(key: &str, raw: &str) -> Result<Vec<String>> {
    let argv: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        return Err(anyhow!("{} must not be empty", key));
    }
    Ok(argv)
}

/// 解析 `base.domain=zone_id,other.org=zone_id2` 形式的区域映射
pub fn parse_zone_ids(raw: &str) -> Result<HashMap<String, String>> {
    let mut zones = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (domain, zone_id) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("CLOUDFLARE_ZONE_IDS entry {} must be domain=zone_id", entry))?;
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        let zone_id = zone_id.trim();
        if domain.is_empty() || zone_id.is_empty() {
            return Err(anyhow!("CLOUDFLARE_ZONE_IDS entry {} is incomplete", entry));
        }
        zones.insert(domain, zone_id.to_string());
    }
    Ok(zones)
}
