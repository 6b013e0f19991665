use crate::certs::{ArtifactStore, IssuedCertificate};
use crate::metrics;
use crate::registry::SiteRegistry;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webfront_common::{AppConfig, Result, Site, WebfrontError};

/// First line of every generated file. Only files carrying it are ever removed.
pub const MANAGED_MARKER: &str = "# managed by webfront";

const BASELINE_HEADERS: [(&str, &str); 6] = [
    ("Upgrade", "$http_upgrade"),
    ("Connection", "\"upgrade\""),
    ("Host", "$host"),
    ("X-Real-IP", "$remote_addr"),
    ("X-Forwarded-For", "$proxy_add_x_forwarded_for"),
    ("X-Forwarded-Proto", "$scheme"),
];

/// nginx 配置生成与重载
pub struct NginxManager {
    conf_dir: PathBuf,
    artifacts: ArtifactStore,
    test_cmd: Vec<String>,
    reload_cmd: Vec<String>,
    command_timeout: Duration,
    apply_lock: Mutex<()>,
}

impl NginxManager {
    pub fn new(
        conf_dir: impl Into<PathBuf>,
        artifacts: ArtifactStore,
        test_cmd: Vec<String>,
        reload_cmd: Vec<String>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            conf_dir: conf_dir.into(),
            artifacts,
            test_cmd,
            reload_cmd,
            command_timeout,
            apply_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &AppConfig, artifacts: ArtifactStore) -> Self {
        Self::new(
            config.nginx_conf_dir.clone(),
            artifacts,
            config.nginx_test_cmd.clone(),
            config.nginx_reload_cmd.clone(),
            Duration::from_secs(config.nginx_command_timeout_secs),
        )
    }

    pub fn conf_path(&self, domain: &str) -> PathBuf {
        self.conf_dir.join(format!("{}.conf", domain))
    }

    /// Server block for one site. The 443 listener is only emitted when both
    /// artifact files exist, so a reload never references missing files.
    pub fn render_config(&self, site: &Site) -> String {
        let headers: String = merged_headers(site)
            .iter()
            .map(|(name, value)| format!("        proxy_set_header {} {};\n", name, value))
            .collect();

        let tls = match self.artifacts.present(&site.domain).filter(|_| site.ssl) {
            Some(paths) => format!(
                "\n    listen 443 ssl;\n    ssl_certificate {};\n    ssl_certificate_key {};\n",
                paths.cert.display(),
                paths.key.display()
            ),
            None => String::new(),
        };

        format!(
            "{marker}
server {{
    listen 80;
    server_name {domain};

    location ^~ / {{
        proxy_pass {target};
        proxy_http_version 1.1;
        proxy_buffering off;
{headers}    }}
{tls}}}
",
            marker = MANAGED_MARKER,
            domain = site.domain,
            target = site.proxy_pass,
        )
    }

    /// Writes one file per site via temp + rename, then removes stale managed files.
    pub async fn regenerate_all(&self, sites: &[Site]) -> Result<usize> {
        fs::create_dir_all(&self.conf_dir).await?;

        let mut written = HashSet::new();
        for site in sites {
            let target = self.conf_path(&site.domain);
            let tmp = self.conf_dir.join(format!(".{}.conf.tmp", site.domain));
            fs::write(&tmp, self.render_config(site)).await?;
            if let Err(err) = fs::rename(&tmp, &target).await {
                let _ = fs::remove_file(&tmp).await;
                return Err(err.into());
            }
            written.insert(target);
        }

        let mut entries = fs::read_dir(&self.conf_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if written.contains(&path) || path.extension().and_then(|e| e.to_str()) != Some("conf") {
                continue;
            }
            if is_managed(&path).await {
                debug!(path = %path.display(), "removing stale config");
                fs::remove_file(&path).await?;
            }
        }

        info!(count = written.len(), dir = %self.conf_dir.display(), "nginx configs regenerated");
        Ok(written.len())
    }

    /// Syntax check, then reload. Failures are reported, not raised.
    pub async fn reload(&self) -> bool {
        let result = async {
            self.run(&self.test_cmd).await?;
            self.run(&self.reload_cmd).await
        }
        .await;

        match result {
            Ok(()) => {
                info!("nginx reloaded");
                metrics::inc_proxy_reload(true);
                true
            }
            Err(err) => {
                warn!(error = %err, "nginx reload failed");
                metrics::inc_proxy_reload(false);
                false
            }
        }
    }

    /// Regenerate + reload as one step; concurrent callers are serialized.
    pub async fn apply(&self, sites: &[Site]) -> Result<bool> {
        let _guard = self.apply_lock.lock().await;
        self.regenerate_all(sites).await?;
        Ok(self.reload().await)
    }

    /// Installs a renewed pair and activates it under the same lock as `apply`,
    /// so no regeneration or syntax check sees the pair mid-swap.
    ///
    /// Only a failed install is an error. Regeneration failure after install
    /// is logged and reported as "not reloaded".
    pub async fn install_and_apply(
        &self,
        domain: &str,
        issued: &IssuedCertificate,
        registry: &SiteRegistry,
    ) -> Result<(DateTime<Utc>, bool)> {
        let _guard = self.apply_lock.lock().await;
        let expires_at = self.artifacts.install(domain, issued).await?;
        info!(domain = %domain, expires_at = %expires_at, "certificate installed");

        let sites = registry.list().await;
        let reloaded = match self.regenerate_all(&sites).await {
            Ok(_) => self.reload().await,
            Err(err) => {
                warn!(domain = %domain, error = %err, "config regeneration failed after install");
                false
            }
        };
        Ok((expires_at, reloaded))
    }

    async fn run(&self, argv: &[String]) -> Result<()> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| WebfrontError::reload("empty proxy command"))?;

        let output = Command::new(program).args(args).kill_on_drop(true).output();
        let output = tokio::time::timeout(self.command_timeout, output)
            .await
            .map_err(|_| {
                WebfrontError::reload(format!(
                    "`{}` timed out after {}s",
                    argv.join(" "),
                    self.command_timeout.as_secs()
                ))
            })?
            .map_err(|e| WebfrontError::reload(format!("failed to run `{}`: {}", argv.join(" "), e)))?;

        if !output.status.success() {
            return Err(WebfrontError::reload(format!(
                "`{}` exited with {}: {}",
                argv.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Baseline headers in fixed order, each replaced at most once by a site
/// header with the same name (case-insensitive); remaining site headers follow.
fn merged_headers(site: &Site) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = BASELINE_HEADERS
        .iter()
        .map(|(name, default)| {
            let value = site
                .proxy_headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| default.to_string());
            (name.to_string(), value)
        })
        .collect();

    for (name, value) in &site.proxy_headers {
        let overrides_baseline = BASELINE_HEADERS
            .iter()
            .any(|(base, _)| base.eq_ignore_ascii_case(name));
        if !overrides_baseline {
            headers.push((name.clone(), value.clone()));
        }
    }
    headers
}

async fn is_managed(path: &Path) -> bool {
    match fs::read_to_string(path).await {
        Ok(body) => body.lines().next() == Some(MANAGED_MARKER),
        Err(_) => false,
    }
}
