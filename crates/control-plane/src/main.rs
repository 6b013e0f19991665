mod api;
mod auth;
mod certs;
mod metrics;
mod nginx;
mod registry;
mod sites;
mod state;

use crate::auth::AuthService;
use crate::certs::cloudflare::{CLOUDFLARE_API_BASE, CloudflareClient};
use crate::certs::worker::DropFailedTask;
use crate::certs::zerossl::{ZEROSSL_API_BASE, ZeroSslClient};
use crate::certs::{
    ArtifactStore, CertEngine, CertQueue, CertWorker, ExpiryScanner, IssuancePipeline,
    IssuanceSettings,
};
use crate::nginx::NginxManager;
use crate::registry::SiteRegistry;
use crate::sites::SiteService;
use crate::state::AppState;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use webfront_common::AppConfig;

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env()?;
    warn_missing_credentials(&config);

    let registry = Arc::new(SiteRegistry::open(&config.sites_file).await?);
    let artifacts = ArtifactStore::new(&config.nginx_cert_dir);
    artifacts.ensure_dir().await?;
    let nginx = Arc::new(NginxManager::from_config(&config, artifacts.clone()));
    let queue = CertQueue::default();

    let ca = ZeroSslClient::new(
        &config.zerossl_api_url,
        config.zerossl_api_key.clone(),
        HTTP_CLIENT_TIMEOUT,
    )?;
    let dns = CloudflareClient::new(
        &config.cloudflare_api_url,
        config.cloudflare_api_token.clone(),
        HTTP_CLIENT_TIMEOUT,
    )?;
    let pipeline = IssuancePipeline::new(
        Arc::new(ca),
        Arc::new(dns),
        config.cloudflare_zone_ids.clone(),
        IssuanceSettings::from_config(&config),
    );

    let sites = Arc::new(SiteService::new(
        registry.clone(),
        nginx.clone(),
        queue.clone(),
        artifacts.clone(),
    ));
    if let Err(err) = sites.apply().await {
        warn!("initial config regeneration failed: {}", err);
    }

    let renew_before = chrono::Duration::days(config.cert_renew_before_days);
    let engine = CertEngine {
        worker: CertWorker::new(
            queue.clone(),
            Arc::new(pipeline),
            artifacts.clone(),
            registry.clone(),
            nginx.clone(),
            renew_before,
        )
        // retry policy plugs in here
        .with_failure_hook(Arc::new(DropFailedTask)),
        scanner: ExpiryScanner::new(
            registry.clone(),
            artifacts.clone(),
            queue.clone(),
            renew_before,
            Duration::from_secs(config.cert_scan_interval_secs),
        ),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_tasks = engine.spawn(shutdown_rx.clone());

    let state = AppState {
        sites,
        auth: Arc::new(AuthService::from_config(&config)),
        static_dir: config.static_dir.clone(),
    };

    let control_addr = config.control_plane_addr.clone();
    let mut api_shutdown = shutdown_rx.clone();
    let api_task = tokio::spawn(async move {
        let app = api::router(state);
        match tokio::net::TcpListener::bind(&control_addr).await {
            Ok(listener) => {
                info!("control plane listening on {}", control_addr);
                let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                    certs::shutdown_requested(&mut api_shutdown).await;
                });
                if let Err(err) = serve.await {
                    warn!("control plane exited: {}", err);
                }
            }
            Err(err) => warn!("failed to bind control plane: {}", err),
        }
    });

    tokio::select! {
        _ = api_task => {},
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    let _ = shutdown_tx.send(true);
    for task in engine_tasks {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("background task did not stop within {}s", SHUTDOWN_GRACE.as_secs());
        }
    }

    Ok(())
}

fn warn_missing_credentials(config: &AppConfig) {
    if config.zerossl_api_key.is_none() {
        warn!("ZEROSSL_API_KEY not set, certificate issuance will fail");
    }
    if config.cloudflare_api_token.is_none() {
        warn!("CLOUDFLARE_API_TOKEN not set, DNS validation will fail");
    }
    if config.cloudflare_zone_ids.is_empty() {
        warn!("CLOUDFLARE_ZONE_IDS is empty, no domain can be validated");
    }
    if config.zerossl_api_url != ZEROSSL_API_BASE {
        info!("using ZeroSSL endpoint {}", config.zerossl_api_url);
    }
    if config.cloudflare_api_url != CLOUDFLARE_API_BASE {
        info!("using Cloudflare endpoint {}", config.cloudflare_api_url);
    }
}
