//! 证书生命周期引擎
//!
//! 任务队列 + 单一 worker + 过期扫描器 + 签发流水线。
//! 签发顺序固定为：写入证书/私钥 → 重新生成全部配置 → 重载代理。

pub mod artifacts;
pub mod cloudflare;
pub mod csr;
pub mod pipeline;
pub mod queue;
pub mod scanner;
pub mod worker;
pub mod zerossl;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use webfront_common::Result;

pub use artifacts::ArtifactStore;
pub use pipeline::{IssuancePipeline, IssuanceSettings};
pub use queue::CertQueue;
pub use scanner::ExpiryScanner;
pub use worker::CertWorker;

/// PEM material returned by a successful issuance.
#[derive(Debug, Clone, Default)]
pub struct IssuedCertificate {
    pub certificate: String,
    pub ca_bundle: String,
    pub private_key: String,
}

impl IssuedCertificate {
    pub fn is_complete(&self) -> bool {
        !self.certificate.trim().is_empty() && !self.private_key.trim().is_empty()
    }
}

/// Anything that can turn a list of domains into certificate material.
///
/// `Ok(None)` means the authority never produced a downloadable bundle.
#[async_trait]
pub trait Issuer: Send + Sync {
    async fn issue(&self, domains: &[String]) -> Result<Option<IssuedCertificate>>;
}

/// Resolves once the shutdown flag flips to `true`. A dropped sender never resolves.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let sender_dropped = shutdown.wait_for(|stop| *stop).await.is_err();
    if sender_dropped {
        std::future::pending::<()>().await;
    }
}

pub struct CertEngine {
    pub worker: CertWorker,
    pub scanner: ExpiryScanner,
}

impl CertEngine {
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let worker_shutdown = shutdown.clone();
        vec![
            tokio::spawn(self.worker.run(worker_shutdown)),
            tokio::spawn(self.scanner.run(shutdown)),
        ]
    }
}
