use crate::certs::{ArtifactStore, CertQueue, Issuer, shutdown_requested};
use crate::metrics;
use crate::nginx::NginxManager;
use crate::registry::SiteRegistry;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// 单个证书任务的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Existing pair is still fresh; nothing was contacted.
    Skipped,
    Installed {
        expires_at: DateTime<Utc>,
        reloaded: bool,
    },
    Failed(String),
    /// Shutdown arrived while the pipeline was still talking to the authority.
    Cancelled,
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Installed { .. } => "installed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Called once per failed task. The default drops the task; a retry policy can re-enqueue.
#[async_trait]
pub trait FailureHook: Send + Sync {
    async fn on_failure(&self, domain: &str, reason: &str, queue: &CertQueue);
}

pub struct DropFailedTask;

#[async_trait]
impl FailureHook for DropFailedTask {
    async fn on_failure(&self, domain: &str, reason: &str, _queue: &CertQueue) {
        warn!(
            domain = %domain,
            reason = %reason,
            "certificate task dropped until the next expiry scan or manual request"
        );
    }
}

pub struct CertWorker {
    queue: CertQueue,
    issuer: Arc<dyn Issuer>,
    artifacts: ArtifactStore,
    registry: Arc<SiteRegistry>,
    nginx: Arc<NginxManager>,
    renew_before: Duration,
    failure_hook: Arc<dyn FailureHook>,
}

impl CertWorker {
    pub fn new(
        queue: CertQueue,
        issuer: Arc<dyn Issuer>,
        artifacts: ArtifactStore,
        registry: Arc<SiteRegistry>,
        nginx: Arc<NginxManager>,
        renew_before: Duration,
    ) -> Self {
        Self {
            queue,
            issuer,
            artifacts,
            registry,
            nginx,
            renew_before,
            failure_hook: Arc::new(DropFailedTask),
        }
    }

    pub fn with_failure_hook(mut self, hook: Arc<dyn FailureHook>) -> Self {
        self.failure_hook = hook;
        self
    }

    /// Runs until the shutdown flag flips. One task is in flight at a time.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("certificate worker started");
        loop {
            let domain = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                domain = self.queue.dequeue() => domain,
            };

            match self.process(&domain, &mut shutdown).await {
                TaskOutcome::Skipped => {}
                TaskOutcome::Installed {
                    expires_at,
                    reloaded,
                } => {
                    info!(domain = %domain, expires_at = %expires_at, reloaded, "certificate task finished");
                }
                TaskOutcome::Failed(reason) => {
                    self.failure_hook
                        .on_failure(&domain, &reason, &self.queue)
                        .await;
                }
                TaskOutcome::Cancelled => break,
            }
        }
        info!("certificate worker stopped");
    }

    /// Checking, then Issuing, then Installed or Failed.
    ///
    /// Once material is in hand, install + regenerate + reload run to completion
    /// even if shutdown is requested meanwhile.
    pub async fn process(&self, domain: &str, shutdown: &mut watch::Receiver<bool>) -> TaskOutcome {
        let outcome = self.process_inner(domain, shutdown).await;
        metrics::inc_cert_task(outcome.label());
        outcome
    }

    async fn process_inner(&self, domain: &str, shutdown: &mut watch::Receiver<bool>) -> TaskOutcome {
        if self.artifacts.is_fresh(domain, self.renew_before).await {
            info!(domain = %domain, "certificate still fresh, skipping");
            return TaskOutcome::Skipped;
        }

        info!(domain = %domain, "issuing certificate");
        let domains = vec![domain.to_string()];
        let issued = tokio::select! {
            result = self.issuer.issue(&domains) => result,
            _ = shutdown_requested(shutdown) => {
                warn!(domain = %domain, "issuance abandoned for shutdown");
                return TaskOutcome::Cancelled;
            }
        };

        let issued = match issued {
            Ok(Some(issued)) if issued.is_complete() => issued,
            Ok(_) => {
                let reason = "authority returned no certificate material".to_string();
                error!(domain = %domain, "{}", reason);
                return TaskOutcome::Failed(reason);
            }
            Err(err) => {
                error!(domain = %domain, error = %err, "certificate issuance failed");
                return TaskOutcome::Failed(err.to_string());
            }
        };

        let (expires_at, reloaded) = match self
            .nginx
            .install_and_apply(domain, &issued, &self.registry)
            .await
        {
            Ok(activated) => activated,
            Err(err) => {
                error!(domain = %domain, error = %err, "failed to install certificate");
                return TaskOutcome::Failed(err.to_string());
            }
        };
        if !reloaded {
            warn!(domain = %domain, "proxy keeps serving the previous configuration");
        }

        TaskOutcome::Installed {
            expires_at,
            reloaded,
        }
    }
}
