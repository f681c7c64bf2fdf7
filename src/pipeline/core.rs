//! Delegated protocol verification through an external proxy core
//!
//! The final validation stage needs a real tunnel: an external core
//! process (xray/v2ray style) is invoked per attempt and performs one
//! outbound request through the endpoint. Its failure modes are opaque
//! (exit code, timeout, missing binary) and all collapse into a single
//! failed verdict.

use crate::pipeline::models::ProxyDescriptor;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Verdict from one protocol verification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreVerdict {
    Passed { latency_ms: u64 },
    Failed,
}

impl CoreVerdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, CoreVerdict::Passed { .. })
    }
}

/// Narrow capability interface to the external proxy core, so the
/// validator can be exercised with substitute implementations
#[async_trait]
pub trait ProtocolVerifier: Send + Sync + std::fmt::Debug {
    async fn verify(&self, descriptor: &ProxyDescriptor, timeout: Duration) -> CoreVerdict;
}

/// Verifier that spawns the configured core binary per attempt.
///
/// The binary is invoked with the descriptor URI as its single argument
/// and must exit zero after completing one tunneled request.
#[derive(Debug)]
pub struct ProcessVerifier {
    binary: PathBuf,
}

impl ProcessVerifier {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ProtocolVerifier for ProcessVerifier {
    async fn verify(&self, descriptor: &ProxyDescriptor, timeout: Duration) -> CoreVerdict {
        let start = Instant::now();
        let spawned = Command::new(&self.binary)
            .arg(&descriptor.raw)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(binary = %self.binary.display(), error = %e, "failed to spawn proxy core");
                return CoreVerdict::Failed;
            }
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => CoreVerdict::Passed {
                latency_ms: start.elapsed().as_millis() as u64,
            },
            Ok(Ok(status)) => {
                debug!(endpoint = %descriptor.endpoint(), ?status, "proxy core rejected endpoint");
                CoreVerdict::Failed
            }
            Ok(Err(e)) => {
                warn!(error = %e, "proxy core wait failed");
                CoreVerdict::Failed
            }
            Err(_) => {
                debug!(endpoint = %descriptor.endpoint(), "proxy core verification timed out");
                CoreVerdict::Failed
            }
        }
    }
}

/// Auto-pass verifier for runs where the operator has no core binary
/// configured and explicitly disabled the verification stage
#[derive(Debug)]
pub struct DisabledVerifier;

#[async_trait]
impl ProtocolVerifier for DisabledVerifier {
    async fn verify(&self, _descriptor: &ProxyDescriptor, _timeout: Duration) -> CoreVerdict {
        CoreVerdict::Passed { latency_ms: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::models::{Credentials, ProtocolKind};

    fn descriptor() -> ProxyDescriptor {
        ProxyDescriptor::new(
            ProtocolKind::Vless,
            "1.2.3.4".to_string(),
            443,
            Credentials::new("uuid".to_string(), vec![]),
            "vless://uuid@1.2.3.4:443".to_string(),
        )
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_failed_verdict() {
        let verifier = ProcessVerifier::new("/nonexistent/proxy-core");
        let verdict = verifier
            .verify(&descriptor(), Duration::from_secs(1))
            .await;
        assert_eq!(verdict, CoreVerdict::Failed);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_a_failed_verdict() {
        let verifier = ProcessVerifier::new("false");
        let verdict = verifier
            .verify(&descriptor(), Duration::from_secs(5))
            .await;
        assert_eq!(verdict, CoreVerdict::Failed);
    }

    #[tokio::test]
    async fn test_zero_exit_passes() {
        let verifier = ProcessVerifier::new("true");
        let verdict = verifier
            .verify(&descriptor(), Duration::from_secs(5))
            .await;
        assert!(verdict.is_passed());
    }

    #[tokio::test]
    async fn test_disabled_verifier_always_passes() {
        let verdict = DisabledVerifier
            .verify(&descriptor(), Duration::from_secs(1))
            .await;
        assert!(verdict.is_passed());
    }
}
