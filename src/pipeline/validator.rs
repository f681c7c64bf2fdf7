//! Multi-stage concurrent descriptor validation
//!
//! Each descriptor walks a strictly sequential stage machine on a single
//! worker: reachability, TCP connect, TLS handshake (protocol permitting),
//! then delegated protocol verification. The first failing stage
//! short-circuits the rest. A bounded semaphore limits outbound pressure.

use crate::pipeline::core::{CoreVerdict, ProtocolVerifier};
use crate::pipeline::models::{FailureReason, ProxyDescriptor, Stage, ValidationOutcome};
use crate::pipeline::stages::Prober;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::debug;

/// Default number of concurrent validations
const DEFAULT_CONCURRENCY: usize = 10;

/// Anchor endpoints probed to tell a local outage apart from dead proxies
const CONNECTIVITY_ANCHORS: &[(&str, u16)] = &[("1.1.1.1", 53), ("8.8.8.8", 53)];

/// Configuration for the validator
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Number of descriptors validated in parallel
    pub concurrency: usize,
    /// Timeout for the ICMP reachability stage
    pub ping_timeout: Duration,
    /// Timeout for the TCP connect stage
    pub connect_timeout: Duration,
    /// Timeout for the TLS handshake stage
    pub tls_timeout: Duration,
    /// Timeout for the delegated protocol verification stage
    pub verify_timeout: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            ping_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
            tls_timeout: Duration::from_secs(5),
            verify_timeout: Duration::from_secs(12),
        }
    }
}

impl ValidatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_tls_timeout(mut self, timeout: Duration) -> Self {
        self.tls_timeout = timeout;
        self
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }
}

/// Multi-stage validator over injected probe and verifier capabilities
pub struct Validator {
    config: ValidatorConfig,
    prober: Arc<dyn Prober>,
    verifier: Arc<dyn ProtocolVerifier>,
    cancelled: Arc<AtomicBool>,
}

impl Validator {
    pub fn new(
        config: ValidatorConfig,
        prober: Arc<dyn Prober>,
        verifier: Arc<dyn ProtocolVerifier>,
    ) -> Self {
        Self {
            config,
            prober,
            verifier,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared cancellation flag. Once set, no new stage attempts are
    /// issued; descriptors not yet validated come back as NotAttempted.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Whether this host has outbound connectivity at all. A run checks
    /// this before validating: with the uplink down every endpoint would
    /// fail and wipe its stored success streak.
    pub async fn has_connectivity(&self) -> bool {
        for (host, port) in CONNECTIVITY_ANCHORS {
            if self
                .prober
                .connect(host, *port, self.config.connect_timeout)
                .await
            {
                return true;
            }
        }
        false
    }

    /// Run the full stage sequence for one descriptor.
    ///
    /// Idempotent within a run: identical network conditions yield the
    /// same stage and reason.
    pub async fn validate(&self, descriptor: ProxyDescriptor) -> ValidationOutcome {
        if self.is_cancelled() {
            return ValidationOutcome::not_attempted(descriptor);
        }

        let mut latencies: Vec<(Stage, u64)> = Vec::new();

        // Stage 1: ICMP reachability
        let start = Instant::now();
        if !self
            .prober
            .ping(&descriptor.host, self.config.ping_timeout)
            .await
        {
            debug!(endpoint = %descriptor.endpoint(), "host unreachable");
            return ValidationOutcome::failed(
                descriptor,
                Stage::Pending,
                FailureReason::UnreachableHost,
                latencies,
            );
        }
        latencies.push((Stage::ReachabilityChecked, start.elapsed().as_millis() as u64));

        if self.is_cancelled() {
            return ValidationOutcome::not_attempted(descriptor);
        }

        // Stage 2: TCP connect, skipped for QUIC-based kinds
        if descriptor.kind.uses_tcp() {
            let start = Instant::now();
            if !self
                .prober
                .connect(&descriptor.host, descriptor.port, self.config.connect_timeout)
                .await
            {
                debug!(endpoint = %descriptor.endpoint(), "transport connect failed");
                return ValidationOutcome::failed(
                    descriptor,
                    Stage::ReachabilityChecked,
                    FailureReason::UnreachableHost,
                    latencies,
                );
            }
            latencies.push((Stage::TransportChecked, start.elapsed().as_millis() as u64));
        }

        if self.is_cancelled() {
            return ValidationOutcome::not_attempted(descriptor);
        }

        // Stage 3: TLS handshake, only for protocols that negotiate TLS
        // on their listener
        if descriptor.kind.requires_tls() {
            let sni = descriptor
                .credentials
                .param("sni")
                .unwrap_or(&descriptor.host)
                .to_string();
            let start = Instant::now();
            if !self
                .prober
                .tls_handshake(&descriptor.host, descriptor.port, &sni, self.config.tls_timeout)
                .await
            {
                debug!(endpoint = %descriptor.endpoint(), "TLS handshake failed");
                return ValidationOutcome::failed(
                    descriptor,
                    Stage::TransportChecked,
                    FailureReason::SecureChannelFailed,
                    latencies,
                );
            }
            latencies.push((Stage::SecureChannelChecked, start.elapsed().as_millis() as u64));
        }

        if self.is_cancelled() {
            return ValidationOutcome::not_attempted(descriptor);
        }

        // Stage 4: delegated protocol verification
        let start = Instant::now();
        let verdict = self
            .verifier
            .verify(&descriptor, self.config.verify_timeout)
            .await;
        match verdict {
            CoreVerdict::Passed { latency_ms } => {
                let measured = if latency_ms > 0 {
                    latency_ms
                } else {
                    start.elapsed().as_millis() as u64
                };
                latencies.push((Stage::ProtocolVerified, measured));
                ValidationOutcome::passed(descriptor, latencies)
            }
            CoreVerdict::Failed => {
                // Stages a kind does not use count as completed, so a
                // verification failure always lands past the secure
                // channel stage regardless of kind.
                ValidationOutcome::failed(
                    descriptor,
                    Stage::SecureChannelChecked,
                    FailureReason::ProtocolVerificationFailed,
                    latencies,
                )
            }
        }
    }

    /// Validate descriptors under the configured concurrency bound.
    /// Completion order is arbitrary; callers re-establish determinism
    /// downstream.
    pub async fn validate_all(&self, descriptors: Vec<ProxyDescriptor>) -> Vec<ValidationOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        stream::iter(descriptors)
            .map(|descriptor| {
                let sem = Arc::clone(&semaphore);
                let validator = self.clone();
                async move {
                    // The semaphore lives as long as every permit holder,
                    // so acquire only fails if it were closed explicitly
                    let _permit = sem.acquire().await.expect("semaphore closed unexpectedly");
                    validator.validate(descriptor).await
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect::<Vec<_>>()
            .await
    }

    /// Validate and split into (valid, invalid) outcome lists
    pub async fn validate_and_partition(
        &self,
        descriptors: Vec<ProxyDescriptor>,
    ) -> (Vec<ValidationOutcome>, Vec<ValidationOutcome>) {
        let outcomes = self.validate_all(descriptors).await;
        outcomes.into_iter().partition(|o| o.is_valid())
    }
}

impl Clone for Validator {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            prober: Arc::clone(&self.prober),
            verifier: Arc::clone(&self.verifier),
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}
