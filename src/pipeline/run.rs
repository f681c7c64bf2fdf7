//! End-to-end pipeline orchestration
//!
//! Wires the stages together: fetch subscription payloads, parse and
//! deduplicate descriptors, validate them concurrently, fold outcomes
//! into the stability store, rank, and emit the curated sets.

use crate::database::{StabilityRecord, StabilityStore};
use crate::pipeline::dedup::Deduplicator;
use crate::pipeline::fetch::{load_sources_file, SourceFetcher, SourceSpec};
use crate::pipeline::geo::GeoLocator;
use crate::pipeline::models::{ProxyDescriptor, ValidationOutcome};
use crate::pipeline::output::{decorate_remarks, OutputAssembler};
use crate::pipeline::parser::DescriptorParser;
use crate::pipeline::rank::{RankedEntry, Ranker};
use crate::pipeline::validator::Validator;
use crate::Result;
use std::path::PathBuf;
use tracing::{info, warn};

/// Counters for a completed pipeline run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Sources fetched successfully
    pub sources_ok: usize,
    /// Sources that failed to fetch
    pub sources_failed: usize,
    /// Descriptors parsed from all payloads
    pub parsed: usize,
    /// Descriptors surviving deduplication
    pub unique: usize,
    /// Descriptors that passed every validation stage
    pub valid: usize,
    /// Descriptors that failed a validation stage
    pub invalid: usize,
    /// Descriptors skipped because the run was cancelled
    pub not_attempted: usize,
    /// Curated set files written
    pub sets_written: Vec<PathBuf>,
}

/// Everything a run needs besides the store
pub struct Pipeline {
    validator: Validator,
    geo: Option<GeoLocator>,
    assembler: OutputAssembler,
}

impl Pipeline {
    pub fn new(validator: Validator, geo: Option<GeoLocator>, assembler: OutputAssembler) -> Self {
        Self {
            validator,
            geo,
            assembler,
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Full run: load the sources file, fetch every subscription, then
    /// process the payloads.
    pub async fn run(
        &self,
        sources_path: &std::path::Path,
        store: &StabilityStore,
    ) -> Result<RunSummary> {
        let sources = load_sources_file(sources_path)?;
        self.run_from_sources(&sources, store).await
    }

    pub async fn run_from_sources(
        &self,
        sources: &[SourceSpec],
        store: &StabilityStore,
    ) -> Result<RunSummary> {
        let fetcher = SourceFetcher::new()?;
        let results = fetcher.fetch_all(sources).await;
        let sources_ok = results.iter().filter(|r| r.is_success()).count();
        let sources_failed = results.len() - sources_ok;
        let payloads: Vec<String> = results
            .into_iter()
            .filter(|r| r.is_success())
            .map(|r| r.payload)
            .collect();

        let mut summary = self.run_from_payloads(&payloads, store).await?;
        summary.sources_ok = sources_ok;
        summary.sources_failed = sources_failed;
        Ok(summary)
    }

    /// Process raw subscription payloads through the whole pipeline.
    /// Outcomes are folded into the store in completion order; cancelled
    /// descriptors leave their records untouched.
    pub async fn run_from_payloads(
        &self,
        payloads: &[String],
        store: &StabilityStore,
    ) -> Result<RunSummary> {
        let mut parsed: Vec<ProxyDescriptor> = Vec::new();
        for payload in payloads {
            parsed.extend(DescriptorParser::parse_payload(payload));
        }
        let parsed_count = parsed.len();

        let unique = Deduplicator::dedup(parsed);
        let unique_count = unique.len();
        info!(parsed = parsed_count, unique = unique_count, "parsed subscription payloads");

        // With the local uplink down, every check would fail and zero the
        // stored success streaks. Skip the run instead of recording a
        // false failure for each endpoint.
        if !unique.is_empty() && !self.validator.has_connectivity().await {
            warn!("no outbound connectivity, skipping validation");
            return Ok(RunSummary {
                parsed: parsed_count,
                unique: unique_count,
                not_attempted: unique_count,
                ..Default::default()
            });
        }

        let outcomes = self.validator.validate_all(unique).await;

        let mut valid: Vec<(ValidationOutcome, StabilityRecord)> = Vec::new();
        let mut invalid = 0usize;
        let mut not_attempted = 0usize;
        for outcome in outcomes {
            if !outcome.was_attempted() {
                not_attempted += 1;
                continue;
            }
            let key = outcome.descriptor.canonical_key();
            let record = store.record_outcome(&key, outcome.is_valid()).await?;
            if outcome.is_valid() {
                valid.push((outcome, record));
            } else {
                invalid += 1;
            }
        }

        let mut descriptors: Vec<ProxyDescriptor> =
            valid.iter().map(|(o, _)| o.descriptor.clone()).collect();
        if let Some(geo) = &self.geo {
            for descriptor in descriptors.iter_mut() {
                descriptor.country_code = geo.country_for_host(&descriptor.host).await;
            }
        }
        decorate_remarks(&mut descriptors);

        let entries: Vec<RankedEntry> = valid
            .into_iter()
            .zip(descriptors)
            .map(|((mut outcome, record), descriptor)| {
                outcome.descriptor = descriptor;
                RankedEntry::new(outcome, record)
            })
            .collect();

        let ranked = Ranker::rank(entries);
        let sets = self.assembler.assemble(&ranked);
        let sets_written = self.assembler.write_sets(&sets)?;

        Ok(RunSummary {
            sources_ok: 0,
            sources_failed: 0,
            parsed: parsed_count,
            unique: unique_count,
            valid: ranked.len(),
            invalid,
            not_attempted,
            sets_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::core::{CoreVerdict, ProtocolVerifier};
    use crate::pipeline::models::ProtocolKind;
    use crate::pipeline::stages::Prober;
    use crate::pipeline::validator::ValidatorConfig;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    struct AlwaysUp;

    #[async_trait]
    impl Prober for AlwaysUp {
        async fn ping(&self, _host: &str, _timeout: Duration) -> bool {
            true
        }
        async fn connect(&self, _host: &str, _port: u16, _timeout: Duration) -> bool {
            true
        }
        async fn tls_handshake(
            &self,
            _host: &str,
            _port: u16,
            _sni: &str,
            _timeout: Duration,
        ) -> bool {
            true
        }
    }

    struct Offline;

    #[async_trait]
    impl Prober for Offline {
        async fn ping(&self, _host: &str, _timeout: Duration) -> bool {
            false
        }
        async fn connect(&self, _host: &str, _port: u16, _timeout: Duration) -> bool {
            false
        }
        async fn tls_handshake(
            &self,
            _host: &str,
            _port: u16,
            _sni: &str,
            _timeout: Duration,
        ) -> bool {
            false
        }
    }

    struct RejectHost(&'static str);

    #[async_trait]
    impl Prober for RejectHost {
        async fn ping(&self, host: &str, _timeout: Duration) -> bool {
            host != self.0
        }
        async fn connect(&self, _host: &str, _port: u16, _timeout: Duration) -> bool {
            true
        }
        async fn tls_handshake(
            &self,
            _host: &str,
            _port: u16,
            _sni: &str,
            _timeout: Duration,
        ) -> bool {
            true
        }
    }

    #[derive(Debug)]
    struct PassVerifier;

    #[async_trait]
    impl ProtocolVerifier for PassVerifier {
        async fn verify(&self, _descriptor: &ProxyDescriptor, _timeout: Duration) -> CoreVerdict {
            CoreVerdict::Passed { latency_ms: 5 }
        }
    }

    fn pipeline(prober: Arc<dyn Prober>, output_dir: &std::path::Path) -> Pipeline {
        let validator = Validator::new(
            ValidatorConfig::new().with_concurrency(4),
            prober,
            Arc::new(PassVerifier),
        );
        Pipeline::new(validator, None, OutputAssembler::new(output_dir, 100))
    }

    fn payload() -> String {
        [
            "vless://11111111-1111-1111-1111-111111111111@one.example.com:443?security=tls",
            "vless://11111111-1111-1111-1111-111111111111@one.example.com:443?security=tls",
            "trojan://secret@two.example.com:443",
        ]
        .join("\n")
    }

    #[tokio::test]
    async fn test_run_counts_and_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = StabilityStore::open_in_memory().await.unwrap();
        let pipeline = pipeline(Arc::new(AlwaysUp), dir.path());

        let summary = pipeline
            .run_from_payloads(&[payload()], &store)
            .await
            .unwrap();

        assert_eq!(summary.parsed, 3);
        assert_eq!(summary.unique, 2);
        assert_eq!(summary.valid, 2);
        assert_eq!(summary.invalid, 0);
        assert_eq!(summary.not_attempted, 0);
        assert!(!summary.sets_written.is_empty());

        let all_valid = dir.path().join("all-valid.txt");
        let body = std::fs::read_to_string(&all_valid).unwrap();
        assert_eq!(body.lines().count(), 2);
        // Remarks were decorated before assembly
        assert!(body.contains("[Curated]"));
    }

    #[tokio::test]
    async fn test_failed_descriptor_recorded_and_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let store = StabilityStore::open_in_memory().await.unwrap();
        let pipeline = pipeline(Arc::new(RejectHost("two.example.com")), dir.path());

        let summary = pipeline
            .run_from_payloads(&[payload()], &store)
            .await
            .unwrap();

        assert_eq!(summary.valid, 1);
        assert_eq!(summary.invalid, 1);

        // The failure still updated the store
        let failed = DescriptorParser::parse_line("trojan://secret@two.example.com:443").unwrap();
        let record = store
            .get(&failed.canonical_key())
            .await
            .unwrap()
            .expect("record should exist");
        assert_eq!(record.failure_count, 1);
        assert_eq!(record.success_count, 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = StabilityStore::open_in_memory().await.unwrap();
        let pipeline = pipeline(Arc::new(AlwaysUp), dir.path());
        pipeline.validator().cancel_flag().store(true, Ordering::SeqCst);

        let summary = pipeline
            .run_from_payloads(&[payload()], &store)
            .await
            .unwrap();

        assert_eq!(summary.valid, 0);
        assert_eq!(summary.not_attempted, 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    // A host with no uplink at all must not record a failure for every
    // endpoint and reset the stored streaks.
    #[tokio::test]
    async fn test_offline_run_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = StabilityStore::open_in_memory().await.unwrap();
        store.record_outcome("existing", true).await.unwrap();
        let pipeline = pipeline(Arc::new(Offline), dir.path());

        let summary = pipeline
            .run_from_payloads(&[payload()], &store)
            .await
            .unwrap();

        assert_eq!(summary.unique, 2);
        assert_eq!(summary.not_attempted, 2);
        assert_eq!(summary.valid, 0);
        assert_eq!(summary.invalid, 0);
        assert!(summary.sets_written.is_empty());

        // Prior history is intact and no output was overwritten
        assert_eq!(store.count().await.unwrap(), 1);
        let existing = store.get("existing").await.unwrap().unwrap();
        assert_eq!(existing.success_streak, 1);
        assert!(!dir.path().join("all-valid.txt").exists());
    }

    #[tokio::test]
    async fn test_repeated_runs_grow_streaks() {
        let dir = tempfile::tempdir().unwrap();
        let store = StabilityStore::open_in_memory().await.unwrap();
        let pipeline = pipeline(Arc::new(AlwaysUp), dir.path());

        pipeline.run_from_payloads(&[payload()], &store).await.unwrap();
        pipeline.run_from_payloads(&[payload()], &store).await.unwrap();

        let d = DescriptorParser::parse_line(
            "vless://11111111-1111-1111-1111-111111111111@one.example.com:443?security=tls",
        )
        .unwrap();
        let record = store.get(&d.canonical_key()).await.unwrap().unwrap();
        assert_eq!(record.success_count, 2);
        assert_eq!(record.success_streak, 2);
    }

    #[test]
    fn test_kind_checks_for_payload_fixture() {
        let descriptors = DescriptorParser::parse_payload(&payload());
        assert!(descriptors.iter().any(|d| d.kind == ProtocolKind::Trojan));
    }
}
