//! Reliability ranking of validated descriptors

use crate::database::StabilityRecord;
use crate::pipeline::models::{ProxyDescriptor, ValidationOutcome};
use std::cmp::Ordering;

/// A validated descriptor paired with its current stability record
#[derive(Debug, Clone)]
pub struct RankedEntry {
    pub outcome: ValidationOutcome,
    pub record: StabilityRecord,
}

impl RankedEntry {
    pub fn new(outcome: ValidationOutcome, record: StabilityRecord) -> Self {
        Self { outcome, record }
    }

    pub fn descriptor(&self) -> &ProxyDescriptor {
        &self.outcome.descriptor
    }
}

/// Deterministic total ordering over validated descriptors
pub struct Ranker;

impl Ranker {
    /// Sort entries best-first: reliability score descending, mean stage
    /// latency ascending, canonical key ascending. The final key makes
    /// the order total, so repeated invocations agree.
    pub fn rank(mut entries: Vec<RankedEntry>) -> Vec<RankedEntry> {
        entries.sort_by(Self::compare);
        entries
    }

    fn compare(a: &RankedEntry, b: &RankedEntry) -> Ordering {
        b.record
            .reliability_score
            .total_cmp(&a.record.reliability_score)
            .then_with(|| {
                a.outcome
                    .mean_latency_ms()
                    .total_cmp(&b.outcome.mean_latency_ms())
            })
            .then_with(|| {
                a.descriptor()
                    .canonical_key()
                    .cmp(&b.descriptor().canonical_key())
            })
    }

    /// First `n` descriptors of the ranked order; fewer if the population
    /// is smaller. Never pads, never errors.
    pub fn select_top(ranked: &[RankedEntry], n: usize) -> Vec<ProxyDescriptor> {
        ranked
            .iter()
            .take(n)
            .map(|entry| entry.descriptor().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::StabilityRecord;
    use crate::pipeline::models::{Credentials, ProtocolKind, Stage};

    fn entry(host: &str, score: f64, latency_ms: u64) -> RankedEntry {
        let descriptor = ProxyDescriptor::new(
            ProtocolKind::Vless,
            host.to_string(),
            443,
            Credentials::new("uuid".to_string(), vec![]),
            format!("vless://uuid@{}:443", host),
        );
        let mut record = StabilityRecord::fresh(descriptor.canonical_key());
        record.reliability_score = score;
        let outcome = ValidationOutcome::passed(
            descriptor,
            vec![(Stage::ReachabilityChecked, latency_ms)],
        );
        RankedEntry::new(outcome, record)
    }

    #[test]
    fn test_orders_by_score_descending() {
        let ranked = Ranker::rank(vec![
            entry("low", 0.6, 10),
            entry("high", 0.9, 10),
            entry("mid", 0.7, 10),
        ]);
        let hosts: Vec<_> = ranked.iter().map(|e| e.descriptor().host.clone()).collect();
        assert_eq!(hosts, vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_latency_breaks_score_ties() {
        let ranked = Ranker::rank(vec![entry("slow", 0.8, 200), entry("fast", 0.8, 20)]);
        assert_eq!(ranked[0].descriptor().host, "fast");
    }

    #[test]
    fn test_canonical_key_breaks_full_ties() {
        let a = entry("tie-a", 0.8, 50);
        let b = entry("tie-b", 0.8, 50);
        let expected_first = a
            .descriptor()
            .canonical_key()
            .min(b.descriptor().canonical_key());
        let ranked = Ranker::rank(vec![b, a]);
        assert_eq!(ranked[0].descriptor().canonical_key(), expected_first);
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let make = || {
            vec![
                entry("a", 0.5, 30),
                entry("b", 0.9, 10),
                entry("c", 0.5, 30),
            ]
        };
        let first: Vec<_> = Ranker::rank(make())
            .iter()
            .map(|e| e.descriptor().host.clone())
            .collect();
        let second: Vec<_> = Ranker::rank(make())
            .iter()
            .map(|e| e.descriptor().host.clone())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_select_top_picks_best() {
        let ranked = Ranker::rank(vec![entry("low", 0.6, 10), entry("high", 0.9, 10)]);
        let top = Ranker::select_top(&ranked, 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].host, "high");
    }

    #[test]
    fn test_select_top_beyond_population() {
        let ranked = Ranker::rank(vec![entry("only", 0.5, 10)]);
        let top = Ranker::select_top(&ranked, 100);
        assert_eq!(top.len(), 1);
    }

    #[test]
    fn test_select_top_zero() {
        let ranked = Ranker::rank(vec![entry("only", 0.5, 10)]);
        assert!(Ranker::select_top(&ranked, 0).is_empty());
    }
}
