//! Deduplication of parsed descriptors
//!
//! Sources overlap heavily and merged list files occasionally carry
//! unresolved git conflict markers, so this pass guards the rest of the
//! pipeline against both duplicates and corrupt lines.

use crate::pipeline::models::ProxyDescriptor;
use std::collections::HashSet;
use tracing::debug;

/// Git conflict markers that mark a line as merge debris
const MERGE_MARKERS: &[&str] = &["<<<<<<<", "=======", ">>>>>>>"];

/// Descriptor deduplicator keyed on the canonical key
pub struct Deduplicator;

impl Deduplicator {
    /// Keep one descriptor per canonical key, preferring the first
    /// occurrence (input order encodes source priority). Descriptors with
    /// merge debris or structurally invalid fields are discarded.
    pub fn dedup(descriptors: Vec<ProxyDescriptor>) -> Vec<ProxyDescriptor> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut unique = Vec::new();
        let total = descriptors.len();

        for descriptor in descriptors {
            if Self::is_corrupt(&descriptor) {
                continue;
            }
            if seen.insert(descriptor.canonical_key()) {
                unique.push(descriptor);
            }
        }

        debug!(total, kept = unique.len(), "deduplicated descriptors");
        unique
    }

    fn is_corrupt(descriptor: &ProxyDescriptor) -> bool {
        if !descriptor.is_structurally_valid() {
            return true;
        }
        MERGE_MARKERS
            .iter()
            .any(|marker| descriptor.raw.contains(marker))
    }
}
