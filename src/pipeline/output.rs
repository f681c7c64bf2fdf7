//! Curated set assembly and persistence
//!
//! The assembler turns ranked validation results into the named output
//! sets (all-valid, per-kind, per-country, top-N) and writes each as a
//! descriptor-per-line text file. Writes go through a temp file and
//! rename so readers never observe a half-written list.

use crate::pipeline::classify::Classifier;
use crate::pipeline::geo::country_flag;
use crate::pipeline::models::{CuratedSet, ProtocolKind, ProxyDescriptor};
use crate::pipeline::rank::{RankedEntry, Ranker};
use crate::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Tag prefixed to every curated remark
const REMARK_TAG: &str = "[Curated]";

/// Rewrite descriptor remarks into the curated naming scheme:
/// `[Curated] <flag> <CC>-<n>` with a per-country counter. Raw URIs are
/// updated so the remark survives in the emitted text.
pub fn decorate_remarks(descriptors: &mut [ProxyDescriptor]) {
    let mut counters: HashMap<String, usize> = HashMap::new();
    for descriptor in descriptors.iter_mut() {
        let count = counters
            .entry(descriptor.country_code.clone())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        let flag = country_flag(&descriptor.country_code);
        let remark = if flag.is_empty() {
            format!("{} {}-{}", REMARK_TAG, descriptor.country_code, count)
        } else {
            format!("{} {} {}-{}", REMARK_TAG, flag, descriptor.country_code, count)
        };
        if let Some(raw) = set_remark(descriptor, &remark) {
            descriptor.raw = raw;
            descriptor.remark = Some(remark);
        }
    }
}

/// Produce the raw URI with the remark replaced. VMess remarks live in
/// the base64 JSON payload; URL-form schemes carry them as the fragment.
/// SSR embeds remarks inside its encoded payload and is left untouched.
fn set_remark(descriptor: &ProxyDescriptor, remark: &str) -> Option<String> {
    match descriptor.kind {
        ProtocolKind::Vmess => {
            let payload = descriptor.raw.strip_prefix("vmess://")?;
            let payload = payload.split('#').next()?;
            let decoded = crate::pipeline::parser::lenient_base64_decode(payload)?;
            let mut obj: Value = serde_json::from_slice(&decoded).ok()?;
            obj.as_object_mut()?
                .insert("ps".to_string(), Value::String(remark.to_string()));
            let body = serde_json::to_string(&obj).ok()?;
            Some(format!("vmess://{}", BASE64.encode(body)))
        }
        ProtocolKind::ShadowsocksR => None,
        _ => {
            let base = descriptor.raw.split('#').next()?;
            Some(format!("{}#{}", base, remark))
        }
    }
}

/// Builds and persists the run's curated sets
pub struct OutputAssembler {
    output_dir: PathBuf,
    top_n: usize,
}

impl OutputAssembler {
    pub fn new(output_dir: impl Into<PathBuf>, top_n: usize) -> Self {
        Self {
            output_dir: output_dir.into(),
            top_n,
        }
    }

    /// Combine ranked results into the named curated sets. Selection and
    /// ordering only; descriptors are never modified here.
    pub fn assemble(&self, ranked: &[RankedEntry]) -> Vec<CuratedSet> {
        let ordered: Vec<ProxyDescriptor> =
            ranked.iter().map(|e| e.descriptor().clone()).collect();

        let mut sets = Vec::new();
        sets.push(CuratedSet::new("all-valid", ordered.clone()));
        sets.push(CuratedSet::new(
            format!("top-{}", self.top_n),
            Ranker::select_top(ranked, self.top_n),
        ));

        let by_kind = Classifier::by_kind(&ordered);
        for kind in ProtocolKind::ALL {
            if let Some(group) = by_kind.get(&kind) {
                sets.push(CuratedSet::new(format!("kind:{}", kind.scheme()), group.clone()));
            }
        }

        for (country, group) in Classifier::by_country(&ordered) {
            sets.push(CuratedSet::new(format!("country:{}", country), group));
        }

        sets
    }

    /// Write every set as a descriptor-per-line text file, atomically
    pub fn write_sets(&self, sets: &[CuratedSet]) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.output_dir)?;
        let mut written = Vec::new();
        for set in sets {
            let path = self.output_dir.join(Self::file_name(&set.name));
            write_lines_atomic(&path, &set.lines())?;
            info!(set = %set.name, count = set.len(), path = %path.display(), "wrote curated set");
            written.push(path);
        }
        Ok(written)
    }

    fn file_name(set_name: &str) -> String {
        format!("{}.txt", set_name.replace(':', "-"))
    }
}

/// Write lines to a temp file in the same directory, then rename over
/// the target
fn write_lines_atomic(path: &Path, lines: &[String]) -> Result<()> {
    let tmp = path.with_extension("txt.tmp");
    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
