//! Proxy descriptor data models

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Supported tunneling protocol kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolKind {
    Vmess,
    Vless,
    Trojan,
    Shadowsocks,
    ShadowsocksR,
    Hysteria,
    Tuic,
    Juicity,
}

impl ProtocolKind {
    /// All supported kinds, in stable output order
    pub const ALL: [ProtocolKind; 8] = [
        ProtocolKind::Vmess,
        ProtocolKind::Vless,
        ProtocolKind::Trojan,
        ProtocolKind::Shadowsocks,
        ProtocolKind::ShadowsocksR,
        ProtocolKind::Hysteria,
        ProtocolKind::Tuic,
        ProtocolKind::Juicity,
    ];

    /// Resolve a URI scheme to a protocol kind
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_lowercase().as_str() {
            "vmess" => Some(ProtocolKind::Vmess),
            "vless" => Some(ProtocolKind::Vless),
            "trojan" => Some(ProtocolKind::Trojan),
            "ss" => Some(ProtocolKind::Shadowsocks),
            "ssr" => Some(ProtocolKind::ShadowsocksR),
            "hysteria" | "hysteria2" | "hy2" => Some(ProtocolKind::Hysteria),
            "tuic" => Some(ProtocolKind::Tuic),
            "juicity" => Some(ProtocolKind::Juicity),
            _ => None,
        }
    }

    /// Canonical URI scheme for this kind
    pub fn scheme(&self) -> &'static str {
        match self {
            ProtocolKind::Vmess => "vmess",
            ProtocolKind::Vless => "vless",
            ProtocolKind::Trojan => "trojan",
            ProtocolKind::Shadowsocks => "ss",
            ProtocolKind::ShadowsocksR => "ssr",
            ProtocolKind::Hysteria => "hysteria",
            ProtocolKind::Tuic => "tuic",
            ProtocolKind::Juicity => "juicity",
        }
    }

    /// Whether the protocol tunnels over TCP. QUIC-based kinds skip the
    /// TCP connect stage during validation.
    pub fn uses_tcp(&self) -> bool {
        !matches!(
            self,
            ProtocolKind::Hysteria | ProtocolKind::Tuic | ProtocolKind::Juicity
        )
    }

    /// Whether the protocol negotiates TLS directly on its TCP listener.
    /// VMess/VLESS carry optional TLS inside the protocol layer, so only
    /// trojan gets the dedicated handshake stage.
    pub fn requires_tls(&self) -> bool {
        matches!(self, ProtocolKind::Trojan)
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

/// Opaque protocol-specific credential payload.
///
/// `identity` is the protocol's primary secret (UUID, password, or
/// method:password pair); `params` holds the connection-defining
/// parameters in normalized, sorted form. Remarks and metadata never
/// appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Credentials {
    pub identity: String,
    pub params: Vec<(String, String)>,
}

impl Credentials {
    pub fn new(identity: String, mut params: Vec<(String, String)>) -> Self {
        params.retain(|(_, v)| !v.is_empty());
        params.sort();
        Self { identity, params }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Stable textual form used for the canonical key fingerprint
    pub fn fingerprint_input(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}?{}", self.identity, params.join("&"))
    }
}

/// One parsed proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDescriptor {
    pub kind: ProtocolKind,
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    /// ISO 3166-1 alpha-2 country code, "XX" when unresolved
    pub country_code: String,
    /// Human-readable remark from the source URI, ignored for identity
    pub remark: Option<String>,
    /// The raw source line this descriptor was parsed from
    pub raw: String,
}

impl ProxyDescriptor {
    pub fn new(
        kind: ProtocolKind,
        host: String,
        port: u16,
        credentials: Credentials,
        raw: String,
    ) -> Self {
        Self {
            kind,
            host,
            port,
            credentials,
            country_code: "XX".to_string(),
            remark: None,
            raw,
        }
    }

    pub fn with_remark(mut self, remark: Option<String>) -> Self {
        self.remark = remark;
        self
    }

    /// Normalized identity for deduplication and stability tracking.
    ///
    /// Derived from protocol, host, port, and the credential fingerprint.
    /// Two descriptors with equal keys are the same endpoint across runs,
    /// even if the surface text differs (reordered query parameters,
    /// changed remarks).
    pub fn canonical_key(&self) -> String {
        let normalized = format!(
            "{}://{}:{}/{}",
            self.kind.scheme(),
            self.host.to_lowercase(),
            self.port,
            self.credentials.fingerprint_input()
        );
        format!("{:x}", Sha256::digest(normalized.as_bytes()))
    }

    /// Whether all required fields survived parsing intact
    pub fn is_structurally_valid(&self) -> bool {
        !self.host.is_empty() && self.port != 0 && !self.credentials.identity.is_empty()
    }

    /// Connection target in host:port form
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind, self.endpoint())
    }
}

/// Validation stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Pending,
    ReachabilityChecked,
    TransportChecked,
    SecureChannelChecked,
    ProtocolVerified,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::ReachabilityChecked => "reachability",
            Stage::TransportChecked => "transport",
            Stage::SecureChannelChecked => "secure-channel",
            Stage::ProtocolVerified => "protocol",
        };
        write!(f, "{}", name)
    }
}

/// Classified failure kinds for the validation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum FailureReason {
    #[error("malformed source line")]
    ParseSkipped,
    #[error("duplicate descriptor discarded")]
    DuplicateDiscarded,
    #[error("host unreachable")]
    UnreachableHost,
    #[error("TLS handshake failed")]
    SecureChannelFailed,
    #[error("protocol verification failed")]
    ProtocolVerificationFailed,
    #[error("not attempted")]
    NotAttempted,
}

/// Result of validating one descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub descriptor: ProxyDescriptor,
    /// Highest stage completed before failure or full success
    pub stage_reached: Stage,
    /// Latency of each completed stage, in completion order
    pub stage_latency_ms: Vec<(Stage, u64)>,
    /// None on full success
    pub failure: Option<FailureReason>,
}

impl ValidationOutcome {
    pub fn passed(descriptor: ProxyDescriptor, stage_latency_ms: Vec<(Stage, u64)>) -> Self {
        Self {
            descriptor,
            stage_reached: Stage::ProtocolVerified,
            stage_latency_ms,
            failure: None,
        }
    }

    pub fn failed(
        descriptor: ProxyDescriptor,
        stage_reached: Stage,
        reason: FailureReason,
        stage_latency_ms: Vec<(Stage, u64)>,
    ) -> Self {
        Self {
            descriptor,
            stage_reached,
            stage_latency_ms,
            failure: Some(reason),
        }
    }

    /// Outcome for a descriptor skipped due to run cancellation. Never
    /// recorded in the stability store.
    pub fn not_attempted(descriptor: ProxyDescriptor) -> Self {
        Self {
            descriptor,
            stage_reached: Stage::Pending,
            stage_latency_ms: Vec::new(),
            failure: Some(FailureReason::NotAttempted),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.failure.is_none()
    }

    /// Whether any network check actually ran for this descriptor
    pub fn was_attempted(&self) -> bool {
        self.failure != Some(FailureReason::NotAttempted)
    }

    /// Mean latency across completed stages, used as a ranking tie-break
    pub fn mean_latency_ms(&self) -> f64 {
        if self.stage_latency_ms.is_empty() {
            return f64::MAX;
        }
        let total: u64 = self.stage_latency_ms.iter().map(|(_, ms)| ms).sum();
        total as f64 / self.stage_latency_ms.len() as f64
    }
}

/// A named, ordered output collection produced by one pipeline run.
/// Immutable once assembled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratedSet {
    pub name: String,
    pub descriptors: Vec<ProxyDescriptor>,
}

impl CuratedSet {
    pub fn new(name: impl Into<String>, descriptors: Vec<ProxyDescriptor>) -> Self {
        Self {
            name: name.into(),
            descriptors,
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptor-per-line text body for persistence
    pub fn lines(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.raw.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(kind: ProtocolKind, params: Vec<(&str, &str)>) -> ProxyDescriptor {
        let params = params
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProxyDescriptor::new(
            kind,
            "1.2.3.4".to_string(),
            443,
            Credentials::new("uuid-1".to_string(), params),
            "raw".to_string(),
        )
    }

    #[test]
    fn test_scheme_round_trip() {
        for kind in ProtocolKind::ALL {
            assert_eq!(ProtocolKind::from_scheme(kind.scheme()), Some(kind));
        }
        assert_eq!(ProtocolKind::from_scheme("hy2"), Some(ProtocolKind::Hysteria));
        assert_eq!(ProtocolKind::from_scheme("http"), None);
    }

    #[test]
    fn test_quic_kinds_skip_tcp() {
        assert!(ProtocolKind::Vmess.uses_tcp());
        assert!(ProtocolKind::Trojan.uses_tcp());
        assert!(!ProtocolKind::Hysteria.uses_tcp());
        assert!(!ProtocolKind::Tuic.uses_tcp());
        assert!(!ProtocolKind::Juicity.uses_tcp());
    }

    #[test]
    fn test_only_trojan_requires_tls() {
        for kind in ProtocolKind::ALL {
            assert_eq!(kind.requires_tls(), kind == ProtocolKind::Trojan);
        }
    }

    #[test]
    fn test_canonical_key_ignores_param_order() {
        let a = descriptor(
            ProtocolKind::Vless,
            vec![("security", "tls"), ("type", "ws"), ("path", "/ws")],
        );
        let b = descriptor(
            ProtocolKind::Vless,
            vec![("path", "/ws"), ("security", "tls"), ("type", "ws")],
        );
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn test_canonical_key_ignores_remark() {
        let a = descriptor(ProtocolKind::Trojan, vec![("sni", "example.com")]);
        let b = a.clone().with_remark(Some("my node".to_string()));
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn test_canonical_key_distinguishes_endpoints() {
        let a = descriptor(ProtocolKind::Vless, vec![]);
        let mut b = a.clone();
        b.port = 8443;
        assert_ne!(a.canonical_key(), b.canonical_key());

        let mut c = a.clone();
        c.kind = ProtocolKind::Trojan;
        assert_ne!(a.canonical_key(), c.canonical_key());
    }

    #[test]
    fn test_structural_validity() {
        let good = descriptor(ProtocolKind::Vmess, vec![]);
        assert!(good.is_structurally_valid());

        let mut no_host = good.clone();
        no_host.host = String::new();
        assert!(!no_host.is_structurally_valid());

        let mut zero_port = good.clone();
        zero_port.port = 0;
        assert!(!zero_port.is_structurally_valid());

        let mut no_identity = good.clone();
        no_identity.credentials.identity = String::new();
        assert!(!no_identity.is_structurally_valid());
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::Pending < Stage::ReachabilityChecked);
        assert!(Stage::ReachabilityChecked < Stage::TransportChecked);
        assert!(Stage::TransportChecked < Stage::SecureChannelChecked);
        assert!(Stage::SecureChannelChecked < Stage::ProtocolVerified);
    }

    #[test]
    fn test_outcome_helpers() {
        let d = descriptor(ProtocolKind::Vmess, vec![]);

        let ok = ValidationOutcome::passed(
            d.clone(),
            vec![(Stage::ReachabilityChecked, 10), (Stage::TransportChecked, 30)],
        );
        assert!(ok.is_valid());
        assert!(ok.was_attempted());
        assert_eq!(ok.mean_latency_ms(), 20.0);

        let failed = ValidationOutcome::failed(
            d.clone(),
            Stage::ReachabilityChecked,
            FailureReason::UnreachableHost,
            vec![],
        );
        assert!(!failed.is_valid());
        assert!(failed.was_attempted());

        let skipped = ValidationOutcome::not_attempted(d);
        assert!(!skipped.is_valid());
        assert!(!skipped.was_attempted());
        assert_eq!(skipped.stage_reached, Stage::Pending);
    }

    #[test]
    fn test_curated_set_lines() {
        let d = descriptor(ProtocolKind::Vmess, vec![]);
        let set = CuratedSet::new("all-valid", vec![d.clone()]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.lines(), vec!["raw".to_string()]);
    }
}
