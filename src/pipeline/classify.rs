//! Grouping of validated descriptors by protocol kind and country

use crate::pipeline::models::{ProtocolKind, ProxyDescriptor};
use std::collections::{BTreeMap, HashMap};

/// Country code used for descriptors whose origin could not be resolved
pub const UNRESOLVED_COUNTRY: &str = "XX";

/// Pure partitioning of descriptor sequences. Input order is preserved
/// within every group.
pub struct Classifier;

impl Classifier {
    /// Partition by protocol kind
    pub fn by_kind(descriptors: &[ProxyDescriptor]) -> HashMap<ProtocolKind, Vec<ProxyDescriptor>> {
        let mut groups: HashMap<ProtocolKind, Vec<ProxyDescriptor>> = HashMap::new();
        for descriptor in descriptors {
            groups
                .entry(descriptor.kind)
                .or_default()
                .push(descriptor.clone());
        }
        groups
    }

    /// Partition by country code. Unresolved descriptors land only in the
    /// "XX" catch-all group, never in a specific country.
    pub fn by_country(descriptors: &[ProxyDescriptor]) -> BTreeMap<String, Vec<ProxyDescriptor>> {
        let mut groups: BTreeMap<String, Vec<ProxyDescriptor>> = BTreeMap::new();
        for descriptor in descriptors {
            let country = if descriptor.country_code.is_empty() {
                UNRESOLVED_COUNTRY.to_string()
            } else {
                descriptor.country_code.clone()
            };
            groups.entry(country).or_default().push(descriptor.clone());
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::models::Credentials;

    fn descriptor(kind: ProtocolKind, host: &str, country: &str) -> ProxyDescriptor {
        let mut d = ProxyDescriptor::new(
            kind,
            host.to_string(),
            443,
            Credentials::new("id".to_string(), vec![]),
            format!("{}://id@{}:443", kind.scheme(), host),
        );
        d.country_code = country.to_string();
        d
    }

    #[test]
    fn test_by_kind() {
        let input = vec![
            descriptor(ProtocolKind::Vmess, "a", "US"),
            descriptor(ProtocolKind::Vless, "b", "US"),
            descriptor(ProtocolKind::Vmess, "c", "DE"),
        ];
        let groups = Classifier::by_kind(&input);
        assert_eq!(groups[&ProtocolKind::Vmess].len(), 2);
        assert_eq!(groups[&ProtocolKind::Vless].len(), 1);
        // Input order preserved within a group
        assert_eq!(groups[&ProtocolKind::Vmess][0].host, "a");
        assert_eq!(groups[&ProtocolKind::Vmess][1].host, "c");
    }

    #[test]
    fn test_by_country() {
        let input = vec![
            descriptor(ProtocolKind::Vmess, "a", "IR"),
            descriptor(ProtocolKind::Vless, "b", "XX"),
            descriptor(ProtocolKind::Trojan, "c", "IR"),
        ];
        let groups = Classifier::by_country(&input);
        assert_eq!(groups["IR"].len(), 2);
        assert_eq!(groups["XX"].len(), 1);
    }

    #[test]
    fn test_unresolved_goes_only_to_catch_all() {
        let input = vec![descriptor(ProtocolKind::Vmess, "a", "XX")];
        let groups = Classifier::by_country(&input);
        assert_eq!(groups.len(), 1);
        assert!(groups.contains_key("XX"));
    }
}
