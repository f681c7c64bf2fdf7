//! Geographic tagging of proxy endpoints using MMDB

use crate::Result;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::lookup_host;
use tracing::debug;

use crate::pipeline::classify::UNRESOLVED_COUNTRY;

/// Country resolver for looking up endpoint hosts in an MMDB database
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Create a new GeoLocator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Best-effort ISO country code for a host. Hostnames are resolved
    /// first; any failure along the way yields "XX" rather than an error.
    pub async fn country_for_host(&self, host: &str) -> String {
        let ip = match host.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(_) => resolve_first_ip(host).await,
        };
        match ip {
            Some(ip) => self
                .country_for_ip(ip)
                .unwrap_or_else(|| UNRESOLVED_COUNTRY.to_string()),
            None => {
                debug!(host, "could not resolve host for geolocation");
                UNRESOLVED_COUNTRY.to_string()
            }
        }
    }

    /// Look up the country code for an IpAddr
    pub fn country_for_ip(&self, ip: IpAddr) -> Option<String> {
        let lookup_result = self.reader.lookup(ip).ok()?;
        let country: Option<geoip2::Country> = lookup_result.decode().ok()?;
        country.and_then(|c| c.country.iso_code.map(String::from))
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

async fn resolve_first_ip(host: &str) -> Option<IpAddr> {
    lookup_host((host, 0))
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| addr.ip())
}

/// Unicode regional-indicator flag for an ISO country code. The
/// unresolved marker renders as empty.
pub fn country_flag(country_code: &str) -> String {
    if country_code.len() != 2 || country_code == UNRESOLVED_COUNTRY {
        return String::new();
    }
    country_code
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| {
            let offset = c.to_ascii_uppercase() as u32 - 'A' as u32;
            char::from_u32(0x1F1E6 + offset).unwrap_or(c)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_flag() {
        assert_eq!(country_flag("US"), "\u{1F1FA}\u{1F1F8}");
        assert_eq!(country_flag("ir"), "\u{1F1EE}\u{1F1F7}");
    }

    #[test]
    fn test_country_flag_unresolved() {
        assert_eq!(country_flag("XX"), "");
        assert_eq!(country_flag(""), "");
        assert_eq!(country_flag("USA"), "");
    }
}
