//! Network probes backing the validation stages
//!
//! The validator dispatches all network I/O through the [`Prober`] trait
//! so the stage machine itself stays testable with scripted outcomes.

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Capability interface for the reachability, transport, and secure
/// channel stages
#[async_trait]
pub trait Prober: Send + Sync {
    /// ICMP-level reachability of the host
    async fn ping(&self, host: &str, timeout: Duration) -> bool;
    /// TCP connect to the endpoint port
    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> bool;
    /// TLS handshake against the endpoint, offering `sni`
    async fn tls_handshake(&self, host: &str, port: u16, sni: &str, timeout: Duration) -> bool;
}

/// Production prober using the system ping binary (with a TCP fallback
/// when ping is unavailable), tokio TCP connects, and rustls handshakes
pub struct NetProber {
    tls_config: Arc<ClientConfig>,
}

impl NetProber {
    pub fn new() -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        Self {
            tls_config: Arc::new(config),
        }
    }

    fn connect_addr(host: &str, port: u16) -> String {
        if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        }
    }
}

impl Default for NetProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for NetProber {
    async fn ping(&self, host: &str, timeout: Duration) -> bool {
        let secs = timeout.as_secs().max(1).to_string();
        let spawned = Command::new("ping")
            .args(["-c", "1", "-W", &secs, host])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(mut child) => match tokio::time::timeout(timeout + Duration::from_secs(1), child.wait()).await {
                Ok(Ok(status)) => status.success(),
                _ => false,
            },
            // No ping binary on this host; fall back to a TCP probe of
            // well-known ports so reachability still means something
            Err(e) => {
                debug!(error = %e, "ping unavailable, using TCP fallback");
                self.connect(host, 80, timeout).await || self.connect(host, 443, timeout).await
            }
        }
    }

    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> bool {
        let addr = Self::connect_addr(host, port);
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        )
    }

    async fn tls_handshake(&self, host: &str, port: u16, sni: &str, timeout: Duration) -> bool {
        let server_name = match ServerName::try_from(sni.to_string()) {
            Ok(name) => name,
            Err(_) => return false,
        };
        let addr = Self::connect_addr(host, port);
        let connector = TlsConnector::from(Arc::clone(&self.tls_config));

        let handshake = async {
            let tcp = TcpStream::connect(&addr).await?;
            connector.connect(server_name, tcp).await
        };
        matches!(tokio::time::timeout(timeout, handshake).await, Ok(Ok(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_addr_brackets_ipv6() {
        assert_eq!(NetProber::connect_addr("1.2.3.4", 443), "1.2.3.4:443");
        assert_eq!(
            NetProber::connect_addr("2001:db8::1", 443),
            "[2001:db8::1]:443"
        );
    }

    #[tokio::test]
    async fn test_connect_refused_port_is_false() {
        let prober = NetProber::new();
        // Nothing listens on the discard port of localhost in CI
        let ok = prober
            .connect("127.0.0.1", 9, Duration::from_millis(500))
            .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_tls_rejects_invalid_sni() {
        let prober = NetProber::new();
        let ok = prober
            .tls_handshake("127.0.0.1", 9, "not a hostname", Duration::from_millis(500))
            .await;
        assert!(!ok);
    }
}
