//! Subscription source fetching
//!
//! This module provides functionality for:
//! - Loading a sources file (one subscription URL per line)
//! - Fetching subscription payloads over HTTP
//! - Reporting per-source success and failure without aborting a run

use crate::Result;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// A single subscription source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// URL to fetch the subscription payload from
    pub url: String,
}

impl SourceSpec {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }

    /// Parse a sources-file line. Blank lines and `#` comments yield None.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        Some(Self::new(line))
    }
}

/// Result of fetching a single source
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// The source URL that was fetched
    pub source: String,
    /// Raw payload body, empty on failure
    pub payload: String,
    /// Error message if the fetch failed
    pub error: Option<String>,
}

impl FetchResult {
    /// Create a successful fetch result
    pub fn success(source: String, payload: String) -> Self {
        Self {
            source,
            payload,
            error: None,
        }
    }

    /// Create a failed fetch result
    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            payload: String::new(),
            error: Some(error),
        }
    }

    /// Check if the fetch was successful
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for the source fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Fetcher for subscription payloads
pub struct SourceFetcher {
    client: Client,
}

impl SourceFetcher {
    /// Create a new fetcher with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(FetcherConfig::default())
    }

    /// Create a new fetcher with custom configuration
    pub fn with_config(config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client })
    }

    /// Fetch the payload for a single source
    pub async fn fetch_source(&self, source: &SourceSpec) -> Result<String> {
        let response = self.client.get(&source.url).send().await?;
        let body = response.error_for_status()?.text().await?;
        Ok(body)
    }

    /// Fetch every source, recording per-source outcomes. A failing
    /// source never aborts the run; it is reported and skipped.
    pub async fn fetch_all(&self, sources: &[SourceSpec]) -> Vec<FetchResult> {
        let mut results = Vec::new();

        for source in sources {
            let result = match self.fetch_source(source).await {
                Ok(payload) => FetchResult::success(source.url.clone(), payload),
                Err(e) => {
                    warn!(source = %source.url, error = %e, "source fetch failed");
                    FetchResult::failure(source.url.clone(), e.to_string())
                }
            };
            results.push(result);
        }

        results
    }
}

/// Load source specs from a file, one URL per line
pub fn load_sources_file<P: AsRef<Path>>(path: P) -> Result<Vec<SourceSpec>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_sources(&content))
}

/// Parse sources from text content
pub fn parse_sources(content: &str) -> Vec<SourceSpec> {
    content.lines().filter_map(SourceSpec::parse_line).collect()
}
