//! Proxy Curator - Proxy Validation and Curation Pipeline
//!
//! This is a batch pipeline that curates proxy endpoints gathered from
//! public sources. It parses heterogeneous proxy URIs, removes duplicates,
//! validates endpoints through a multi-stage concurrent checker, tracks
//! long-term reliability in a persistent store, and emits ranked and
//! categorized output sets.

pub mod database;
pub mod pipeline;

pub use database::{StabilityRecord, StabilityStore};
pub use pipeline::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file path for the stability store
    pub database_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "stability.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        assert_eq!(Config::default().database_url, "stability.db");
    }
}
