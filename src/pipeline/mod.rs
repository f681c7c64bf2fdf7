//! Pipeline module for parsing, validating, and curating proxy endpoints
//!
//! This module provides functionality for:
//! - Parsing proxy descriptors from raw URIs and subscription payloads
//! - Deduplicating descriptors by canonical endpoint identity
//! - Validating endpoints through a staged concurrent checker
//! - Ranking validated endpoints by long-term reliability
//! - Assembling and writing the curated output sets

pub mod classify;
pub mod core;
pub mod dedup;
pub mod fetch;
pub mod geo;
pub mod models;
pub mod output;
pub mod parser;
pub mod rank;
pub mod run;
pub mod stages;
pub mod validator;

pub use classify::Classifier;
pub use self::core::{CoreVerdict, DisabledVerifier, ProcessVerifier, ProtocolVerifier};
pub use dedup::Deduplicator;
pub use fetch::{FetchResult, FetcherConfig, SourceFetcher, SourceSpec};
pub use geo::GeoLocator;
pub use models::{
    CuratedSet, Credentials, FailureReason, ProtocolKind, ProxyDescriptor, Stage,
    ValidationOutcome,
};
pub use output::OutputAssembler;
pub use parser::DescriptorParser;
pub use rank::{RankedEntry, Ranker};
pub use run::{Pipeline, RunSummary};
pub use stages::{NetProber, Prober};
pub use validator::{Validator, ValidatorConfig};
