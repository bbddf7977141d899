//! Shared types, error model, and configuration for phishlens.
//!
//! This crate is the foundation depended on by all other phishlens crates.
//! It provides:
//! - [`PhishLensError`]: the unified error type
//! - Domain types ([`CanonicalUrl`], [`DedupedUrlRecord`], [`EnrichmentResult`])
//! - Configuration ([`AppConfig`], config loading, API key resolution)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, PathsConfig, ReportConfig, ReputationConfig, SandboxConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{PhishLensError, Result};
pub use types::{
    CanonicalUrl, DedupedUrlRecord, DetectionTally, EnrichmentResult, RawUrlOccurrence,
    SandboxReport, Service, ServiceFields,
};
