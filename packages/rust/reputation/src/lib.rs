//! Cached, rate-limited clients for the external reputation services.
//!
//! This crate provides:
//! - [`ReputationClient`]: cache-first lookup shared by every service
//! - [`ScannerService`]: URL-reputation scanner (detection tallies)
//! - [`SandboxService`]: sandbox analysis (submit, then poll)
//! - [`CacheStore`]: one atomically written JSON file per URL

pub mod cache;
pub mod client;
pub mod rate_limit;
pub mod sandbox;
pub mod scanner;

use serde_json::Value;

pub use cache::{CacheStore, content_key};
pub use client::{
    ClientSettings, FetchOutcome, Lookup, LookupStats, ReputationClient, ReputationService,
    Unavailable,
};
pub use rate_limit::RateLimiter;
pub use sandbox::SandboxService;
pub use scanner::{ScannerService, url_id};

/// A scalar JSON field as text; missing, null and compound values are empty.
pub(crate) fn text_field(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// A JSON count; anything that is not a non-negative integer is zero.
pub(crate) fn count_field(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
