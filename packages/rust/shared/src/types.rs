//! Core domain types shared by every phishlens stage.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// One regex match found in a source row, before any cleaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUrlOccurrence {
    /// Zero-based index of the row the URL was found in.
    #[serde(rename = "row")]
    pub source_row: u64,
    /// The matched text, untouched.
    #[serde(rename = "url")]
    pub raw_text: String,
}

impl RawUrlOccurrence {
    pub fn new(source_row: u64, raw_text: impl Into<String>) -> Self {
        Self {
            source_row,
            raw_text: raw_text.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// CanonicalUrl
// ---------------------------------------------------------------------------

/// A normalized absolute `http`/`https` URL with no fragment.
///
/// Two raw strings that normalize to the same value are the same entity
/// everywhere downstream: dedup, cache keys, and joins all key on this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalUrl(String);

impl CanonicalUrl {
    /// Wrap a string that is already in canonical form.
    ///
    /// Used by the normalizer and when reading canonical URLs back from
    /// artifacts this tool wrote itself.
    pub fn from_normalized(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// DedupedUrlRecord
// ---------------------------------------------------------------------------

/// One distinct canonical URL with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupedUrlRecord {
    pub canonical: CanonicalUrl,
    /// Registrable domain, `None` when no public suffix is recognized.
    pub domain: Option<String>,
    /// Smallest source row among all occurrences mapping here.
    pub first_row: u64,
    /// Raw text of the occurrence that supplied `first_row`.
    pub raw_text: String,
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// The two external reputation services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// Aggregate detection-engine verdict counts for a URL.
    Reputation,
    /// Isolated render of a URL with behavioral metadata.
    Sandbox,
}

impl Service {
    /// Stable name, also used as the per-service cache subdirectory.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reputation => "reputation",
            Self::Sandbox => "sandbox",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four-way detection tally from the reputation service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionTally {
    pub malicious: u64,
    pub suspicious: u64,
    pub harmless: u64,
    pub undetected: u64,
    /// Link to the human-readable report.
    pub permalink: String,
}

/// Behavioral metadata from the sandbox service. Absent fields are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxReport {
    pub page_title: String,
    /// Domain the sandbox actually landed on.
    pub domain: String,
    pub country: String,
    pub asn_name: String,
    pub verdict: String,
    /// URL after redirects.
    pub final_url: String,
    pub screenshot: String,
    /// Link to the sandbox's own report page.
    pub report_url: String,
}

impl SandboxReport {
    /// Whether the verdict string marks the URL as malicious.
    pub fn is_malicious(&self) -> bool {
        let verdict = self.verdict.trim().to_ascii_lowercase();
        verdict.contains("malicious") || matches!(verdict.as_str(), "true" | "1" | "yes")
    }
}

/// Service-specific attributes carried by an [`EnrichmentResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum ServiceFields {
    Reputation(DetectionTally),
    Sandbox(SandboxReport),
}

/// Usable data for one URL from one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub canonical: CanonicalUrl,
    pub fields: ServiceFields,
}

impl EnrichmentResult {
    pub fn service(&self) -> Service {
        match self.fields {
            ServiceFields::Reputation(_) => Service::Reputation,
            ServiceFields::Sandbox(_) => Service::Sandbox,
        }
    }

    pub fn tally(&self) -> Option<&DetectionTally> {
        match &self.fields {
            ServiceFields::Reputation(t) => Some(t),
            ServiceFields::Sandbox(_) => None,
        }
    }

    pub fn sandbox(&self) -> Option<&SandboxReport> {
        match &self.fields {
            ServiceFields::Sandbox(r) => Some(r),
            ServiceFields::Reputation(_) => None,
        }
    }
}
