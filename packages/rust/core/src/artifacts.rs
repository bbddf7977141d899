//! CSV and JSON artifacts exchanged between pipeline stages.
//!
//! Every stage reads the previous stage's file from the output directory and
//! writes its own, so stages can be rerun independently. Column names and
//! order are fixed per file. Writes go to a dot-prefixed temp file that is
//! renamed into place.

use std::path::{Path, PathBuf};

use phishlens_shared::{
    CanonicalUrl, DedupedUrlRecord, DetectionTally, EnrichmentResult, PhishLensError,
    RawUrlOccurrence, Result, SandboxReport, ServiceFields,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consolidate::{ConsolidatedRow, EnrichmentMap};
use crate::technique::Finding;

pub const EXTRACTED_URLS: &str = "extracted_urls.csv";
pub const CLEANED_URLS: &str = "cleaned_urls.csv";
pub const DOMAINS: &str = "domains.csv";
pub const URL_REPUTATION: &str = "url_reputation.csv";
pub const SANDBOX_RESULTS: &str = "urlscan_results.csv";
pub const FINAL_REPORT: &str = "final_report.csv";
pub const FINDINGS: &str = "findings.csv";
pub const RUN_SUMMARY: &str = "run_summary.json";

/// Column in the email export that holds the message body.
const BODY_COLUMN: &str = "body";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row type with a fixed column layout.
pub trait Artifact: Serialize + DeserializeOwned {
    const COLUMNS: &'static [&'static str];
}

impl Artifact for RawUrlOccurrence {
    const COLUMNS: &'static [&'static str] = &["row", "url"];
}

/// `cleaned_urls.csv` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanedRow {
    pub row: u64,
    /// Raw text of the occurrence that supplied `row`.
    pub url: String,
    pub url_norm: String,
    pub domain: Option<String>,
}

impl Artifact for CleanedRow {
    const COLUMNS: &'static [&'static str] = &["row", "url", "url_norm", "domain"];
}

impl From<&DedupedUrlRecord> for CleanedRow {
    fn from(record: &DedupedUrlRecord) -> Self {
        Self {
            row: record.first_row,
            url: record.raw_text.clone(),
            url_norm: record.canonical.to_string(),
            domain: record.domain.clone(),
        }
    }
}

impl From<CleanedRow> for DedupedUrlRecord {
    fn from(row: CleanedRow) -> Self {
        Self {
            canonical: CanonicalUrl::from_normalized(row.url_norm),
            domain: row.domain.filter(|d| !d.is_empty()),
            first_row: row.row,
            raw_text: row.url,
        }
    }
}

/// `domains.csv` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainCount {
    pub domain: String,
    pub count: usize,
}

impl Artifact for DomainCount {
    const COLUMNS: &'static [&'static str] = &["domain", "count"];
}

/// `url_reputation.csv` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationRow {
    pub url: String,
    pub malicious: u64,
    pub suspicious: u64,
    pub harmless: u64,
    pub undetected: u64,
    pub permalink: String,
}

impl Artifact for ReputationRow {
    const COLUMNS: &'static [&'static str] =
        &["url", "malicious", "suspicious", "harmless", "undetected", "permalink"];
}

/// `urlscan_results.csv` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRow {
    pub url: String,
    pub page_title: String,
    pub domain: String,
    pub country: String,
    pub asnname: String,
    pub verdict: String,
    pub final_url: String,
    pub screenshot: String,
    pub task_link: String,
}

impl Artifact for SandboxRow {
    const COLUMNS: &'static [&'static str] = &[
        "url",
        "page_title",
        "domain",
        "country",
        "asnname",
        "verdict",
        "final_url",
        "screenshot",
        "task_link",
    ];
}

impl Artifact for ConsolidatedRow {
    const COLUMNS: &'static [&'static str] = &[
        "row",
        "url",
        "domain",
        "malicious",
        "suspicious",
        "harmless",
        "undetected",
        "permalink",
        "urlscan_permalink",
        "screenshot",
        "page_title",
        "final_url",
        "sandbox_domain",
        "country",
        "asnname",
        "verdict",
        "is_flagged",
    ];
}

impl Artifact for Finding {
    const COLUMNS: &'static [&'static str] = &[
        "url",
        "domain",
        "malicious",
        "suspicious",
        "harmless",
        "undetected",
        "permalink",
        "urlscan_permalink",
        "screenshot",
        "page_title",
        "final_url",
        "Technique",
        "Prevention Tip",
    ];
}

// ---------------------------------------------------------------------------
// Enrichment rows <-> results
// ---------------------------------------------------------------------------

/// Flatten one service's results into CSV rows, in `records` order.
pub fn reputation_rows(records: &[DedupedUrlRecord], results: &EnrichmentMap) -> Vec<ReputationRow> {
    records
        .iter()
        .filter_map(|r| results.get(&r.canonical))
        .filter_map(|result| {
            let tally = result.tally()?;
            Some(ReputationRow {
                url: result.canonical.to_string(),
                malicious: tally.malicious,
                suspicious: tally.suspicious,
                harmless: tally.harmless,
                undetected: tally.undetected,
                permalink: tally.permalink.clone(),
            })
        })
        .collect()
}

pub fn sandbox_rows(records: &[DedupedUrlRecord], results: &EnrichmentMap) -> Vec<SandboxRow> {
    records
        .iter()
        .filter_map(|r| results.get(&r.canonical))
        .filter_map(|result| {
            let report = result.sandbox()?;
            Some(SandboxRow {
                url: result.canonical.to_string(),
                page_title: report.page_title.clone(),
                domain: report.domain.clone(),
                country: report.country.clone(),
                asnname: report.asn_name.clone(),
                verdict: report.verdict.clone(),
                final_url: report.final_url.clone(),
                screenshot: report.screenshot.clone(),
                task_link: report.report_url.clone(),
            })
        })
        .collect()
}

fn keyed(canonical: CanonicalUrl, fields: ServiceFields) -> (CanonicalUrl, EnrichmentResult) {
    let result = EnrichmentResult {
        canonical: canonical.clone(),
        fields,
    };
    (canonical, result)
}

impl From<ReputationRow> for (CanonicalUrl, EnrichmentResult) {
    fn from(row: ReputationRow) -> Self {
        keyed(
            CanonicalUrl::from_normalized(row.url),
            ServiceFields::Reputation(DetectionTally {
                malicious: row.malicious,
                suspicious: row.suspicious,
                harmless: row.harmless,
                undetected: row.undetected,
                permalink: row.permalink,
            }),
        )
    }
}

impl From<SandboxRow> for (CanonicalUrl, EnrichmentResult) {
    fn from(row: SandboxRow) -> Self {
        keyed(
            CanonicalUrl::from_normalized(row.url),
            ServiceFields::Sandbox(SandboxReport {
                page_title: row.page_title,
                domain: row.domain,
                country: row.country,
                asn_name: row.asnname,
                verdict: row.verdict,
                final_url: row.final_url,
                screenshot: row.screenshot,
                report_url: row.task_link,
            }),
        )
    }
}

/// Rebuild a result map from an enrichment CSV; a missing file is empty.
pub fn read_enrichment<T>(path: &Path) -> Result<EnrichmentMap>
where
    T: Artifact + Into<(CanonicalUrl, EnrichmentResult)>,
{
    if !path.exists() {
        debug!(path = %path.display(), "no enrichment artifact, treating as empty");
        return Ok(EnrichmentMap::new());
    }
    Ok(read_rows::<T>(path)?
        .into_iter()
        .map(|row| -> (CanonicalUrl, EnrichmentResult) { row.into() })
        .collect())
}

// ---------------------------------------------------------------------------
// Reading and writing
// ---------------------------------------------------------------------------

fn artifact_error(path: &Path, e: csv::Error) -> PhishLensError {
    PhishLensError::Artifact(format!("{}: {e}", path.display()))
}

/// Write `rows` to `path` with the header always present.
pub fn write_rows<T: Artifact>(path: &Path, rows: &[T]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| PhishLensError::io(dir, e))?;

    let temp = temp_path(path);
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(&temp)
        .map_err(|e| artifact_error(&temp, e))?;

    writer
        .write_record(T::COLUMNS)
        .map_err(|e| artifact_error(&temp, e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| artifact_error(&temp, e))?;
    }
    writer.flush().map_err(|e| PhishLensError::io(&temp, e))?;
    drop(writer);

    std::fs::rename(&temp, path).map_err(|e| PhishLensError::io(path, e))?;
    debug!(path = %path.display(), rows = rows.len(), "wrote artifact");
    Ok(())
}

/// Read every row of `path`, failing if any expected column is absent.
pub fn read_rows<T: Artifact>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| artifact_error(path, e))?;

    let headers = reader.headers().map_err(|e| artifact_error(path, e))?;
    if let Some(missing) = T::COLUMNS
        .iter()
        .find(|c| !headers.iter().any(|h| h == **c))
    {
        return Err(PhishLensError::validation(format!(
            "{} is missing the '{missing}' column",
            path.display()
        )));
    }

    reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(|e| artifact_error(path, e))
}

/// Message bodies from an email export, one entry per row.
///
/// Only the `body` column is read; other columns may be anything. Empty
/// bodies are `None`.
pub fn read_email_bodies(path: &Path) -> Result<Vec<Option<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| artifact_error(path, e))?;

    let body_index = reader
        .headers()
        .map_err(|e| artifact_error(path, e))?
        .iter()
        .position(|h| h.trim() == BODY_COLUMN)
        .ok_or_else(|| {
            PhishLensError::validation(format!(
                "{} has no '{BODY_COLUMN}' column",
                path.display()
            ))
        })?;

    let mut bodies = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| artifact_error(path, e))?;
        bodies.push(
            record
                .get(body_index)
                .filter(|b| !b.trim().is_empty())
                .map(str::to_string),
        );
    }
    Ok(bodies)
}

/// Write a JSON file (pretty-printed), atomically.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| PhishLensError::parse(format!("JSON serialization failed: {e}")))?;

    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| PhishLensError::io(dir, e))?;

    let temp = temp_path(path);
    std::fs::write(&temp, json).map_err(|e| PhishLensError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| PhishLensError::io(path, e))?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}
