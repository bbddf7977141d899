//! Staged pipeline: extract → clean → enrich → report.
//!
//! Each stage reads the previous stage's artifact from the output directory
//! and writes its own, so a stage can be rerun on its own. [`run`] chains all
//! four in memory and also writes `run_summary.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use phishlens_normalize::{RejectionCounts, dedupe, domain_counts, occurrences_from_bodies};
use phishlens_reputation::{
    ClientSettings, ReputationClient, ReputationService, SandboxService, ScannerService,
};
use phishlens_shared::{
    AppConfig, DedupedUrlRecord, RawUrlOccurrence, ReportConfig, Result, Service,
    resolve_api_key,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::artifacts::{
    self, CLEANED_URLS, CleanedRow, DOMAINS, DomainCount, EXTRACTED_URLS, FINAL_REPORT,
    FINDINGS, RUN_SUMMARY, ReputationRow, SANDBOX_RESULTS, SandboxRow, URL_REPUTATION,
};
use crate::consolidate::{EnrichmentMap, consolidate, prioritize};
use crate::technique::Finding;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before each enrichment lookup.
    fn url_looked_up(&self, service: Service, url: &str, current: usize, total: usize);
    /// Called when a full run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn url_looked_up(&self, _service: Service, _url: &str, _current: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    /// Email rows read.
    pub emails: usize,
    pub occurrences: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejectedSummary {
    pub empty: usize,
    pub non_web_scheme: usize,
    pub no_candidate: usize,
    pub unsupported_scheme: usize,
}

impl From<&RejectionCounts> for RejectedSummary {
    fn from(counts: &RejectionCounts) -> Self {
        Self {
            empty: counts.empty,
            non_web_scheme: counts.non_web_scheme,
            no_candidate: counts.no_candidate,
            unsupported_scheme: counts.unsupported_scheme,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanSummary {
    pub occurrences: usize,
    pub rejected: RejectedSummary,
    pub duplicates: usize,
    pub unique: usize,
    pub domains: usize,
}

/// Counters for one service over one enrichment pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    pub service: Service,
    pub looked_up: usize,
    pub cache_hits: usize,
    pub fetches: usize,
    pub unavailable: usize,
    /// Lookups that hit a local cache fault.
    pub errors: usize,
    pub results: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichSummary {
    pub reputation: Option<ServiceSummary>,
    pub sandbox: Option<ServiceSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub consolidated: usize,
    pub flagged: usize,
    pub reported: usize,
}

/// Contents of `run_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub extract: Option<ExtractSummary>,
    pub clean: CleanSummary,
    pub enrich: EnrichSummary,
    pub report: ReportSummary,
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// The output directory every artifact lives in.
#[derive(Debug, Clone)]
pub struct Workspace {
    output_dir: PathBuf,
}

impl Workspace {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.paths.output_dir)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the named artifact.
    pub fn path(&self, artifact: &str) -> PathBuf {
        self.output_dir.join(artifact)
    }
}

// ---------------------------------------------------------------------------
// Extract
// ---------------------------------------------------------------------------

/// Pull every URL out of the email export's `body` column.
#[instrument(skip_all, fields(emails = %emails.display()))]
pub fn extract(ws: &Workspace, emails: &Path) -> Result<(Vec<RawUrlOccurrence>, ExtractSummary)> {
    let bodies = artifacts::read_email_bodies(emails)?;
    let occurrences = occurrences_from_bodies(bodies.iter().map(Option::as_deref));
    artifacts::write_rows(&ws.path(EXTRACTED_URLS), &occurrences)?;

    let summary = ExtractSummary {
        emails: bodies.len(),
        occurrences: occurrences.len(),
    };
    info!(emails = summary.emails, occurrences = summary.occurrences, "extracted urls");
    Ok((occurrences, summary))
}

// ---------------------------------------------------------------------------
// Clean
// ---------------------------------------------------------------------------

/// Deduped records plus the per-domain tally derived from them.
#[derive(Debug, Clone)]
pub struct Cleaned {
    pub records: Vec<DedupedUrlRecord>,
    pub domain_counts: Vec<(String, usize)>,
    pub summary: CleanSummary,
}

/// Clean the extracted artifact, or `input` when given.
pub fn clean_file(ws: &Workspace, input: Option<&Path>) -> Result<Cleaned> {
    let path = input.map_or_else(|| ws.path(EXTRACTED_URLS), Path::to_path_buf);
    let occurrences: Vec<RawUrlOccurrence> = artifacts::read_rows(&path)?;
    clean(ws, &occurrences)
}

/// Normalize, dedupe and resolve domains; writes the cleaned and domain artifacts.
#[instrument(skip_all, fields(occurrences = occurrences.len()))]
pub fn clean(ws: &Workspace, occurrences: &[RawUrlOccurrence]) -> Result<Cleaned> {
    let outcome = dedupe(occurrences);
    let counts = domain_counts(&outcome.records);

    let cleaned: Vec<CleanedRow> = outcome.records.iter().map(CleanedRow::from).collect();
    artifacts::write_rows(&ws.path(CLEANED_URLS), &cleaned)?;

    let domain_rows: Vec<DomainCount> = counts
        .iter()
        .map(|(domain, count)| DomainCount {
            domain: domain.clone(),
            count: *count,
        })
        .collect();
    artifacts::write_rows(&ws.path(DOMAINS), &domain_rows)?;

    let summary = CleanSummary {
        occurrences: occurrences.len(),
        rejected: RejectedSummary::from(&outcome.rejected),
        duplicates: outcome.duplicates,
        unique: outcome.records.len(),
        domains: counts.len(),
    };

    Ok(Cleaned {
        records: outcome.records,
        domain_counts: counts,
        summary,
    })
}

/// Read the cleaned and domain artifacts back.
pub fn load_cleaned(ws: &Workspace) -> Result<(Vec<DedupedUrlRecord>, Vec<(String, usize)>)> {
    let records = artifacts::read_rows::<CleanedRow>(&ws.path(CLEANED_URLS))?
        .into_iter()
        .map(DedupedUrlRecord::from)
        .collect();

    let domains_path = ws.path(DOMAINS);
    let counts = if domains_path.exists() {
        artifacts::read_rows::<DomainCount>(&domains_path)?
            .into_iter()
            .map(|d| (d.domain, d.count))
            .collect()
    } else {
        Vec::new()
    };

    Ok((records, counts))
}

// ---------------------------------------------------------------------------
// Enrich
// ---------------------------------------------------------------------------

/// Which services an enrichment pass queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceSelection {
    Reputation,
    Sandbox,
    #[default]
    All,
}

impl ServiceSelection {
    pub fn includes(self, service: Service) -> bool {
        matches!(
            (self, service),
            (Self::All, _)
                | (Self::Reputation, Service::Reputation)
                | (Self::Sandbox, Service::Sandbox)
        )
    }
}

/// Results of one enrichment pass.
#[derive(Debug, Clone, Default)]
pub struct Enriched {
    pub reputation: EnrichmentMap,
    pub sandbox: EnrichmentMap,
    pub summary: EnrichSummary,
}

/// Service clients for an enrichment pass; absent clients are skipped.
pub struct Enricher {
    reputation: Option<ReputationClient<ScannerService>>,
    sandbox: Option<ReputationClient<SandboxService>>,
    reputation_limit: Option<usize>,
    sandbox_limit: Option<usize>,
}

impl Enricher {
    pub fn new(
        reputation: Option<ReputationClient<ScannerService>>,
        sandbox: Option<ReputationClient<SandboxService>>,
    ) -> Self {
        Self {
            reputation,
            sandbox,
            reputation_limit: None,
            sandbox_limit: None,
        }
    }

    /// Build clients for the selected services.
    ///
    /// Every selected service's API key is resolved before any client is
    /// built, so a missing key fails the stage with no network activity.
    pub fn from_config(config: &AppConfig, selection: ServiceSelection) -> Result<Self> {
        let reputation_key = selection
            .includes(Service::Reputation)
            .then(|| resolve_api_key(config, Service::Reputation))
            .transpose()?;
        let sandbox_key = selection
            .includes(Service::Sandbox)
            .then(|| resolve_api_key(config, Service::Sandbox))
            .transpose()?;

        let cache_root = PathBuf::from(&config.paths.cache_dir);

        let reputation = reputation_key
            .map(|key| {
                let settings = ClientSettings {
                    cache_root: cache_root.clone(),
                    rate_limit: Duration::from_millis(config.reputation.rate_limit_ms),
                    request_timeout: Duration::from_secs(config.reputation.request_timeout_secs),
                };
                ReputationClient::new(ScannerService::from_config(&config.reputation, key), &settings)
            })
            .transpose()?;

        let sandbox = sandbox_key
            .map(|key| {
                let settings = ClientSettings {
                    cache_root: cache_root.clone(),
                    rate_limit: Duration::from_millis(config.sandbox.rate_limit_ms),
                    request_timeout: Duration::from_secs(config.sandbox.request_timeout_secs),
                };
                ReputationClient::new(SandboxService::from_config(&config.sandbox, key), &settings)
            })
            .transpose()?;

        Ok(Self::new(reputation, sandbox).with_limits(config.reputation.limit, config.sandbox.limit))
    }

    /// Cap how many records each service looks up, `None` for all.
    pub fn with_limits(mut self, reputation: Option<usize>, sandbox: Option<usize>) -> Self {
        self.reputation_limit = reputation;
        self.sandbox_limit = sandbox;
        self
    }

    /// Look up records in order with every configured service.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn enrich(
        &mut self,
        records: &[DedupedUrlRecord],
        progress: &dyn ProgressReporter,
    ) -> Enriched {
        let mut enriched = Enriched::default();

        if let Some(client) = self.reputation.as_mut() {
            progress.phase("Querying URL reputation");
            let (results, summary) =
                lookup_all(client, records, self.reputation_limit, progress).await;
            enriched.reputation = results;
            enriched.summary.reputation = Some(summary);
        }

        if let Some(client) = self.sandbox.as_mut() {
            progress.phase("Submitting to sandbox");
            let (results, summary) = lookup_all(client, records, self.sandbox_limit, progress).await;
            enriched.sandbox = results;
            enriched.summary.sandbox = Some(summary);
        }

        enriched
    }
}

async fn lookup_all<S: ReputationService>(
    client: &mut ReputationClient<S>,
    records: &[DedupedUrlRecord],
    limit: Option<usize>,
    progress: &dyn ProgressReporter,
) -> (EnrichmentMap, ServiceSummary) {
    let service = client.service();
    let total = limit.map_or(records.len(), |n| n.min(records.len()));
    let before = client.stats();
    let mut results = EnrichmentMap::new();
    let mut errors = 0;

    for (i, record) in records.iter().take(total).enumerate() {
        progress.url_looked_up(service, record.canonical.as_str(), i + 1, total);
        match client.lookup(&record.canonical).await {
            Ok(lookup) => {
                if let Some(result) = lookup.into_result() {
                    results.insert(record.canonical.clone(), result);
                }
            }
            Err(e) => {
                errors += 1;
                warn!(%service, url = %record.canonical, error = %e, "lookup failed, continuing");
            }
        }
    }

    let after = client.stats();
    let summary = ServiceSummary {
        service,
        looked_up: total,
        cache_hits: after.cache_hits - before.cache_hits,
        fetches: after.fetches - before.fetches,
        unavailable: after.unavailable - before.unavailable,
        errors,
        results: results.len(),
    };
    info!(
        %service,
        looked_up = summary.looked_up,
        cache_hits = summary.cache_hits,
        fetches = summary.fetches,
        unavailable = summary.unavailable,
        "enrichment pass complete"
    );

    (results, summary)
}

/// Write the enrichment artifact of every service that ran.
///
/// A service that was not selected leaves its previous artifact untouched.
pub fn write_enriched(ws: &Workspace, records: &[DedupedUrlRecord], enriched: &Enriched) -> Result<()> {
    if enriched.summary.reputation.is_some() {
        let rows = artifacts::reputation_rows(records, &enriched.reputation);
        artifacts::write_rows(&ws.path(URL_REPUTATION), &rows)?;
    }
    if enriched.summary.sandbox.is_some() {
        let rows = artifacts::sandbox_rows(records, &enriched.sandbox);
        artifacts::write_rows(&ws.path(SANDBOX_RESULTS), &rows)?;
    }
    Ok(())
}

/// Enrich the cleaned artifact and write the per-service results.
pub async fn enrich_file(
    ws: &Workspace,
    enricher: &mut Enricher,
    progress: &dyn ProgressReporter,
) -> Result<EnrichSummary> {
    let (records, _) = load_cleaned(ws)?;
    let enriched = enricher.enrich(&records, progress).await;
    write_enriched(ws, &records, &enriched)?;
    Ok(enriched.summary)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Consolidate, prioritize, and write the report and findings artifacts.
#[instrument(skip_all, fields(records = records.len(), top_n = policy.top_n))]
pub fn report(
    ws: &Workspace,
    records: &[DedupedUrlRecord],
    domain_counts: &[(String, usize)],
    reputation: &EnrichmentMap,
    sandbox: &EnrichmentMap,
    policy: &ReportConfig,
) -> Result<ReportSummary> {
    let rows = consolidate(records, reputation, sandbox);
    artifacts::write_rows(&ws.path(FINAL_REPORT), &rows)?;

    let findings: Vec<Finding> = prioritize(&rows, domain_counts, policy)
        .iter()
        .map(Finding::from)
        .collect();
    artifacts::write_rows(&ws.path(FINDINGS), &findings)?;

    let summary = ReportSummary {
        consolidated: rows.len(),
        flagged: rows.iter().filter(|r| r.is_flagged).count(),
        reported: findings.len(),
    };
    info!(
        consolidated = summary.consolidated,
        flagged = summary.flagged,
        reported = summary.reported,
        "report written"
    );
    Ok(summary)
}

/// Build the report from the artifacts of earlier stages.
///
/// A missing enrichment artifact counts as a service with no results.
pub fn report_files(ws: &Workspace, policy: &ReportConfig) -> Result<ReportSummary> {
    let (records, counts) = load_cleaned(ws)?;
    let reputation = artifacts::read_enrichment::<ReputationRow>(&ws.path(URL_REPUTATION))?;
    let sandbox = artifacts::read_enrichment::<SandboxRow>(&ws.path(SANDBOX_RESULTS))?;
    report(ws, &records, &counts, &reputation, &sandbox, policy)
}

// ---------------------------------------------------------------------------
// Full run
// ---------------------------------------------------------------------------

/// Where a full run starts.
#[derive(Debug, Clone)]
pub enum RunInput {
    /// An email export with a `body` column.
    Emails(PathBuf),
    /// A previously extracted `row,url` file.
    Extracted(PathBuf),
}

/// Run every stage end to end.
#[instrument(skip_all)]
pub async fn run(
    ws: &Workspace,
    input: &RunInput,
    enricher: &mut Enricher,
    policy: &ReportConfig,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let run_id = Uuid::now_v7().to_string();
    info!(%run_id, output = %ws.output_dir().display(), "starting run");

    progress.phase("Extracting URLs");
    let (occurrences, extract_summary) = match input {
        RunInput::Emails(path) => {
            let (occurrences, summary) = extract(ws, path)?;
            (occurrences, Some(summary))
        }
        RunInput::Extracted(path) => (artifacts::read_rows(path)?, None),
    };

    progress.phase("Cleaning URLs");
    let cleaned = clean(ws, &occurrences)?;

    let enriched = enricher.enrich(&cleaned.records, progress).await;
    write_enriched(ws, &cleaned.records, &enriched)?;

    progress.phase("Building report");
    let report_summary = report(
        ws,
        &cleaned.records,
        &cleaned.domain_counts,
        &enriched.reputation,
        &enriched.sandbox,
        policy,
    )?;

    let summary = RunSummary {
        run_id,
        generated_at: Utc::now(),
        extract: extract_summary,
        clean: cleaned.summary,
        enrich: enriched.summary,
        report: report_summary,
    };
    artifacts::write_json(&ws.path(RUN_SUMMARY), &summary)?;

    progress.done(&summary);
    Ok(summary)
}
