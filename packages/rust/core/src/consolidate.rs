//! Outer-join deduped URLs with both enrichment sources, then rank.

use std::collections::{HashMap, HashSet};

use phishlens_shared::{
    CanonicalUrl, DedupedUrlRecord, DetectionTally, EnrichmentResult, ReportConfig, SandboxReport,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Enrichment results for one service, keyed by canonical URL.
pub type EnrichmentMap = HashMap<CanonicalUrl, EnrichmentResult>;

// ---------------------------------------------------------------------------
// ConsolidatedRow
// ---------------------------------------------------------------------------

/// One row per deduped URL with every service column present.
///
/// Field order is the `final_report.csv` column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedRow {
    pub row: u64,
    pub url: String,
    pub domain: Option<String>,
    pub malicious: u64,
    pub suspicious: u64,
    pub harmless: u64,
    pub undetected: u64,
    pub permalink: String,
    pub urlscan_permalink: String,
    pub screenshot: String,
    pub page_title: String,
    pub final_url: String,
    pub sandbox_domain: String,
    pub country: String,
    pub asnname: String,
    pub verdict: String,
    pub is_flagged: bool,
}

impl ConsolidatedRow {
    fn new(record: &DedupedUrlRecord, tally: &DetectionTally, report: &SandboxReport) -> Self {
        Self {
            row: record.first_row,
            url: record.canonical.to_string(),
            domain: record.domain.clone(),
            malicious: tally.malicious,
            suspicious: tally.suspicious,
            harmless: tally.harmless,
            undetected: tally.undetected,
            permalink: tally.permalink.clone(),
            urlscan_permalink: report.report_url.clone(),
            screenshot: report.screenshot.clone(),
            page_title: report.page_title.clone(),
            final_url: report.final_url.clone(),
            sandbox_domain: report.domain.clone(),
            country: report.country.clone(),
            asnname: report.asn_name.clone(),
            verdict: report.verdict.clone(),
            is_flagged: tally.malicious > 0 || report.is_malicious(),
        }
    }
}

/// Left-join `deduped` with both result maps on canonical URL.
///
/// Emits exactly one row per record, in record order. Missing results become
/// zero counts and empty strings.
pub fn consolidate(
    deduped: &[DedupedUrlRecord],
    reputation: &EnrichmentMap,
    sandbox: &EnrichmentMap,
) -> Vec<ConsolidatedRow> {
    let no_tally = DetectionTally::default();
    let no_report = SandboxReport::default();

    let rows: Vec<ConsolidatedRow> = deduped
        .iter()
        .map(|record| {
            let tally = reputation
                .get(&record.canonical)
                .and_then(EnrichmentResult::tally)
                .unwrap_or(&no_tally);
            let report = sandbox
                .get(&record.canonical)
                .and_then(EnrichmentResult::sandbox)
                .unwrap_or(&no_report);
            ConsolidatedRow::new(record, tally, report)
        })
        .collect();

    info!(
        rows = rows.len(),
        with_reputation = deduped.iter().filter(|r| reputation.contains_key(&r.canonical)).count(),
        with_sandbox = deduped.iter().filter(|r| sandbox.contains_key(&r.canonical)).count(),
        flagged = rows.iter().filter(|r| r.is_flagged).count(),
        "consolidated findings"
    );

    rows
}

// ---------------------------------------------------------------------------
// Prioritization
// ---------------------------------------------------------------------------

/// Rank rows for reporting and cap to `policy.top_n`.
///
/// Flagged rows first, then by malicious count, both descending. When fewer
/// than `policy.min_flagged` rows are flagged, rows from the
/// `policy.rare_domains` least-seen domains follow the flagged ones, rarest
/// domain first, before the rest of the ranking.
pub fn prioritize(
    rows: &[ConsolidatedRow],
    domain_counts: &[(String, usize)],
    policy: &ReportConfig,
) -> Vec<ConsolidatedRow> {
    let mut ranked: Vec<&ConsolidatedRow> = rows.iter().collect();
    ranked.sort_by(|a, b| {
        b.is_flagged
            .cmp(&a.is_flagged)
            .then(b.malicious.cmp(&a.malicious))
    });

    let flagged = ranked.iter().filter(|r| r.is_flagged).count();
    if flagged >= policy.min_flagged {
        return ranked.into_iter().take(policy.top_n).cloned().collect();
    }

    let mut by_rarity: Vec<&(String, usize)> = domain_counts.iter().collect();
    by_rarity.sort_by_key(|(_, count)| *count);
    let rare: Vec<&str> = by_rarity
        .into_iter()
        .take(policy.rare_domains)
        .map(|(domain, _)| domain.as_str())
        .collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut out: Vec<&ConsolidatedRow> = Vec::with_capacity(ranked.len());

    let flagged_rows = ranked.iter().copied().filter(|r| r.is_flagged);
    let rare_rows = rare.iter().flat_map(|domain| {
        ranked
            .iter()
            .copied()
            .filter(move |r| r.domain.as_deref() == Some(*domain))
    });
    for row in flagged_rows.chain(rare_rows).chain(ranked.iter().copied()) {
        if seen.insert(row.url.as_str()) {
            out.push(row);
        }
    }

    info!(flagged, rare_domains = rare.len(), "back-filled findings with rare domains");
    out.into_iter().take(policy.top_n).cloned().collect()
}

#[cfg(test)]
mod tests {
    use phishlens_shared::ServiceFields;

    use super::*;

    fn record(row: u64, url: &str, domain: Option<&str>) -> DedupedUrlRecord {
        DedupedUrlRecord {
            canonical: CanonicalUrl::from_normalized(url),
            domain: domain.map(str::to_string),
            first_row: row,
            raw_text: url.to_string(),
        }
    }

    fn tally(url: &str, malicious: u64) -> (CanonicalUrl, EnrichmentResult) {
        let canonical = CanonicalUrl::from_normalized(url);
        let result = EnrichmentResult {
            canonical: canonical.clone(),
            fields: ServiceFields::Reputation(DetectionTally {
                malicious,
                harmless: 50,
                permalink: format!("https://gui.example/{malicious}"),
                ..Default::default()
            }),
        };
        (canonical, result)
    }

    fn verdict(url: &str, verdict: &str) -> (CanonicalUrl, EnrichmentResult) {
        let canonical = CanonicalUrl::from_normalized(url);
        let result = EnrichmentResult {
            canonical: canonical.clone(),
            fields: ServiceFields::Sandbox(SandboxReport {
                verdict: verdict.into(),
                page_title: "Title".into(),
                ..Default::default()
            }),
        };
        (canonical, result)
    }

    fn row(url: &str, domain: &str, malicious: u64, is_flagged: bool) -> ConsolidatedRow {
        ConsolidatedRow {
            row: 0,
            url: url.into(),
            domain: Some(domain.into()),
            malicious,
            suspicious: 0,
            harmless: 0,
            undetected: 0,
            permalink: String::new(),
            urlscan_permalink: String::new(),
            screenshot: String::new(),
            page_title: String::new(),
            final_url: String::new(),
            sandbox_domain: String::new(),
            country: String::new(),
            asnname: String::new(),
            verdict: String::new(),
            is_flagged,
        }
    }

    #[test]
    fn one_row_per_record_regardless_of_sources() {
        let deduped = vec![
            record(0, "http://a.com/", Some("a.com")),
            record(1, "http://b.com/", Some("b.com")),
            record(2, "http://10.0.0.1/", None),
        ];
        let reputation: EnrichmentMap = [tally("http://a.com/", 0)].into_iter().collect();
        let sandbox: EnrichmentMap = [verdict("http://b.com/", "malicious")].into_iter().collect();

        let rows = consolidate(&deduped, &reputation, &sandbox);
        assert_eq!(rows.len(), 3);

        let empty = consolidate(&deduped, &EnrichmentMap::new(), &EnrichmentMap::new());
        assert_eq!(empty.len(), 3);
        assert!(empty.iter().all(|r| r.malicious == 0 && r.page_title.is_empty()));
    }

    #[test]
    fn flagged_by_either_source() {
        let deduped = vec![
            record(0, "http://a.com/", Some("a.com")),
            record(1, "http://b.com/", Some("b.com")),
            record(2, "http://c.com/", Some("c.com")),
        ];
        let reputation: EnrichmentMap = [tally("http://a.com/", 2), tally("http://c.com/", 0)]
            .into_iter()
            .collect();
        let sandbox: EnrichmentMap = [verdict("http://b.com/", "Malicious"), verdict("http://c.com/", "")]
            .into_iter()
            .collect();

        let rows = consolidate(&deduped, &reputation, &sandbox);
        let flags: Vec<bool> = rows.iter().map(|r| r.is_flagged).collect();
        assert_eq!(flags, [true, true, false]);
        assert_eq!(rows[0].malicious, 2);
        assert_eq!(rows[0].page_title, "");
        assert_eq!(rows[1].malicious, 0);
        assert_eq!(rows[1].page_title, "Title");
        assert_eq!(rows[2].domain.as_deref(), Some("c.com"));
    }

    #[test]
    fn ranks_flagged_then_by_malicious_count() {
        let mut rows = Vec::new();
        for i in 0..6 {
            rows.push(row(&format!("http://f{i}.com/"), &format!("f{i}.com"), i, true));
        }
        rows.push(row("http://clean.com/", "clean.com", 0, false));

        let policy = ReportConfig {
            top_n: 3,
            min_flagged: 5,
            rare_domains: 10,
        };
        let top = prioritize(&rows, &[], &policy);
        let urls: Vec<&str> = top.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, ["http://f5.com/", "http://f4.com/", "http://f3.com/"]);
    }

    #[test]
    fn back_fills_with_rare_domains() {
        let rows = vec![
            row("http://common.com/1", "common.com", 0, false),
            row("http://common.com/2", "common.com", 0, false),
            row("http://bad.com/", "bad.com", 4, true),
            row("http://rare.com/", "rare.com", 0, false),
            row("http://mid.com/1", "mid.com", 0, false),
        ];
        let counts = vec![
            ("common.com".to_string(), 2),
            ("bad.com".to_string(), 1),
            ("rare.com".to_string(), 1),
            ("mid.com".to_string(), 1),
        ];
        let policy = ReportConfig {
            top_n: 4,
            min_flagged: 5,
            rare_domains: 2,
        };

        let top = prioritize(&rows, &counts, &policy);
        let urls: Vec<&str> = top.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            ["http://bad.com/", "http://rare.com/", "http://common.com/1", "http://common.com/2"]
        );
    }

    #[test]
    fn prioritize_never_duplicates() {
        let rows = vec![
            row("http://a.com/", "a.com", 1, true),
            row("http://b.com/", "b.com", 0, false),
        ];
        let counts = vec![("a.com".to_string(), 1), ("b.com".to_string(), 1)];
        let policy = ReportConfig::default();

        let top = prioritize(&rows, &counts, &policy);
        assert_eq!(top.len(), 2);
    }
}
