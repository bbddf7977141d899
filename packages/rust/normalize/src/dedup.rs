//! Collapse raw occurrences into one record per canonical URL.

use std::collections::HashMap;

use phishlens_shared::{DedupedUrlRecord, RawUrlOccurrence};
use tracing::{debug, info};

use crate::{Rejection, domain_of, normalize};

/// Rejected-occurrence counts, by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RejectionCounts {
    pub empty: usize,
    pub non_web_scheme: usize,
    pub no_candidate: usize,
    pub unsupported_scheme: usize,
}

impl RejectionCounts {
    pub fn total(&self) -> usize {
        self.empty + self.non_web_scheme + self.no_candidate + self.unsupported_scheme
    }

    fn record(&mut self, reason: Rejection) {
        match reason {
            Rejection::Empty => self.empty += 1,
            Rejection::NonWebScheme => self.non_web_scheme += 1,
            Rejection::NoCandidate => self.no_candidate += 1,
            Rejection::UnsupportedScheme => self.unsupported_scheme += 1,
        }
    }
}

/// Result of [`dedupe`].
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// One per distinct canonical URL, in order of first appearance.
    pub records: Vec<DedupedUrlRecord>,
    pub rejected: RejectionCounts,
    /// Accepted occurrences folded into an earlier record.
    pub duplicates: usize,
}

/// Normalize every occurrence and keep one record per canonical URL.
///
/// `first_row` is the minimum source row of the group; on equal rows the
/// earlier occurrence in input order supplies the raw text. Output keeps the
/// order in which each canonical URL was first seen.
pub fn dedupe<'a, I>(occurrences: I) -> DedupOutcome
where
    I: IntoIterator<Item = &'a RawUrlOccurrence>,
{
    let mut outcome = DedupOutcome::default();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut seen = 0usize;

    for occurrence in occurrences {
        seen += 1;
        let canonical = match normalize(&occurrence.raw_text) {
            Ok(c) => c,
            Err(reason) => {
                debug!(raw = %occurrence.raw_text, %reason, "rejected url");
                outcome.rejected.record(reason);
                continue;
            }
        };

        match index.get(canonical.as_str()) {
            Some(&pos) => {
                outcome.duplicates += 1;
                let record = &mut outcome.records[pos];
                if occurrence.source_row < record.first_row {
                    record.first_row = occurrence.source_row;
                    record.raw_text = occurrence.raw_text.clone();
                }
            }
            None => {
                index.insert(canonical.as_str().to_string(), outcome.records.len());
                let domain = domain_of(&canonical);
                outcome.records.push(DedupedUrlRecord {
                    canonical,
                    domain,
                    first_row: occurrence.source_row,
                    raw_text: occurrence.raw_text.clone(),
                });
            }
        }
    }

    info!(
        occurrences = seen,
        rejected = outcome.rejected.total(),
        duplicates = outcome.duplicates,
        unique = outcome.records.len(),
        "deduplicated urls"
    );

    outcome
}

/// Records per registrable domain, most frequent first.
///
/// Ties keep first-appearance order. Records without a domain are skipped.
pub fn domain_counts(records: &[DedupedUrlRecord]) -> Vec<(String, usize)> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();

    for domain in records.iter().filter_map(|r| r.domain.as_deref()) {
        let count = counts.entry(domain).or_insert(0);
        if *count == 0 {
            order.push(domain.to_string());
        }
        *count += 1;
    }

    let mut result: Vec<(String, usize)> = order
        .into_iter()
        .map(|d| {
            let n = counts[d.as_str()];
            (d, n)
        })
        .collect();
    // Stable sort keeps first-appearance order among equal counts.
    result.sort_by(|a, b| b.1.cmp(&a.1));
    result
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn occ(row: u64, raw: &str) -> RawUrlOccurrence {
        RawUrlOccurrence::new(row, raw)
    }

    #[test]
    fn collapses_equivalent_urls() {
        let input = vec![
            occ(0, "Visit http://a.com/x."),
            occ(1, "http://A.com/x"),
            occ(2, "mailto:x@a.com"),
        ];
        let outcome = dedupe(&input);

        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(record.canonical.as_str(), "http://a.com/x");
        assert_eq!(record.first_row, 0);
        assert_eq!(record.domain.as_deref(), Some("a.com"));
        assert_eq!(outcome.rejected.non_web_scheme, 1);
        assert_eq!(outcome.rejected.total(), 1);
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn first_row_is_minimum_not_first_seen() {
        let input = vec![
            occ(7, "http://a.com/x#one"),
            occ(3, "(http://a.com/x)"),
            occ(5, "http://a.com/x"),
            occ(3, "http://a.com/x#later"),
        ];
        let outcome = dedupe(&input);

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].first_row, 3);
        assert_eq!(outcome.records[0].raw_text, "(http://a.com/x)");
    }

    #[test]
    fn output_has_no_duplicates_and_keeps_first_appearance_order() {
        let input = vec![
            occ(0, "https://b.com/"),
            occ(0, "https://a.com/"),
            occ(1, "https://b.com"),
            occ(2, "https://c.com/#x"),
            occ(2, "ftp://c.com/"),
        ];
        let outcome = dedupe(&input);

        let urls: Vec<&str> = outcome.records.iter().map(|r| r.canonical.as_str()).collect();
        assert_eq!(urls, ["https://b.com/", "https://a.com/", "https://c.com/"]);

        let unique: HashSet<&str> = urls.iter().copied().collect();
        assert_eq!(unique.len(), urls.len());
        assert!(outcome.records.len() <= input.len());
        assert_eq!(outcome.rejected.unsupported_scheme, 1);
    }

    #[test]
    fn unresolvable_domain_is_retained() {
        let input = vec![occ(0, "http://10.0.0.1/login")];
        let outcome = dedupe(&input);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].domain, None);
    }

    #[test]
    fn domain_counts_sorted_by_frequency() {
        let input = vec![
            occ(0, "http://x.com/1"),
            occ(1, "http://a.com/1"),
            occ(2, "http://a.com/2"),
            occ(3, "http://y.com/1"),
            occ(4, "http://10.0.0.1/"),
        ];
        let outcome = dedupe(&input);
        let counts = domain_counts(&outcome.records);

        assert_eq!(
            counts,
            vec![
                ("a.com".to_string(), 2),
                ("x.com".to_string(), 1),
                ("y.com".to_string(), 1),
            ]
        );
    }
}
