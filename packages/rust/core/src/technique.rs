//! Keyword heuristics that label a finding with a phishing technique.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::consolidate::ConsolidatedRow;

const CREDENTIAL_HARVEST: &str = "Credential-harvest (fake login)";
const URGENCY: &str = "Urgency / scare tactic";
const SHORTENER: &str = "URL shortener / redirect";
const FLAGGED: &str = "Suspicious / flagged by engines";
const BENIGN: &str = "Likely benign / informational";

const LOGIN_TITLE_WORDS: [&str; 4] = ["login", "sign in", "verify", "password"];
const LOGIN_URL_WORDS: [&str; 4] = ["/login", "signin", "verify", "account"];
const URGENCY_TITLE_WORDS: [&str; 5] = [
    "urgent",
    "action required",
    "verify your account",
    "suspended",
    "final notice",
];
const SHORTENER_HOSTS: [&str; 5] = ["bit.ly", "tinyurl", "t.co", "goo.gl", "ow.ly"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Technique labels for one row, sorted and joined with `"; "`.
pub fn classify(row: &ConsolidatedRow) -> String {
    let url = row.url.to_lowercase();
    let title = row.page_title.to_lowercase();
    let mut tags: BTreeSet<&str> = BTreeSet::new();

    if contains_any(&title, &LOGIN_TITLE_WORDS) || contains_any(&url, &LOGIN_URL_WORDS) {
        tags.insert(CREDENTIAL_HARVEST);
    }
    if contains_any(&title, &URGENCY_TITLE_WORDS) {
        tags.insert(URGENCY);
    }
    if contains_any(&url, &SHORTENER_HOSTS) {
        tags.insert(SHORTENER);
    }
    if tags.is_empty() {
        tags.insert(if row.is_flagged { FLAGGED } else { BENIGN });
    }

    tags.into_iter().collect::<Vec<_>>().join("; ")
}

/// Analyst guidance for a technique string, keyed on its strongest label.
pub fn prevention_tip(technique: &str) -> &'static str {
    let t = technique.to_lowercase();
    if t.contains("credential-harvest") {
        "Verify sender domains; use MFA; block phishing domains; inspect links via urlscan."
    } else if t.contains("urgency") {
        "Train users to distrust urgent requests; add banners for external emails."
    } else if t.contains("shortener") {
        "Expand shortened URLs safely in a sandbox; restrict public shortener use."
    } else if t.contains("flagged by engines") {
        "Block via proxy/firewall; update threat feeds; educate users."
    } else {
        "No action needed; monitor and train users."
    }
}

/// One `findings.csv` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
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
    #[serde(rename = "Technique")]
    pub technique: String,
    #[serde(rename = "Prevention Tip")]
    pub prevention_tip: String,
}

impl From<&ConsolidatedRow> for Finding {
    fn from(row: &ConsolidatedRow) -> Self {
        let technique = classify(row);
        let prevention_tip = prevention_tip(&technique).to_string();
        Self {
            url: row.url.clone(),
            domain: row.domain.clone(),
            malicious: row.malicious,
            suspicious: row.suspicious,
            harmless: row.harmless,
            undetected: row.undetected,
            permalink: row.permalink.clone(),
            urlscan_permalink: row.urlscan_permalink.clone(),
            screenshot: row.screenshot.clone(),
            page_title: row.page_title.clone(),
            final_url: row.final_url.clone(),
            technique,
            prevention_tip,
        }
    }
}
