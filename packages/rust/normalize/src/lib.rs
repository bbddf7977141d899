//! URL cleaning: canonical form, registrable domain, and deduplication.
//!
//! Raw strings pulled out of email bodies are noisy: wrapped in brackets or
//! quotes, trailed by sentence punctuation, sometimes protocol-relative or not
//! web links at all. [`normalize`] turns one into a [`CanonicalUrl`] or says
//! why it was rejected; [`dedupe`] collapses a whole batch.

mod dedup;
mod domain;
mod extract;

use std::sync::LazyLock;

use phishlens_shared::CanonicalUrl;
use regex::Regex;

pub use dedup::{DedupOutcome, RejectionCounts, dedupe, domain_counts};
pub use domain::domain_of;
pub use extract::{extract_urls, occurrences_from_bodies};

/// Schemes dropped before any other processing (case-insensitive prefix).
const NON_WEB_PREFIXES: [&str; 3] = ["mailto:", "javascript:", "data:"];

/// One leading run of wrapper characters, or one trailing run of punctuation.
static WRAPPER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[\[\("'<>]+|[\]\)"'\.,;:!?\-]+$"#).expect("wrapper regex is valid")
});

// ---------------------------------------------------------------------------
// Rejection
// ---------------------------------------------------------------------------

/// Why a raw string did not produce a canonical URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// Empty or whitespace-only input.
    Empty,
    /// `mailto:`, `javascript:` or `data:` link.
    NonWebScheme,
    /// Prose with no token that looks like a URL.
    NoCandidate,
    /// Parsed, but the scheme is not `http` or `https`.
    UnsupportedScheme,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::NonWebScheme => "non_web_scheme",
            Self::NoCandidate => "no_candidate",
            Self::UnsupportedScheme => "unsupported_scheme",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// normalize
// ---------------------------------------------------------------------------

/// Normalize a raw extracted string into a canonical `http`/`https` URL.
///
/// Scheme and host are lowercased; path, query and percent-encoding are kept
/// byte-for-byte. The fragment is always dropped and an empty path becomes
/// `/`. Pure and idempotent: `normalize(normalize(u)) == normalize(u)`.
pub fn normalize(raw: &str) -> Result<CanonicalUrl, Rejection> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Rejection::Empty);
    }

    let candidate = candidate_token(trimmed).ok_or(Rejection::NoCandidate)?;

    let lowered = candidate.to_ascii_lowercase();
    if NON_WEB_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
        return Err(Rejection::NonWebScheme);
    }

    // Fragment goes first so trailing punctuation before it is also stripped.
    let without_fragment = candidate.split('#').next().unwrap_or_default();
    let stripped = WRAPPER_RE.replace_all(without_fragment, "");

    let repaired = if stripped.starts_with("//") {
        format!("http:{stripped}")
    } else {
        stripped.into_owned()
    };

    let parts = split(&repaired);
    match parts.scheme.as_deref() {
        Some("http") | Some("https") => {}
        _ => return Err(Rejection::UnsupportedScheme),
    }

    Ok(CanonicalUrl::from_normalized(parts.rebuild()))
}

/// Pick the URL-looking token out of the input.
///
/// Input without whitespace is taken whole. Prose ("Visit http://a.com/x.")
/// yields its first token carrying `://` or starting with `//`.
fn candidate_token(trimmed: &str) -> Option<&str> {
    if !trimmed.contains(char::is_whitespace) {
        return Some(trimmed);
    }
    trimmed.split_whitespace().find(|token| {
        let bare = token.trim_start_matches(['[', '(', '"', '\'', '<', '>']);
        bare.contains("://") || bare.starts_with("//")
    })
}

/// Generic URL components, split without any re-encoding.
#[derive(Debug, Default, PartialEq, Eq)]
struct UrlParts<'a> {
    scheme: Option<String>,
    netloc: &'a str,
    path: &'a str,
    query: &'a str,
}

impl UrlParts<'_> {
    fn rebuild(&self) -> String {
        let scheme = self.scheme.as_deref().unwrap_or("http");
        // Without an authority the path must be rooted, or it would be read
        // back as the host.
        let path = match self.path {
            "" => "/".to_string(),
            p if !p.starts_with('/') => format!("/{p}"),
            p => p.to_string(),
        };
        let netloc = lowercase_host(self.netloc);
        if self.query.is_empty() {
            format!("{scheme}://{netloc}{path}")
        } else {
            format!("{scheme}://{netloc}{path}?{}", self.query)
        }
    }
}

/// Split `scheme://netloc/path?query` (no fragment expected).
fn split(s: &str) -> UrlParts<'_> {
    let (scheme, rest) = match s.split_once(':') {
        Some((scheme, rest)) if is_scheme(scheme) => (Some(scheme.to_ascii_lowercase()), rest),
        _ => (None, s),
    };

    let (netloc, after_netloc) = match rest.strip_prefix("//") {
        Some(authority) => {
            let end = authority.find(['/', '?']).unwrap_or(authority.len());
            authority.split_at(end)
        }
        None => ("", rest),
    };

    let (path, query) = match after_netloc.split_once('?') {
        Some((path, query)) => (path, query),
        None => (after_netloc, ""),
    };

    UrlParts {
        scheme,
        netloc,
        path,
        query,
    }
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Lowercase the host part of `userinfo@host:port`, leaving userinfo alone.
fn lowercase_host(netloc: &str) -> String {
    match netloc.rsplit_once('@') {
        Some((userinfo, host)) => format!("{userinfo}@{}", host.to_ascii_lowercase()),
        None => netloc.to_ascii_lowercase(),
    }
}
