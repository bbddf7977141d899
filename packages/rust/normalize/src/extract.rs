//! Pull candidate URLs out of free text.

use std::sync::LazyLock;

use phishlens_shared::RawUrlOccurrence;
use regex::Regex;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s'"<>]+"#).expect("url regex is valid")
});

/// Every `http(s)://` run in `text`, in order, untouched.
pub fn extract_urls(text: &str) -> Vec<&str> {
    URL_RE.find_iter(text).map(|m| m.as_str()).collect()
}

/// One occurrence per match, tagged with the zero-based row it came from.
///
/// Rows without a body (`None`) contribute nothing.
pub fn occurrences_from_bodies<'a, I>(bodies: I) -> Vec<RawUrlOccurrence>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    bodies
        .into_iter()
        .enumerate()
        .flat_map(|(row, body)| {
            body.map(extract_urls)
                .unwrap_or_default()
                .into_iter()
                .map(move |url| RawUrlOccurrence::new(row as u64, url))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_urls_in_prose() {
        let text = "Hi, please <a href=\"https://a.com/login\">log in</a> or visit HTTP://B.com/x?y=1.";
        assert_eq!(extract_urls(text), ["https://a.com/login", "HTTP://B.com/x?y=1."]);
    }

    #[test]
    fn ignores_non_http() {
        assert!(extract_urls("mailto:x@a.com ftp://a.com").is_empty());
    }

    #[test]
    fn occurrences_carry_row_index() {
        let bodies = [Some("see http://a.com"), None, Some("http://b.com and http://c.com")];
        let occurrences = occurrences_from_bodies(bodies);

        let rows: Vec<(u64, &str)> = occurrences
            .iter()
            .map(|o| (o.source_row, o.raw_text.as_str()))
            .collect();
        assert_eq!(
            rows,
            [(0, "http://a.com"), (2, "http://b.com"), (2, "http://c.com")]
        );
    }
}
