//! Registrable-domain resolution backed by the Public Suffix List.

use phishlens_shared::CanonicalUrl;
use url::{Host, Url};

/// Registrable domain (domain + public suffix) of a canonical URL.
///
/// `None` is a normal outcome, not an error: IP literals, single-label or
/// internal hostnames, and hosts whose suffix is not on the list all land
/// here. Multi-label suffixes such as `co.uk` are honored.
pub fn domain_of(url: &CanonicalUrl) -> Option<String> {
    let parsed = Url::parse(url.as_str()).ok()?;
    let host = match parsed.host()? {
        Host::Domain(name) => name.trim_end_matches('.').to_ascii_lowercase(),
        Host::Ipv4(_) | Host::Ipv6(_) => return None,
    };

    let domain = psl::domain(host.as_bytes())?;
    if !domain.suffix().is_known() {
        return None;
    }
    std::str::from_utf8(domain.as_bytes()).ok().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dom(s: &str) -> Option<String> {
        domain_of(&CanonicalUrl::from_normalized(s))
    }

    #[test]
    fn simple_and_subdomain_hosts() {
        assert_eq!(dom("http://example.com/"), Some("example.com".into()));
        assert_eq!(dom("https://login.secure.example.com/x"), Some("example.com".into()));
    }

    #[test]
    fn multi_label_suffix() {
        assert_eq!(dom("https://www.example.co.uk/"), Some("example.co.uk".into()));
        assert_eq!(dom("http://shop.example.com.au:8080/"), Some("example.com.au".into()));
    }

    #[test]
    fn unknown_hosts_resolve_to_none() {
        assert_eq!(dom("http://192.168.1.1/admin"), None);
        assert_eq!(dom("http://[::1]/"), None);
        assert_eq!(dom("http://localhost:3000/"), None);
        assert_eq!(dom("http://intranet.corp-nonexistent-tld/"), None);
    }

    #[test]
    fn malformed_host_is_none() {
        assert_eq!(dom("http:///path"), None);
        assert_eq!(dom("http://exa mple.com/"), None);
    }
}
