//! Cache-first, rate-limited lookup shared by every reputation service.

use std::path::PathBuf;
use std::time::Duration;

use phishlens_shared::{
    CanonicalUrl, EnrichmentResult, PhishLensError, Result, Service, ServiceFields,
};
use reqwest::Client;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::cache::{CacheStore, content_key};
use crate::rate_limit::RateLimiter;

/// User-Agent string for service requests.
const USER_AGENT: &str = concat!("phishlens/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Service seam
// ---------------------------------------------------------------------------

/// Why a lookup produced no usable result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// Non-200 status from the service. Not cached.
    Upstream { status: u16 },
    /// Transport failure, including the per-request timeout. Not cached.
    Network(String),
    /// 200 with a body that is not JSON. Not cached.
    MalformedResponse(String),
    /// Submission accepted but no result endpoint came back. Not cached.
    MissingJobHandle,
    /// Polling budget exhausted. Not cached, so the next run resubmits.
    Timeout { attempts: u32 },
    /// Cached payload carries no usable fields; replayed without a fetch.
    CachedFailure,
    /// Fresh payload cached, but it carries no usable fields.
    NoUsablePayload,
}

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upstream { status } => write!(f, "HTTP {status}"),
            Self::Network(msg) => write!(f, "network: {msg}"),
            Self::MalformedResponse(msg) => write!(f, "malformed response: {msg}"),
            Self::MissingJobHandle => f.write_str("no result endpoint in submission response"),
            Self::Timeout { attempts } => write!(f, "no result after {attempts} polls"),
            Self::CachedFailure => f.write_str("cached payload has no data"),
            Self::NoUsablePayload => f.write_str("payload has no data"),
        }
    }
}

/// What one network fetch produced.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Raw upstream JSON, to be cached verbatim.
    Payload(Value),
    Unavailable(Unavailable),
}

/// One external service: how to fetch a URL and how to read its payload.
#[allow(async_fn_in_trait)]
pub trait ReputationService {
    fn service(&self) -> Service;

    /// Cache key for `url`. Must be deterministic across processes.
    fn cache_key(&self, url: &CanonicalUrl) -> String {
        content_key(url)
    }

    /// Perform the network exchange for `url`, including any polling.
    async fn fetch(&self, http: &Client, url: &CanonicalUrl) -> FetchOutcome;

    /// Pull the service fields out of a payload, `None` if it has no data.
    fn extract(&self, url: &CanonicalUrl, payload: &Value) -> Option<ServiceFields>;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Per-client settings, built from config at startup.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Root cache directory; the service name is appended.
    pub cache_root: PathBuf,
    /// Minimum spacing between network fetches.
    pub rate_limit: Duration,
    /// Hard timeout for every individual HTTP request.
    pub request_timeout: Duration,
}

/// Outcome of [`ReputationClient::lookup`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Served from cache, no network activity.
    Cached(EnrichmentResult),
    /// Fetched now and written to cache.
    Fetched(EnrichmentResult),
    Unavailable(Unavailable),
}

impl Lookup {
    pub fn result(&self) -> Option<&EnrichmentResult> {
        match self {
            Self::Cached(r) | Self::Fetched(r) => Some(r),
            Self::Unavailable(_) => None,
        }
    }

    pub fn into_result(self) -> Option<EnrichmentResult> {
        match self {
            Self::Cached(r) | Self::Fetched(r) => Some(r),
            Self::Unavailable(_) => None,
        }
    }
}

/// Running counters for one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStats {
    pub cache_hits: usize,
    /// Lookups that went to the network.
    pub fetches: usize,
    pub unavailable: usize,
}

/// Cached, rate-limited client for one [`ReputationService`].
pub struct ReputationClient<S> {
    service: S,
    http: Client,
    cache: CacheStore,
    limiter: RateLimiter,
    stats: LookupStats,
}

impl<S: ReputationService> ReputationClient<S> {
    /// Create a client, opening `<cache_root>/<service>/`.
    pub fn new(service: S, settings: &ClientSettings) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| PhishLensError::Network(format!("failed to build HTTP client: {e}")))?;

        let cache = CacheStore::open(settings.cache_root.join(service.service().as_str()))?;

        Ok(Self {
            service,
            http,
            cache,
            limiter: RateLimiter::new(settings.rate_limit),
            stats: LookupStats::default(),
        })
    }

    pub fn service(&self) -> Service {
        self.service.service()
    }

    pub fn stats(&self) -> LookupStats {
        self.stats
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Look up `url`, from cache if an entry exists, otherwise over the network.
    ///
    /// A cached entry is always replayed, even one that holds no data. Only
    /// a successful fetch writes to the cache, and a failed write still
    /// returns the fetched result. `Err` is reserved for cache read faults;
    /// every upstream problem is a [`Lookup::Unavailable`].
    #[instrument(skip_all, fields(service = %self.service.service(), url = %url))]
    pub async fn lookup(&mut self, url: &CanonicalUrl) -> Result<Lookup> {
        let key = self.service.cache_key(url);

        if let Some(payload) = self.cache.read(&key)? {
            self.stats.cache_hits += 1;
            return Ok(match self.service.extract(url, &payload) {
                Some(fields) => Lookup::Cached(result(url, fields)),
                None => {
                    self.stats.unavailable += 1;
                    Lookup::Unavailable(Unavailable::CachedFailure)
                }
            });
        }

        self.limiter.wait().await;
        self.stats.fetches += 1;
        info!("fetching");

        match self.service.fetch(&self.http, url).await {
            FetchOutcome::Payload(payload) => {
                if let Err(e) = self.cache.write(&key, &payload) {
                    warn!(error = %e, "cache write failed, keeping fetched result");
                }
                match self.service.extract(url, &payload) {
                    Some(fields) => Ok(Lookup::Fetched(result(url, fields))),
                    None => {
                        warn!("payload cached but carries no data");
                        self.stats.unavailable += 1;
                        Ok(Lookup::Unavailable(Unavailable::NoUsablePayload))
                    }
                }
            }
            FetchOutcome::Unavailable(reason) => {
                warn!(%reason, "lookup unavailable");
                self.stats.unavailable += 1;
                Ok(Lookup::Unavailable(reason))
            }
        }
    }
}

fn result(url: &CanonicalUrl, fields: ServiceFields) -> EnrichmentResult {
    EnrichmentResult {
        canonical: url.clone(),
        fields,
    }
}
