//! URL-reputation scanner: one GET per URL, detection-engine tallies back.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use phishlens_shared::{
    CanonicalUrl, DetectionTally, ReputationConfig, Service, ServiceFields,
};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::client::{FetchOutcome, ReputationService, Unavailable};

/// Header carrying the scanner API key.
const API_KEY_HEADER: &str = "x-apikey";

/// URL-safe base64 of the URL, padding stripped: the scanner's URL id.
pub fn url_id(url: &CanonicalUrl) -> String {
    URL_SAFE_NO_PAD.encode(url.as_str())
}

/// The URL-reputation scanner.
#[derive(Debug, Clone)]
pub struct ScannerService {
    api_key: String,
    base_url: String,
    gui_base_url: String,
}

impl ScannerService {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        gui_base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            gui_base_url: gui_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &ReputationConfig, api_key: impl Into<String>) -> Self {
        Self::new(api_key, &config.base_url, &config.gui_base_url)
    }

    fn endpoint(&self, url: &CanonicalUrl) -> String {
        format!("{}/urls/{}", self.base_url, url_id(url))
    }

    fn permalink(&self, url: &CanonicalUrl) -> String {
        format!("{}/{}", self.gui_base_url, url_id(url))
    }
}

impl ReputationService for ScannerService {
    fn service(&self) -> Service {
        Service::Reputation
    }

    async fn fetch(&self, http: &Client, url: &CanonicalUrl) -> FetchOutcome {
        let response = match http
            .get(self.endpoint(url))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return FetchOutcome::Unavailable(Unavailable::Network(e.to_string())),
        };

        let status = response.status();
        if status != StatusCode::OK {
            return FetchOutcome::Unavailable(Unavailable::Upstream {
                status: status.as_u16(),
            });
        }

        match response.json::<Value>().await {
            Ok(payload) => FetchOutcome::Payload(payload),
            Err(e) => FetchOutcome::Unavailable(Unavailable::MalformedResponse(e.to_string())),
        }
    }

    fn extract(&self, url: &CanonicalUrl, payload: &Value) -> Option<ServiceFields> {
        let data = payload.get("data")?;
        let stats = data
            .get("attributes")
            .and_then(|a| a.get("last_analysis_stats"));
        let count = |name: &str| stats.map(|s| crate::count_field(s.get(name))).unwrap_or(0);

        Some(ServiceFields::Reputation(DetectionTally {
            malicious: count("malicious"),
            suspicious: count("suspicious"),
            harmless: count("harmless"),
            undetected: count("undetected"),
            permalink: self.permalink(url),
        }))
    }
}
