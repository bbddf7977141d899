//! Sandbox-analysis service: submit a scan, then poll for its result.

use std::time::Duration;

use phishlens_shared::{CanonicalUrl, SandboxConfig, SandboxReport, Service, ServiceFields};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::debug;

use crate::client::{FetchOutcome, ReputationService, Unavailable};
use crate::text_field;

/// Header carrying the sandbox API key.
const API_KEY_HEADER: &str = "API-Key";

/// The sandbox-analysis service.
#[derive(Debug, Clone)]
pub struct SandboxService {
    api_key: String,
    base_url: String,
    visibility: String,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl SandboxService {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let defaults = SandboxConfig::default();
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            visibility: defaults.visibility,
            poll_attempts: defaults.poll_attempts,
            poll_interval: Duration::from_millis(defaults.poll_interval_ms),
        }
    }

    pub fn from_config(config: &SandboxConfig, api_key: impl Into<String>) -> Self {
        Self::new(api_key, &config.base_url)
            .with_visibility(&config.visibility)
            .with_polling(config.poll_attempts, Duration::from_millis(config.poll_interval_ms))
    }

    pub fn with_visibility(mut self, visibility: impl Into<String>) -> Self {
        self.visibility = visibility.into();
        self
    }

    pub fn with_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval = interval;
        self
    }

    /// Submit `url`; `Ok` carries the job's result endpoint.
    async fn submit(&self, http: &Client, url: &CanonicalUrl) -> Result<String, Unavailable> {
        let body = json!({ "url": url.as_str(), "visibility": self.visibility });
        let response = http
            .post(format!("{}/scan/", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Unavailable::Network(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Unavailable::Upstream {
                status: status.as_u16(),
            });
        }

        let submission: Value = response
            .json()
            .await
            .map_err(|e| Unavailable::MalformedResponse(e.to_string()))?;

        submission
            .get("api")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or(Unavailable::MissingJobHandle)
    }

    /// Poll `job_url` until it carries a populated `page` section.
    async fn poll(&self, http: &Client, job_url: &str) -> FetchOutcome {
        for attempt in 1..=self.poll_attempts {
            tokio::time::sleep(self.poll_interval).await;

            let response = match http.get(job_url).header(API_KEY_HEADER, &self.api_key).send().await {
                Ok(r) => r,
                Err(e) => {
                    debug!(attempt, error = %e, "poll request failed");
                    continue;
                }
            };

            let status = response.status();
            if status != StatusCode::OK {
                debug!(attempt, %status, "result not ready");
                continue;
            }

            match response.json::<Value>().await {
                Ok(payload) if has_page(&payload) => return FetchOutcome::Payload(payload),
                Ok(_) => debug!(attempt, "result has no page section yet"),
                Err(e) => debug!(attempt, error = %e, "unreadable poll response"),
            }
        }

        FetchOutcome::Unavailable(Unavailable::Timeout {
            attempts: self.poll_attempts,
        })
    }
}

fn has_page(payload: &Value) -> bool {
    payload
        .get("page")
        .and_then(Value::as_object)
        .is_some_and(|page| !page.is_empty())
}

/// Verdict from `page.verdict`, else from `verdicts.overall.malicious`.
fn verdict(page: &Value, payload: &Value) -> String {
    let explicit = text_field(page.get("verdict"));
    if !explicit.is_empty() {
        return explicit;
    }
    match payload
        .pointer("/verdicts/overall/malicious")
        .and_then(Value::as_bool)
    {
        Some(true) => "malicious".into(),
        Some(false) => "benign".into(),
        None => String::new(),
    }
}

impl ReputationService for SandboxService {
    fn service(&self) -> Service {
        Service::Sandbox
    }

    async fn fetch(&self, http: &Client, url: &CanonicalUrl) -> FetchOutcome {
        let job_url = match self.submit(http, url).await {
            Ok(job_url) => job_url,
            Err(reason) => return FetchOutcome::Unavailable(reason),
        };
        debug!(%job_url, "submitted, polling for result");
        self.poll(http, &job_url).await
    }

    fn extract(&self, _url: &CanonicalUrl, payload: &Value) -> Option<ServiceFields> {
        if !has_page(payload) {
            return None;
        }
        let page = &payload["page"];
        let task = payload.get("task");
        let task_field = |name: &str| text_field(task.and_then(|t| t.get(name)));

        let mut screenshot = text_field(payload.get("screenshotURL"));
        if screenshot.is_empty() {
            screenshot = task_field("screenshotURL");
        }

        Some(ServiceFields::Sandbox(SandboxReport {
            page_title: text_field(page.get("title")),
            domain: text_field(page.get("domain")),
            country: text_field(page.get("country")),
            asn_name: text_field(page.get("asnname")),
            verdict: verdict(page, payload),
            final_url: task_field("url"),
            screenshot,
            report_url: task_field("reportURL"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::cache::content_key;
    use crate::client::{ClientSettings, Lookup, ReputationClient};

    fn url() -> CanonicalUrl {
        CanonicalUrl::from_normalized("http://a.com/x")
    }

    fn result_body() -> Value {
        json!({
            "page": {
                "title": "Sign in to your account",
                "domain": "login.a.com",
                "country": "NL",
                "asnname": "EXAMPLE-AS",
                "verdict": "malicious"
            },
            "task": {
                "url": "http://a.com/x",
                "reportURL": "https://sandbox.example/result/job-1/"
            },
            "screenshotURL": "https://sandbox.example/screenshots/job-1.png"
        })
    }

    async fn mount_submit(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/scan/"))
            .and(header("API-Key", "test-key"))
            .and(body_json(json!({"url": "http://a.com/x", "visibility": "public"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uuid": "job-1",
                "api": format!("{}/result/job-1/", server.uri()),
            })))
            .mount(server)
            .await;
    }

    fn client(server: &MockServer, dir: &std::path::Path, attempts: u32) -> ReputationClient<SandboxService> {
        client_with_timeout(server, dir, attempts, Duration::from_secs(5))
    }

    fn client_with_timeout(
        server: &MockServer,
        dir: &std::path::Path,
        attempts: u32,
        request_timeout: Duration,
    ) -> ReputationClient<SandboxService> {
        let service = SandboxService::new("test-key", server.uri())
            .with_polling(attempts, Duration::ZERO);
        let settings = ClientSettings {
            cache_root: dir.to_path_buf(),
            rate_limit: Duration::ZERO,
            request_timeout,
        };
        ReputationClient::new(service, &settings).expect("client")
    }

    #[test]
    fn extract_reads_page_and_task() {
        let service = SandboxService::new("k", "http://x");
        let Some(ServiceFields::Sandbox(report)) = service.extract(&url(), &result_body()) else {
            panic!("expected report");
        };
        assert_eq!(report.page_title, "Sign in to your account");
        assert_eq!(report.asn_name, "EXAMPLE-AS");
        assert_eq!(report.final_url, "http://a.com/x");
        assert_eq!(report.screenshot, "https://sandbox.example/screenshots/job-1.png");
        assert_eq!(report.report_url, "https://sandbox.example/result/job-1/");
        assert!(report.is_malicious());
    }

    #[test]
    fn extract_fills_missing_fields_with_empty() {
        let service = SandboxService::new("k", "http://x");
        let payload = json!({
            "page": {"domain": "a.com"},
            "verdicts": {"overall": {"malicious": true}}
        });
        let Some(ServiceFields::Sandbox(report)) = service.extract(&url(), &payload) else {
            panic!("expected report");
        };
        assert_eq!(report.domain, "a.com");
        assert_eq!(report.page_title, "");
        assert_eq!(report.screenshot, "");
        assert_eq!(report.verdict, "malicious");

        assert_eq!(service.extract(&url(), &json!({"page": {}})), None);
        assert_eq!(service.extract(&url(), &Value::Null), None);
    }

    #[tokio::test]
    async fn polls_until_page_is_present() {
        let server = MockServer::start().await;
        mount_submit(&server).await;
        Mock::given(method("GET"))
            .and(path("/result/job-1/"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/result/job-1/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(result_body()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let mut client = client(&server, dir.path(), 15);

        let lookup = client.lookup(&url()).await.expect("lookup");
        let report = lookup.result().and_then(|r| r.sandbox()).expect("report");
        assert_eq!(report.country, "NL");
        assert!(client.cache().path_for(&content_key(&url())).exists());
    }

    #[tokio::test]
    async fn hung_poll_uses_one_attempt() {
        let server = MockServer::start().await;
        mount_submit(&server).await;
        Mock::given(method("GET"))
            .and(path("/result/job-1/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(result_body())
                    .set_delay(Duration::from_secs(5)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/result/job-1/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(result_body()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let mut client = client_with_timeout(&server, dir.path(), 3, Duration::from_millis(200));

        let start = std::time::Instant::now();
        let lookup = client.lookup(&url()).await.expect("lookup");
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(matches!(lookup, Lookup::Fetched(_)));
        assert!(client.cache().path_for(&content_key(&url())).exists());
    }

    #[tokio::test]
    async fn exhausted_polls_time_out_without_caching() {
        let server = MockServer::start().await;
        mount_submit(&server).await;
        Mock::given(method("GET"))
            .and(path("/result/job-1/"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let mut client = client(&server, dir.path(), 3);

        let lookup = client.lookup(&url()).await.expect("lookup");
        assert_eq!(lookup, Lookup::Unavailable(Unavailable::Timeout { attempts: 3 }));
        assert!(!client.cache().path_for(&content_key(&url())).exists());
    }

    #[tokio::test]
    async fn rejected_submission_skips_polling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/scan/"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let mut client = client(&server, dir.path(), 3);

        let lookup = client.lookup(&url()).await.expect("lookup");
        assert_eq!(lookup, Lookup::Unavailable(Unavailable::Upstream { status: 401 }));
    }

    #[tokio::test]
    async fn submission_without_job_handle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/scan/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "queued"})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let mut client = client(&server, dir.path(), 3);

        let lookup = client.lookup(&url()).await.expect("lookup");
        assert_eq!(lookup, Lookup::Unavailable(Unavailable::MissingJobHandle));
    }
}
