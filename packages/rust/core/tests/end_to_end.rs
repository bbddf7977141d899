//! Full runs against mocked services.

use std::path::Path;
use std::time::Duration;

use phishlens_core::artifacts::{self, CLEANED_URLS, CleanedRow, FINAL_REPORT, RUN_SUMMARY};
use phishlens_core::{ConsolidatedRow, Enricher, RunInput, SilentProgress, Workspace};
use phishlens_reputation::{ClientSettings, ReputationClient, SandboxService, ScannerService};
use phishlens_shared::ReportConfig;
use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(cache_root: &Path) -> ClientSettings {
    ClientSettings {
        cache_root: cache_root.to_path_buf(),
        rate_limit: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
    }
}

fn scanner(server: &MockServer, cache_root: &Path) -> ReputationClient<ScannerService> {
    let service = ScannerService::new("vt-key", server.uri(), "https://gui.example/url");
    ReputationClient::new(service, &settings(cache_root)).expect("scanner client")
}

fn sandbox(server: &MockServer, cache_root: &Path, attempts: u32) -> ReputationClient<SandboxService> {
    let service = SandboxService::new("us-key", server.uri()).with_polling(attempts, Duration::ZERO);
    ReputationClient::new(service, &settings(cache_root)).expect("sandbox client")
}

fn write_extracted(dir: &Path, rows: &[(u64, &str)]) -> std::path::PathBuf {
    let path = dir.join("input.csv");
    let mut content = String::from("row,url\n");
    for (row, url) in rows {
        content.push_str(&format!("{row},\"{url}\"\n"));
    }
    std::fs::write(&path, content).expect("write input");
    path
}

fn stats(malicious: u64) -> serde_json::Value {
    json!({
        "data": {
            "attributes": {
                "last_analysis_stats": {
                    "malicious": malicious,
                    "suspicious": 0,
                    "harmless": 70,
                    "undetected": 2
                }
            }
        }
    })
}

#[tokio::test]
async fn variants_of_one_url_collapse_to_one_row() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ws = Workspace::new(dir.path().join("out"));
    let input = write_extracted(
        dir.path(),
        &[
            (4, "http://a.com/x"),
            (2, "HTTP://A.COM/x"),
            (7, "Visit http://a.com/x."),
            (7, "mailto:someone@a.com"),
        ],
    );

    let mut enricher = Enricher::new(None, None);
    let summary = phishlens_core::pipeline::run(
        &ws,
        &RunInput::Extracted(input),
        &mut enricher,
        &ReportConfig::default(),
        &SilentProgress,
    )
    .await
    .expect("run");

    assert_eq!(summary.clean.unique, 1);
    assert_eq!(summary.clean.duplicates, 2);
    assert_eq!(summary.clean.rejected.non_web_scheme, 1);
    assert_eq!(summary.report.consolidated, 1);

    let cleaned: Vec<CleanedRow> = artifacts::read_rows(&ws.path(CLEANED_URLS)).expect("cleaned");
    assert_eq!(cleaned.len(), 1);
    assert_eq!(cleaned[0].row, 2);
    assert_eq!(cleaned[0].url, "HTTP://A.COM/x");
    assert_eq!(cleaned[0].url_norm, "http://a.com/x");
    assert_eq!(cleaned[0].domain.as_deref(), Some("a.com"));

    assert!(ws.path(RUN_SUMMARY).exists());
}

#[tokio::test]
async fn sandbox_timeout_still_yields_flagged_row() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = dir.path().join("cache");
    let ws = Workspace::new(dir.path().join("out"));
    let input = write_extracted(dir.path(), &[(0, "https://evil.example.com/login")]);

    let vt = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/urls/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stats(3)))
        .expect(1)
        .mount(&vt)
        .await;

    let us = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/scan/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "api": format!("{}/result/job-1/", us.uri())
        })))
        .expect(1)
        .mount(&us)
        .await;
    Mock::given(method("GET"))
        .and(path("/result/job-1/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&us)
        .await;

    let mut enricher = Enricher::new(Some(scanner(&vt, &cache)), Some(sandbox(&us, &cache, 2)));
    let summary = phishlens_core::pipeline::run(
        &ws,
        &RunInput::Extracted(input),
        &mut enricher,
        &ReportConfig::default(),
        &SilentProgress,
    )
    .await
    .expect("run");

    let sandbox_summary = summary.enrich.sandbox.expect("sandbox ran");
    assert_eq!(sandbox_summary.unavailable, 1);
    assert_eq!(sandbox_summary.results, 0);

    let rows: Vec<ConsolidatedRow> = artifacts::read_rows(&ws.path(FINAL_REPORT)).expect("report");
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.malicious, 3);
    assert_eq!(row.harmless, 70);
    assert!(row.permalink.starts_with("https://gui.example/url/"));
    assert_eq!(row.page_title, "");
    assert_eq!(row.screenshot, "");
    assert_eq!(row.verdict, "");
    assert!(row.is_flagged);
}

#[tokio::test]
async fn rerun_is_served_from_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = dir.path().join("cache");
    let input = write_extracted(
        dir.path(),
        &[(0, "http://a.com/x"), (1, "https://bit.ly/abc"), (2, "http://10.0.0.1/")],
    );

    let vt = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/urls/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stats(1)))
        .expect(3)
        .mount(&vt)
        .await;

    let mut reports = Vec::new();
    for run in ["first", "second"] {
        let ws = Workspace::new(dir.path().join(run));
        let mut enricher = Enricher::new(Some(scanner(&vt, &cache)), None);
        let summary = phishlens_core::pipeline::run(
            &ws,
            &RunInput::Extracted(input.clone()),
            &mut enricher,
            &ReportConfig::default(),
            &SilentProgress,
        )
        .await
        .expect("run");

        let reputation = summary.enrich.reputation.expect("reputation ran");
        if run == "second" {
            assert_eq!(reputation.fetches, 0);
            assert_eq!(reputation.cache_hits, 3);
        }
        reports.push(std::fs::read_to_string(ws.path(FINAL_REPORT)).expect("report"));
    }

    assert_eq!(reports[0], reports[1]);
}

#[tokio::test]
async fn limit_caps_lookups_but_not_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = dir.path().join("cache");
    let ws = Workspace::new(dir.path().join("out"));
    let input = write_extracted(
        dir.path(),
        &[(0, "http://a.com/1"), (1, "http://b.com/2"), (2, "http://c.com/3")],
    );

    let vt = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stats(0)))
        .expect(1)
        .mount(&vt)
        .await;

    let mut enricher = Enricher::new(Some(scanner(&vt, &cache)), None).with_limits(Some(1), None);
    let summary = phishlens_core::pipeline::run(
        &ws,
        &RunInput::Extracted(input),
        &mut enricher,
        &ReportConfig::default(),
        &SilentProgress,
    )
    .await
    .expect("run");

    assert_eq!(summary.enrich.reputation.expect("reputation").looked_up, 1);
    assert_eq!(summary.report.consolidated, 3);
}
