//! Mock-server tests for the HTTP clients and an end-to-end run.
//!
//! Tests: Crossref lookup, nationalize/genderize with caching, Scholar stream
//! paging, availability probe, full pipeline against mocks

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gscraper::config::{EntryCount, PipelineConfig};
use gscraper::crossref::{BibliographicRegistry, CandidateAuthor, CrossrefClient};
use gscraper::demographics::{AgifyClient, DemographicService};
use gscraper::error::{Result, ScraperError};
use gscraper::gscholar::ScholarClient;
use gscraper::pipeline::PipelineDriver;
use gscraper::recovery::{CooldownRecovery, ProxyPool};
use gscraper::session::SearchSource;

const RESULTS_PAGE: &str = r#"
<html><body>
<div class="gs_r gs_or gs_scl" data-cid="CID1">
  <h3 class="gs_rt"><a href="https://example.org/one">Warming oceans</a></h3>
  <div class="gs_a"><a href="/citations?user=U1&amp;hl=en">J Smith</a>, A Lopez - Nature, 2020 - nature.com</div>
  <div class="gs_fl"><a href="/scholar?cites=1&amp;hl=en">Cited by 40</a></div>
</div>
<div class="gs_r gs_or gs_scl" data-cid="CID2">
  <h3 class="gs_rt"><a href="https://example.org/two">Sea ice decline</a></h3>
  <div class="gs_a">M Rossi, L Bianchi - Science, 2019 - science.org</div>
</div>
</body></html>
"#;

const EMPTY_PAGE: &str = "<html><body><p>Your search did not match any articles.</p></body></html>";

fn pagination_page(next_start: usize) -> String {
    format!(
        r#"<html><body><div id="gs_n"><a href="/scholar?start={}&amp;q=ocean">Next</a></div></body></html>"#,
        next_start
    )
}

fn scholar(config: &PipelineConfig) -> ScholarClient {
    ScholarClient::new(config, Arc::new(ProxyPool::default()), &[])
}

// =============================================================================
// Crossref
// =============================================================================

#[tokio::test]
async fn test_crossref_returns_first_item() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .and(query_param("rows", "1"))
        .and(query_param("select", "DOI,author"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "message": {"items": [{
                "DOI": "10.1038/ocean",
                "author": [{"given": "John", "family": "Smith"}, {"name": "Ocean Consortium"}]
            }]}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = CrossrefClient::new(&PipelineConfig::for_testing(&mock_server.uri()))?;
    let candidate = client.find_work("j smith 2020 \"warming oceans\"").await?;

    let candidate = candidate.ok_or_else(|| ScraperError::Parse("no candidate".to_string()))?;
    assert_eq!(candidate.doi, "10.1038/ocean");
    assert_eq!(
        candidate.authors,
        vec![
            CandidateAuthor::new(Some("John"), "Smith"),
            CandidateAuthor::new(None, "Ocean Consortium"),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_crossref_empty_and_rate_limited() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .and(query_param("query", "nothing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": {"items": []}})))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .and(query_param("query", "busy"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;

    let client = CrossrefClient::new(&PipelineConfig::for_testing(&mock_server.uri()))?;
    assert!(client.find_work("nothing").await?.is_none());

    let err = client.find_work("busy").await.err();
    assert!(matches!(err, Some(ScraperError::RateLimited(_))));
    assert!(err.is_some_and(|e| e.is_retryable()));
    Ok(())
}

// =============================================================================
// nationalize.io / genderize.io
// =============================================================================

#[tokio::test]
async fn test_nationalize_is_cached() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/nationalize"))
        .and(query_param("name", "Garcia"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 120,
            "name": "garcia",
            "country": [{"country_id": "ES", "probability": 0.31}, {"country_id": "MX", "probability": 0.2}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nationalize"))
        .and(query_param("name", "Zzyzx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 0, "name": "zzyzx", "country": []})))
        .mount(&mock_server)
        .await;

    let client = AgifyClient::new(&PipelineConfig::for_testing(&mock_server.uri()))?;
    let first = client.predict_nation("Garcia").await?;
    let second = client.predict_nation("Garcia").await?;
    assert_eq!(first, second);
    assert_eq!(first.map(|p| p.country_code), Some("ES".to_string()));

    assert!(client.predict_nation("Zzyzx").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_genderize_sends_country_hint() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/genderize"))
        .and(query_param("name", "Andrea"))
        .and(query_param("country_id", "IT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 900, "name": "andrea", "gender": "male", "probability": 0.96
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/genderize"))
        .and(query_param("name", "Xq"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 0, "name": "xq", "gender": null, "probability": 0.0
        })))
        .mount(&mock_server)
        .await;

    let client = AgifyClient::new(&PipelineConfig::for_testing(&mock_server.uri()))?;
    let prediction = client.predict_gender("Andrea", Some("IT")).await?;
    assert_eq!(prediction.gender, "male");
    assert_eq!(prediction.probability, Some(0.96));

    let unknown = client.predict_gender("Xq", None).await?;
    assert_eq!(unknown.gender, "");
    Ok(())
}

// =============================================================================
// Google Scholar
// =============================================================================

#[tokio::test]
async fn test_scholar_stream_pages_until_empty() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scholar"))
        .and(query_param("start", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/scholar"))
        .and(query_param("start", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = PipelineConfig::for_testing(&mock_server.uri());
    let mut stream = scholar(&config).search("ocean").await?;

    let mut ranks = Vec::new();
    while let Some(entry) = stream.next_entry().await? {
        ranks.push(entry.rank);
    }
    assert_eq!(ranks, vec![1, 2]);
    assert!(stream.next_entry().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_scholar_captcha_is_retryable() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scholar"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html><body>Our systems have detected unusual traffic from your computer network.</body></html>",
        ))
        .mount(&mock_server)
        .await;

    let config = PipelineConfig::for_testing(&mock_server.uri());
    let err = scholar(&config).fetch_results_page("ocean", 0).await.err();
    assert!(matches!(err, Some(ScraperError::Captcha)));
    Ok(())
}

#[tokio::test]
async fn test_probe_reaches_upper_bound() -> Result<()> {
    let mock_server = MockServer::start().await;
    for start in (940..1000).step_by(10) {
        Mock::given(method("GET"))
            .and(path("/scholar"))
            .and(query_param("start", start.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(pagination_page(start + 10)))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let config = PipelineConfig::for_testing(&mock_server.uri());
    assert_eq!(scholar(&config).available_count("ocean").await?, 1000);
    Ok(())
}

#[tokio::test]
async fn test_probe_tolerates_missing_pages() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scholar"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let config = PipelineConfig::for_testing(&mock_server.uri());
    assert_eq!(scholar(&config).available_count("ocean").await?, 940);
    Ok(())
}

// =============================================================================
// End to end
// =============================================================================

#[tokio::test]
async fn test_pipeline_against_mock_services() -> Result<()> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scholar"))
        .and(query_param("start", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_PAGE))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"items": [{
                "DOI": "10.1038/ocean",
                "author": [{"given": "John", "family": "Smith"}, {"given": "Ana", "family": "Lopez"}]
            }]}
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nationalize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "country": [{"country_id": "GB", "probability": 0.5}]
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/genderize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "gender": "female", "probability": 0.8
        })))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let config = PipelineConfig::for_testing(&mock_server.uri());
    let driver = PipelineDriver::from_config(
        &config,
        Arc::new(CooldownRecovery::new(config.recovery_cooldown)),
        Arc::new(ProxyPool::default()),
        &[],
        dir.path(),
    )?;

    let summary = driver.run("Ocean Warming", EntryCount::Exact(2)).await?;
    assert_eq!(summary.written, 2);

    let path = dir.path().join("oceanwarming.csv");
    let mut reader = csv::Reader::from_path(&path)?;
    assert_eq!(reader.headers()?.get(0), Some("GSRANK"));

    let rows = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][1], "PASS");
    assert_eq!(&rows[0][8], format!("{}/scholar?cluster=CID1&hl=en", mock_server.uri()));
    assert_eq!(&rows[0][9], "https://example.org/one");
    assert_eq!(&rows[0][10], "40");
    // Registry returned someone else's paper for the second hit
    assert_eq!(&rows[1][1], "MISSING");
    assert_eq!(&rows[1][2], "M Rossi, L Bianchi");
    assert_eq!(&rows[1][12], "female");

    // A second run finds everything stored and does not touch Scholar again
    let again = driver.run("Ocean Warming", EntryCount::Exact(2)).await?;
    assert_eq!(again.already_present, 2);
    assert_eq!(again.written, 0);
    Ok(())
}
