//! Crossref API client.
//!
//! Looks up the single best-matching work for a free-text query and returns
//! its DOI and structured author list.

use crate::config::PipelineConfig;
use crate::error::{Result, ScraperError};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Author entry as the registry reports it; `given` is absent for
/// organisations and unstructured records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateAuthor {
    pub given: Option<String>,
    /// Surname, or the whole name of an organisation
    pub family: String,
}

impl CandidateAuthor {
    /// Author with an optional given name and a family name.
    pub fn new(given: Option<&str>, family: &str) -> Self {
        Self {
            given: given.map(str::to_string),
            family: family.to_string(),
        }
    }
}

/// Best registry match for a search hit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    /// DOI without resolver prefix; empty when the record has none
    pub doi: String,
    pub authors: Vec<CandidateAuthor>,
}

/// Second bibliographic source used to resolve DOIs and authors.
#[async_trait]
pub trait BibliographicRegistry: Send + Sync {
    /// Return the single best match for `query`, or `None` when nothing matched.
    async fn find_work(&self, query: &str) -> Result<Option<Candidate>>;
}

/// Crossref works API client
pub struct CrossrefClient {
    client: reqwest::Client,
    works_url: String,
    mailto: String,
}

impl CrossrefClient {
    /// Client for `config.crossref_url`, identified by `config.mailto`.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("gscraper/0.1 (mailto:{})", config.mailto))
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ScraperError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            works_url: config.crossref_url.clone(),
            mailto: config.mailto.clone(),
        })
    }
}

#[async_trait]
impl BibliographicRegistry for CrossrefClient {
    async fn find_work(&self, query: &str) -> Result<Option<Candidate>> {
        debug!(query = %query.chars().take(80).collect::<String>(), "Querying Crossref");

        let response = self
            .client
            .get(&self.works_url)
            .query(&[
                ("query", query),
                ("select", "DOI,author"),
                ("rows", "1"),
                ("mailto", self.mailto.as_str()),
            ])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ScraperError::RateLimited(5));
        }

        if !response.status().is_success() {
            return Err(ScraperError::Api {
                code: i32::from(response.status().as_u16()),
                message: format!("Crossref API error: {}", response.status()),
            });
        }

        let data: CrossrefResponse = response.json().await?;
        Ok(data.message.items.into_iter().next().map(Candidate::from))
    }
}

// === Crossref API Response Types ===

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    message: CrossrefMessage,
}

#[derive(Debug, Deserialize)]
struct CrossrefMessage {
    #[serde(default)]
    items: Vec<CrossrefItem>,
}

#[derive(Debug, Deserialize)]
struct CrossrefItem {
    #[serde(rename = "DOI", default)]
    doi: String,
    #[serde(default)]
    author: Vec<CrossrefAuthor>,
}

/// Person authors carry `given`/`family`; organisations carry only `name`.
#[derive(Debug, Deserialize)]
struct CrossrefAuthor {
    #[serde(default)]
    given: Option<String>,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl CrossrefAuthor {
    fn into_candidate(self) -> Option<CandidateAuthor> {
        let family = [self.family, self.name]
            .into_iter()
            .flatten()
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())?;
        let given = self.given.filter(|g| !g.trim().is_empty());
        Some(CandidateAuthor { given, family })
    }
}

impl From<CrossrefItem> for Candidate {
    fn from(item: CrossrefItem) -> Self {
        Self {
            doi: item.doi,
            authors: item
                .author
                .into_iter()
                .filter_map(CrossrefAuthor::into_candidate)
                .collect(),
        }
    }
}

/// Resolver URL for a DOI, empty when there is none
pub fn doi_url(doi: &str) -> String {
    if doi.is_empty() {
        String::new()
    } else {
        format!("https://doi.org/{}", doi)
    }
}
