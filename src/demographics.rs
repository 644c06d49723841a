//! Nation and gender prediction for reconciled authors.
//!
//! Predictions come from the nationalize.io / genderize.io services. The
//! enricher owns the name clean-up those services need: hyphenated names are
//! cut to their first part and abbreviated given names are reduced to their
//! first written-out word.

use crate::config::PipelineConfig;
use crate::error::{Result, ScraperError};
use crate::reconcile::ReconciledAuthor;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Most likely country of a name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NationPrediction {
    /// ISO 3166-1 alpha-2 code, empty when unknown
    pub country_code: String,
    pub probability: f64,
}

/// Most likely gender of a given name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenderPrediction {
    /// "male"/"female", empty when unknown
    pub gender: String,
    pub probability: Option<f64>,
}

/// Predictions for one author.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Demographics {
    pub nation: NationPrediction,
    pub gender: GenderPrediction,
}

/// Demographic inference collaborator.
#[async_trait]
pub trait DemographicService: Send + Sync {
    /// Country prediction for a name; `None` when the service knows no country.
    async fn predict_nation(&self, name: &str) -> Result<Option<NationPrediction>>;

    /// Gender prediction for a given name, optionally localised to a country.
    async fn predict_gender(&self, name: &str, country_hint: Option<&str>) -> Result<GenderPrediction>;
}

/// Cut a name at its first hyphen (ASCII or Unicode), keeping the first part.
fn truncate_at_hyphen(name: &str) -> &str {
    name.split(['-', '\u{2010}', '\u{2011}'])
        .next()
        .unwrap_or(name)
        .trim()
}

/// Family name as sent to the nation service: "Garcia-Lopez" -> "Garcia".
pub fn normalize_family(family: &str) -> String {
    truncate_at_hyphen(family).to_string()
}

/// Given name as sent to the gender service.
///
/// "Jean-Paul" becomes "Jean". A name containing a period is an abbreviation:
/// it is split on periods and spaces and the first word longer than an
/// initial is kept ("J. Paul" -> "Paul"); with initials only, the first
/// initial is kept ("J.-P." -> "J").
pub fn normalize_given(given: &str) -> String {
    let given = truncate_at_hyphen(given);
    if !given.contains('.') {
        return given.to_string();
    }

    let parts: Vec<&str> = given
        .split(|c: char| c == '.' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();

    parts
        .iter()
        .find(|p| p.chars().count() > 1)
        .or_else(|| parts.first())
        .map(|p| p.to_string())
        .unwrap_or_default()
}

/// Derives nation and gender for reconciled authors.
pub struct DemographicEnricher {
    service: Arc<dyn DemographicService>,
}

impl DemographicEnricher {
    /// Enricher backed by `service`.
    pub fn new(service: Arc<dyn DemographicService>) -> Self {
        Self { service }
    }

    /// Nation from the family name, falling back to the given name.
    pub async fn nation(&self, given: &str, family: &str) -> Result<NationPrediction> {
        let given = given.trim();
        let surname = normalize_family(family);

        if !surname.is_empty() {
            if let Some(prediction) = self.service.predict_nation(&surname).await? {
                return Ok(prediction);
            }
        }
        if !given.is_empty() {
            if let Some(prediction) = self.service.predict_nation(given).await? {
                return Ok(prediction);
            }
        }
        Ok(NationPrediction::default())
    }

    /// Gender from the normalised given name, using the nation as a hint.
    pub async fn gender(&self, given: &str, family: &str, nation: &NationPrediction) -> Result<GenderPrediction> {
        if given.trim().is_empty() && family.trim().is_empty() {
            return Ok(GenderPrediction::default());
        }

        let name = normalize_given(given);
        if name.is_empty() {
            debug!(family, "No given name to predict gender from");
            return Ok(GenderPrediction::default());
        }

        let hint = Some(nation.country_code.as_str()).filter(|c| !c.is_empty());
        self.service.predict_gender(&name, hint).await
    }

    /// Nation and gender for one author.
    pub async fn enrich(&self, author: &ReconciledAuthor) -> Result<Demographics> {
        let nation = self.nation(&author.given, &author.family).await?;
        let gender = self.gender(&author.given, &author.family, &nation).await?;
        Ok(Demographics { nation, gender })
    }
}

// === nationalize.io / genderize.io client ===

#[derive(Debug, Deserialize)]
struct NationalizeResponse {
    #[serde(default)]
    country: Vec<NationalizeCountry>,
}

#[derive(Debug, Deserialize)]
struct NationalizeCountry {
    country_id: String,
    #[serde(default)]
    probability: f64,
}

#[derive(Debug, Deserialize)]
struct GenderizeResponse {
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    probability: Option<f64>,
}

type GenderKey = (String, String);

/// Client for the nationalize.io and genderize.io APIs.
///
/// Answers are cached per name (and country), since the same authors recur
/// across records.
pub struct AgifyClient {
    client: reqwest::Client,
    nationalize_url: String,
    genderize_url: String,
    api_key: Option<String>,
    nations: Mutex<HashMap<String, Option<NationPrediction>>>,
    genders: Mutex<HashMap<GenderKey, GenderPrediction>>,
}

impl AgifyClient {
    /// Client for the nationalize and genderize endpoints in `config`.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ScraperError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            nationalize_url: config.nationalize_url.clone(),
            genderize_url: config.genderize_url.clone(),
            api_key: config.inference_api_key.clone(),
            nations: Mutex::new(HashMap::new()),
            genders: Mutex::new(HashMap::new()),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let mut request = self.client.get(url).query(params);
        if let Some(key) = &self.api_key {
            request = request.query(&[("apikey", key.as_str())]);
        }

        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ScraperError::RateLimited(60));
        }
        if !response.status().is_success() {
            return Err(ScraperError::Api {
                code: i32::from(response.status().as_u16()),
                message: format!("Inference API error: {}", response.status()),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl DemographicService for AgifyClient {
    async fn predict_nation(&self, name: &str) -> Result<Option<NationPrediction>> {
        let key = name.to_lowercase();
        if let Some(cached) = self.nations.lock().ok().and_then(|c| c.get(&key).cloned()) {
            debug!(name, "Nation cache hit");
            return Ok(cached);
        }

        let data: NationalizeResponse = self.get_json(&self.nationalize_url, &[("name", name)]).await?;
        let prediction = data.country.into_iter().next().map(|c| NationPrediction {
            country_code: c.country_id,
            probability: c.probability,
        });

        if let Ok(mut cache) = self.nations.lock() {
            cache.insert(key, prediction.clone());
        }
        Ok(prediction)
    }

    async fn predict_gender(&self, name: &str, country_hint: Option<&str>) -> Result<GenderPrediction> {
        let key = (name.to_lowercase(), country_hint.unwrap_or_default().to_string());
        if let Some(cached) = self.genders.lock().ok().and_then(|c| c.get(&key).cloned()) {
            debug!(name, "Gender cache hit");
            return Ok(cached);
        }

        let mut params = vec![("name", name)];
        if let Some(country) = country_hint {
            params.push(("country_id", country));
        }
        let data: GenderizeResponse = self.get_json(&self.genderize_url, &params).await?;
        let prediction = GenderPrediction {
            gender: data.gender.unwrap_or_default(),
            probability: data.probability,
        };

        if let Ok(mut cache) = self.genders.lock() {
            cache.insert(key, prediction.clone());
        }
        Ok(prediction)
    }
}
