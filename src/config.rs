//! Pipeline configuration.
//!
//! All timing, retry and endpoint settings live in [`PipelineConfig`]. The CLI
//! fills it from flags and environment variables; tests build one with zero
//! delays pointing at mock servers.

use crate::error::{Result, ScraperError};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Endpoint defaults.
pub mod endpoints {
    /// Google Scholar base URL
    pub const SCHOLAR: &str = "https://scholar.google.com";

    /// Crossref works endpoint
    pub const CROSSREF_WORKS: &str = "https://api.crossref.org/works";

    /// Nationality inference endpoint
    pub const NATIONALIZE: &str = "https://api.nationalize.io";

    /// Gender inference endpoint
    pub const GENDERIZE: &str = "https://api.genderize.io";

    /// Polite pool email for Crossref
    pub const MAILTO: &str = "gscraper@example.com";
}

/// Attempts allowed for opening the session and for each entry
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Upper bound on entries Google Scholar will page through
pub const MAX_ENTRIES: usize = 1000;

/// How many entries to request: everything available, or an exact number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryCount {
    /// Probe upstream pagination and take all it exposes (capped)
    #[default]
    All,
    /// A fixed number of entries
    Exact(usize),
}

impl FromStr for EntryCount {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        let n: usize = s
            .parse()
            .map_err(|_| ScraperError::Validation(format!("'{}' is not a number or 'all'", s)))?;
        if n == 0 || n > MAX_ENTRIES {
            return Err(ScraperError::Validation(format!(
                "entry count must be in 1..={}, got {}",
                MAX_ENTRIES, n
            )));
        }
        Ok(Self::Exact(n))
    }
}

impl fmt::Display for EntryCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Exact(n) => write!(f, "{}", n),
        }
    }
}

/// Every tunable of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Attempts per upstream operation before giving up
    pub max_attempts: u32,
    /// Wait performed by the recovery action before the next attempt
    pub recovery_cooldown: Duration,
    /// Pause after every store append
    pub store_cooldown: Duration,
    /// Offset where the availability probe starts paging
    pub probe_offset: usize,
    /// Hard cap on entries per query
    pub max_entries: usize,
    /// Results per upstream page
    pub page_stride: usize,
    /// Wait between probe pages
    pub probe_interval: Duration,
    /// Random delay range (ms) before each result page fetch
    pub page_delay_ms: (u64, u64),
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Search source base URL
    pub scholar_url: String,
    /// Crossref works endpoint
    pub crossref_url: String,
    /// Nationality inference endpoint
    pub nationalize_url: String,
    /// Gender inference endpoint
    pub genderize_url: String,
    /// Crossref polite pool email
    pub mailto: String,
    /// API key for the inference services
    pub inference_api_key: Option<String>,
    /// Egress proxies to rotate through on failure
    pub proxies: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            recovery_cooldown: Duration::from_secs(15),
            store_cooldown: Duration::from_secs(3),
            probe_offset: 940,
            max_entries: MAX_ENTRIES,
            page_stride: 10,
            probe_interval: Duration::from_secs(15),
            page_delay_ms: (500, 2000),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            scholar_url: endpoints::SCHOLAR.to_string(),
            crossref_url: endpoints::CROSSREF_WORKS.to_string(),
            nationalize_url: endpoints::NATIONALIZE.to_string(),
            genderize_url: endpoints::GENDERIZE.to_string(),
            mailto: endpoints::MAILTO.to_string(),
            inference_api_key: None,
            proxies: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Configuration with every delay removed, for tests against local mocks.
    pub fn for_testing(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            recovery_cooldown: Duration::ZERO,
            store_cooldown: Duration::ZERO,
            probe_interval: Duration::ZERO,
            page_delay_ms: (0, 0),
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            scholar_url: base.to_string(),
            crossref_url: format!("{}/works", base),
            nationalize_url: format!("{}/nationalize", base),
            genderize_url: format!("{}/genderize", base),
            ..Self::default()
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ScraperError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.page_stride == 0 {
            return Err(ScraperError::Config("page_stride must be at least 1".to_string()));
        }
        if self.page_delay_ms.0 > self.page_delay_ms.1 {
            return Err(ScraperError::Config(format!(
                "invalid page delay range {}..={}",
                self.page_delay_ms.0, self.page_delay_ms.1
            )));
        }
        Ok(())
    }
}
