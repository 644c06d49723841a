//! Browser cookies sent with Google Scholar requests.
//!
//! A session exported from a real browser (after solving a CAPTCHA) makes
//! blocks far less frequent. Cookies are kept as a JSON list on disk and sent
//! as a single `Cookie` header.

use crate::error::{Result, ScraperError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default cookie file path: `~/.gscraper_cookies.json`
fn default_cookie_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".gscraper_cookies.json"))
        .ok_or_else(|| ScraperError::Config("Cannot determine home directory".to_string()))
}

/// Cookie entry in the usual browser export format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
}

/// Render the cookies whose domain contains `domain` as a `Cookie` header value.
pub fn header_for(cookies: &[Cookie], domain: &str) -> String {
    cookies
        .iter()
        .filter(|c| c.domain.contains(domain))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Cookie file on disk
pub struct CookieJar {
    path: PathBuf,
}

impl CookieJar {
    /// Jar at the default location
    pub fn new() -> Result<Self> {
        Ok(Self {
            path: default_cookie_path()?,
        })
    }

    /// Jar stored at `path` instead of the home directory.
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Location of the cookie file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cookies; a missing or unreadable file yields an empty list.
    pub fn load(&self) -> Vec<Cookie> {
        if !self.path.exists() {
            debug!("Cookie file not found: {:?}", self.path);
            return Vec::new();
        }

        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<Vec<Cookie>>(&content) {
                Ok(cookies) => cookies,
                Err(e) => {
                    warn!("Failed to parse cookies: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Failed to read cookie file: {}", e);
                Vec::new()
            }
        }
    }

    /// Overwrite the cookie file with `cookies`.
    pub fn save(&self, cookies: &[Cookie]) -> Result<()> {
        let content = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, content)?;
        info!("Saved {} cookies to {:?}", cookies.len(), self.path);
        Ok(())
    }

    /// Replace the jar with cookies read from an exported JSON file.
    pub fn import(&self, source: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(source)?;
        let cookies: Vec<Cookie> = serde_json::from_str(&content)?;
        self.save(&cookies)?;
        Ok(cookies.len())
    }

    /// Delete the cookie file if it exists.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!("Cleared cookies at {:?}", self.path);
        }
        Ok(())
    }
}
