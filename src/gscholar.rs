//! Google Scholar search source.
//!
//! Fetches result pages over HTTP, parses each hit into a [`RawEntry`] and
//! exposes them as a lazy [`ScholarStream`]. Also implements the pagination
//! probe used to find out how many results a query really reaches.

use crate::config::PipelineConfig;
use crate::cookies::{self, Cookie};
use crate::error::{OptionExt, Result, ScraperError};
use crate::recovery::ProxyPool;
use crate::session::{RawEntry, ResultStream, SearchSource};
use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// User agent string for requests
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Source data type filter: articles, no patents
const SDT_ARTICLES: &str = "0,5";

/// Segment of a cite link that does not belong in the cluster link
const CITE_SEGMENT: &str = ":scholar.google.com/&output=cite&scirp=";

/// Client built for one egress proxy, with the number of builds so far
struct CachedClient {
    proxy: Option<String>,
    client: reqwest::Client,
    builds: u32,
}

/// HTTP client for Google Scholar.
#[derive(Clone)]
pub struct ScholarClient {
    base_url: String,
    proxies: Arc<ProxyPool>,
    http: Arc<Mutex<Option<CachedClient>>>,
    cookie_header: String,
    request_timeout: Duration,
    connect_timeout: Duration,
    page_stride: usize,
    page_delay_ms: (u64, u64),
    probe_offset: usize,
    probe_interval: Duration,
    max_entries: usize,
}

impl ScholarClient {
    /// Client sending `cookies` and routing through `proxies`.
    pub fn new(config: &PipelineConfig, proxies: Arc<ProxyPool>, cookies: &[Cookie]) -> Self {
        let cookie_header = cookies::header_for(cookies, "google");
        if cookie_header.is_empty() {
            warn!("No cookies loaded. Run 'gscraper cookies import <file>' to add browser cookies.");
        } else {
            info!("Loaded {} cookies for Google Scholar", cookies.len());
        }

        Self {
            base_url: config.scholar_url.trim_end_matches('/').to_string(),
            proxies,
            http: Arc::new(Mutex::new(None)),
            cookie_header,
            request_timeout: config.request_timeout,
            connect_timeout: config.connect_timeout,
            page_stride: config.page_stride,
            page_delay_ms: config.page_delay_ms,
            probe_offset: config.probe_offset,
            probe_interval: config.probe_interval,
            max_entries: config.max_entries,
        }
    }

    /// HTTP client going through the pool's current proxy.
    ///
    /// Reused across pages and rebuilt only after the proxy has rotated.
    fn http_client(&self) -> Result<reqwest::Client> {
        let proxy = self.proxies.current();
        let mut cache = self
            .http
            .lock()
            .map_err(|_| ScraperError::Config("HTTP client cache poisoned".to_string()))?;

        let builds = match cache.as_ref() {
            Some(cached) if cached.proxy.as_deref() == proxy => return Ok(cached.client.clone()),
            Some(cached) => cached.builds,
            None => 0,
        };

        let client = self.build_http_client(proxy)?;
        debug!(proxy = proxy.unwrap_or("none"), builds = builds + 1, "Built Scholar HTTP client");
        *cache = Some(CachedClient {
            proxy: proxy.map(str::to_string),
            client: client.clone(),
            builds: builds + 1,
        });
        Ok(client)
    }

    fn build_http_client(&self, proxy: Option<&str>) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .cookie_store(true);

        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                ScraperError::Config(format!("Invalid proxy URL '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| ScraperError::Config(format!("Failed to build HTTP client: {}", e)))
    }

    /// Fetch and parse one page of results starting at offset `start`.
    pub async fn fetch_results_page(&self, query: &str, start: usize) -> Result<Vec<RawEntry>> {
        let url = build_search_url(&self.base_url, query, start)?;

        // Random delay to avoid detection
        let (low, high) = self.page_delay_ms;
        if high > 0 {
            let delay = rand::thread_rng().gen_range(low..=high.max(low));
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        debug!(start, url = %url, "Fetching page");
        let html = self.fetch_page(&url).await?;
        let first_rank = u32::try_from(start + 1)
            .map_err(|_| ScraperError::Validation(format!("offset {} out of range", start)))?;
        let entries = parse_result_items(&html, first_rank)?;
        debug!(start, count = entries.len(), "Parsed results");
        Ok(entries)
    }

    /// Fetch page content, mapping blocks and HTTP errors.
    async fn fetch_page(&self, url: &Url) -> Result<String> {
        let mut request = self
            .http_client()?
            .get(url.as_str())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Cache-Control", "no-cache")
            .header("Upgrade-Insecure-Requests", "1");

        if !self.cookie_header.is_empty() {
            request = request.header("Cookie", &self.cookie_header);
        }

        let response = request.send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ScraperError::RateLimited(60));
        }

        if !status.is_success() {
            return Err(ScraperError::Api {
                code: i32::from(status.as_u16()),
                message: format!("HTTP error: {}", status),
            });
        }

        let html = response.text().await?;
        if html.contains("Solving the above CAPTCHA") || html.contains("unusual traffic") {
            warn!(url = %url, "CAPTCHA detected");
            return Err(ScraperError::Captcha);
        }
        Ok(html)
    }

    /// Page through results beyond `probe_offset` to find how far a query reaches.
    ///
    /// Each page that exposes a pagination link adds one stride to the count.
    /// A missing or unreachable page is logged and skipped.
    pub async fn probe_available(&self, query: &str) -> Result<usize> {
        let mut url = build_probe_url(&self.base_url, query, self.probe_offset)?;
        let mut count = self.probe_offset;
        let mut page = self.probe_offset;

        while page < self.max_entries {
            let next = match self.fetch_page(&url).await {
                Ok(html) => next_page_link(&html),
                Err(e) => Err(e),
            };

            match next.and_then(|href| resolve_link(&self.base_url, &href)) {
                Ok(next_url) => {
                    url = next_url;
                    count += self.page_stride;
                }
                Err(e) => {
                    warn!(page, error = %e, "Result page could not be found");
                }
            }

            page += self.page_stride;
            if page < self.max_entries {
                tokio::time::sleep(self.probe_interval).await;
            }
        }

        info!(query, count, "Total number of results reachable");
        Ok(count.min(self.max_entries))
    }
}

#[async_trait]
impl SearchSource for ScholarClient {
    async fn search(&self, query: &str) -> Result<Box<dyn ResultStream>> {
        let stream = ScholarStream::open(self.clone(), query).await?;
        Ok(Box::new(stream))
    }

    async fn available_count(&self, query: &str) -> Result<usize> {
        self.probe_available(query).await
    }
}

/// Lazy stream over Google Scholar result pages.
///
/// Pages are fetched on demand when the buffer runs dry. A failed fetch leaves
/// the offset untouched, so the next advance asks for the same page again.
pub struct ScholarStream {
    client: ScholarClient,
    query: String,
    buffer: VecDeque<RawEntry>,
    next_start: usize,
    finished: bool,
}

impl ScholarStream {
    /// Open the stream by fetching its first page.
    pub async fn open(client: ScholarClient, query: &str) -> Result<Self> {
        let mut stream = Self {
            client,
            query: query.to_string(),
            buffer: VecDeque::new(),
            next_start: 0,
            finished: false,
        };
        stream.fill().await?;
        Ok(stream)
    }

    async fn fill(&mut self) -> Result<()> {
        if self.next_start >= self.client.max_entries {
            self.finished = true;
            return Ok(());
        }
        let page = self.client.fetch_results_page(&self.query, self.next_start).await?;
        if page.is_empty() {
            debug!(start = self.next_start, "No more results");
            self.finished = true;
        } else {
            self.next_start += self.client.page_stride;
            self.buffer.extend(page);
        }
        Ok(())
    }
}

#[async_trait]
impl ResultStream for ScholarStream {
    async fn next_entry(&mut self) -> Result<Option<RawEntry>> {
        if self.buffer.is_empty() && !self.finished {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front())
    }
}

/// Build Google Scholar search URL
fn build_search_url(base_url: &str, query: &str, start: usize) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/scholar", base_url))
        .map_err(|e| ScraperError::Config(format!("Invalid base URL: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("q", query)
        .append_pair("hl", "en") // English locale for consistent parsing
        .append_pair("start", &start.to_string())
        .append_pair("as_sdt", SDT_ARTICLES);

    Ok(url)
}

/// Build the URL the availability probe starts from
fn build_probe_url(base_url: &str, query: &str, start: usize) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/scholar", base_url))
        .map_err(|e| ScraperError::Config(format!("Invalid base URL: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("start", &start.to_string())
        .append_pair("q", query);
    Ok(url)
}

fn resolve_link(base_url: &str, href: &str) -> Result<Url> {
    let base = Url::parse(base_url)
        .map_err(|e| ScraperError::Config(format!("Invalid base URL: {}", e)))?;
    base.join(href)
        .map_err(|e| ScraperError::Parse(format!("Invalid pagination link '{}': {}", href, e)))
}

/// Extract the last pagination link of a results page.
pub fn next_page_link(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("div#gs_n a").map_err(|e| ScraperError::Parse(e.to_string()))?;

    document
        .select(&selector)
        .last()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
        .ok_or_parse("no pagination links on page")
}

/// Render the public cluster link of a hit from its cite link.
///
/// `/scholar?q=info:ABC:scholar.google.com/&output=cite&scirp=3&hl=en`
/// becomes `<base>/scholar?cluster=ABC&hl=en`.
pub fn scholar_link(base_url: &str, cite_link: &str) -> String {
    if cite_link.is_empty() {
        return String::new();
    }
    let mut link = cite_link.replace("?q=info:", "?cluster=");
    if let Some(pos) = link.find(CITE_SEGMENT) {
        let tail_start = pos + CITE_SEGMENT.len();
        let digits = link[tail_start..]
            .chars()
            .take_while(char::is_ascii_digit)
            .count();
        link.replace_range(pos..tail_start + digits, "");
    }
    format!("{}{}", base_url.trim_end_matches('/'), link)
}

/// Parse Google Scholar HTML into raw entries.
///
/// Every result block yields an entry, even when fields are missing, so that
/// ranks stay aligned with positions on the page. `first_rank` is the rank of
/// the first block.
pub fn parse_result_items(html: &str, first_rank: u32) -> Result<Vec<RawEntry>> {
    let document = Html::parse_document(html);

    let item_selector =
        Selector::parse("div.gs_r.gs_or.gs_scl").map_err(|e| ScraperError::Parse(e.to_string()))?;
    let title_selector =
        Selector::parse("h3.gs_rt").map_err(|e| ScraperError::Parse(e.to_string()))?;
    let link_selector =
        Selector::parse("h3.gs_rt a").map_err(|e| ScraperError::Parse(e.to_string()))?;
    let meta_selector =
        Selector::parse("div.gs_a").map_err(|e| ScraperError::Parse(e.to_string()))?;
    let author_link_selector =
        Selector::parse("div.gs_a a").map_err(|e| ScraperError::Parse(e.to_string()))?;
    let cite_selector =
        Selector::parse("div.gs_fl a").map_err(|e| ScraperError::Parse(e.to_string()))?;

    let year_regex =
        Regex::new(r"\b(19|20)\d{2}\b").map_err(|e| ScraperError::Parse(e.to_string()))?;
    let cited_regex =
        Regex::new(r"Cited by\s*(\d+)").map_err(|e| ScraperError::Parse(e.to_string()))?;
    let user_regex =
        Regex::new(r"[?&]user=([^&]+)").map_err(|e| ScraperError::Parse(e.to_string()))?;

    let mut results = Vec::new();

    for (rank, item) in (first_rank..).zip(document.select(&item_selector)) {
        let mut entry = RawEntry {
            rank,
            ..Default::default()
        };

        // Title and publication URL
        if let Some(link) = item.select(&link_selector).next() {
            entry.title = collapse_whitespace(&link.text().collect::<String>());
            entry.pub_url = link.value().attr("href").map(str::to_string);
        } else if let Some(title_elem) = item.select(&title_selector).next() {
            entry.title = strip_title_tags(&collapse_whitespace(&title_elem.text().collect::<String>()));
        }

        // "J Smith, A Jones - Nature, 2020 - nature.com"
        if let Some(meta_elem) = item.select(&meta_selector).next() {
            let meta_text = meta_elem.text().collect::<String>().replace('\u{a0}', " ");
            let mut parts = meta_text.split(" - ");
            if let Some(authors) = parts.next() {
                entry.authors = join_author_tokens(authors);
            }
            if let Some(venue_year) = parts.next() {
                if let Some(year) = year_regex.find(venue_year) {
                    entry.year = year.as_str().to_string();
                }
            }
        }

        entry.author_ids = item
            .select(&author_link_selector)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| user_regex.captures(href))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect();

        for link in item.select(&cite_selector) {
            let href = link.value().attr("href").unwrap_or("");
            if href.contains("cites=") {
                let text = link.text().collect::<String>();
                if let Some(count) = cited_regex.captures(&text).and_then(|c| c.get(1)) {
                    entry.citations = count.as_str().parse().unwrap_or(0);
                    break;
                }
            }
        }

        if let Some(cid) = item.value().attr("data-cid") {
            entry.cite_link = Some(format!(
                "/scholar?q=info:{}{}{}&hl=en",
                cid,
                CITE_SEGMENT,
                rank - 1
            ));
        }

        results.push(entry);
    }

    Ok(results)
}

/// Turn a comma-separated author list into "; "-joined tokens.
fn join_author_tokens(authors: &str) -> String {
    authors
        .split(',')
        .map(|token| token.trim().trim_end_matches('…').trim())
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop "[PDF]"/"[CITATION]" style markers from unlinked titles
fn strip_title_tags(title: &str) -> String {
    let mut rest = title.trim();
    while rest.starts_with('[') {
        match rest.find(']') {
            Some(end) => rest = rest[end + 1..].trim_start(),
            None => break,
        }
    }
    rest.to_string()
}
