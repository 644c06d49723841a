//! Search session over the upstream result stream.
//!
//! A [`SearchSource`] produces a lazy, single-pass [`ResultStream`] of
//! [`RawEntry`] values. [`SearchSession`] wraps a source with the shared retry
//! policy: opening the stream is retried with recovery between attempts, and
//! running out of attempts is fatal for the whole run.

use crate::config::EntryCount;
use crate::error::{Result, ScraperError};
use crate::recovery::Recovery;
use crate::retry::{Attempt, RetryPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// One search hit as reported by the search source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    /// 1-based position in the result stream
    pub rank: u32,
    /// "; "-joined author display names ("J Smith; A Jones")
    pub authors: String,
    /// Search-source profile IDs of linked authors
    pub author_ids: Vec<String>,
    /// Publication year, may be empty
    pub year: String,
    /// Title
    pub title: String,
    /// Publication URL, if the hit links one
    pub pub_url: Option<String>,
    /// Relative "cite" link of the hit
    pub cite_link: Option<String>,
    /// Citation count
    pub citations: u32,
}

impl RawEntry {
    /// Reject hits that lack the fields reconciliation depends on.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(ScraperError::MalformedItem {
                rank: self.rank,
                reason: "missing title".to_string(),
            });
        }
        if self.author_tokens().next().is_none() {
            return Err(ScraperError::MalformedItem {
                rank: self.rank,
                reason: "missing authors".to_string(),
            });
        }
        Ok(())
    }

    /// Non-empty author tokens in display order
    pub fn author_tokens(&self) -> impl Iterator<Item = &str> {
        self.authors.split(';').map(str::trim).filter(|t| !t.is_empty())
    }
}

/// Lazy, ordered, non-restartable sequence of search hits.
#[async_trait]
pub trait ResultStream: Send {
    /// Advance the stream by one hit; `None` once upstream has no more.
    async fn next_entry(&mut self) -> Result<Option<RawEntry>>;
}

/// Upstream academic search source.
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Submit the query and return the result stream.
    async fn search(&self, query: &str) -> Result<Box<dyn ResultStream>>;

    /// Probe pagination for the number of results actually reachable.
    async fn available_count(&self, query: &str) -> Result<usize>;
}

struct OpenAttempt<'a> {
    source: &'a dyn SearchSource,
    query: &'a str,
}

#[async_trait]
impl Attempt for OpenAttempt<'_> {
    type Output = Box<dyn ResultStream>;

    async fn attempt(&mut self, attempt: u32) -> Result<Self::Output> {
        info!(query = self.query, attempt, "Connecting to the search source");
        self.source.search(self.query).await
    }
}

/// A search source guarded by the shared retry policy.
pub struct SearchSession {
    source: Arc<dyn SearchSource>,
    retry: RetryPolicy,
    recovery: Arc<dyn Recovery>,
    max_entries: usize,
}

impl SearchSession {
    /// Session over `source`, reporting at most `max_entries` available.
    pub fn new(
        source: Arc<dyn SearchSource>,
        retry: RetryPolicy,
        recovery: Arc<dyn Recovery>,
        max_entries: usize,
    ) -> Self {
        Self {
            source,
            retry,
            recovery,
            max_entries,
        }
    }

    /// Open the result stream, retrying with recovery.
    ///
    /// Fails with [`ScraperError::UpstreamUnavailable`] once the retry budget
    /// is spent; callers treat that as fatal for the run.
    pub async fn open(&self, query: &str) -> Result<Box<dyn ResultStream>> {
        let mut op = OpenAttempt {
            source: self.source.as_ref(),
            query,
        };
        match self.retry.run("open search session", &mut op, self.recovery.as_ref()).await {
            Ok(stream) => {
                info!(query, "Search session established");
                Ok(stream)
            }
            Err(ScraperError::ExhaustedRetries { attempts, last_error, .. }) => {
                Err(ScraperError::UpstreamUnavailable(format!(
                    "search source unreachable after {} attempts: {}",
                    attempts, last_error
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// Number of entries the run should cover.
    ///
    /// `Exact(n)` is taken as-is; `All` probes upstream pagination and caps the
    /// result at the configured maximum.
    pub async fn available_count(&self, query: &str, requested: EntryCount) -> Result<usize> {
        match requested {
            EntryCount::Exact(n) => Ok(n.min(self.max_entries)),
            EntryCount::All => {
                let count = self.source.available_count(query).await?;
                Ok(count.min(self.max_entries))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::CooldownRecovery;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct EmptyStream;

    #[async_trait]
    impl ResultStream for EmptyStream {
        async fn next_entry(&mut self) -> Result<Option<RawEntry>> {
            Ok(None)
        }
    }

    struct FlakySource {
        calls: AtomicU32,
        fail_first: u32,
        available: usize,
    }

    #[async_trait]
    impl SearchSource for FlakySource {
        async fn search(&self, _query: &str) -> Result<Box<dyn ResultStream>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                return Err(ScraperError::Captcha);
            }
            Ok(Box::new(EmptyStream))
        }

        async fn available_count(&self, _query: &str) -> Result<usize> {
            Ok(self.available)
        }
    }

    fn session(source: Arc<FlakySource>, attempts: u32) -> SearchSession {
        SearchSession::new(
            source,
            RetryPolicy::new(attempts),
            Arc::new(CooldownRecovery::new(Duration::ZERO)),
            1000,
        )
    }

    #[tokio::test]
    async fn test_open_retries_until_success() -> Result<()> {
        let source = Arc::new(FlakySource { calls: AtomicU32::new(0), fail_first: 2, available: 0 });
        let mut stream = session(Arc::clone(&source), 5).open("q").await?;
        assert!(stream.next_entry().await?.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_exhaustion_is_upstream_unavailable() {
        let source = Arc::new(FlakySource { calls: AtomicU32::new(0), fail_first: u32::MAX, available: 0 });
        let result = session(Arc::clone(&source), 3).open("q").await;
        assert!(matches!(result, Err(ScraperError::UpstreamUnavailable(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_available_count_caps_probe() -> Result<()> {
        let source = Arc::new(FlakySource { calls: AtomicU32::new(0), fail_first: 0, available: 1200 });
        let session = session(source, 1);
        assert_eq!(session.available_count("q", EntryCount::All).await?, 1000);
        assert_eq!(session.available_count("q", EntryCount::Exact(25)).await?, 25);
        Ok(())
    }

    #[test]
    fn test_validate_entry() {
        let entry = RawEntry {
            rank: 1,
            authors: "J Smith; A Jones".to_string(),
            title: "A title".to_string(),
            ..Default::default()
        };
        assert!(entry.validate().is_ok());
        assert_eq!(entry.author_tokens().collect::<Vec<_>>(), vec!["J Smith", "A Jones"]);

        let untitled = RawEntry { title: " ".to_string(), ..entry.clone() };
        assert!(matches!(untitled.validate(), Err(ScraperError::MalformedItem { rank: 1, .. })));

        let anonymous = RawEntry { authors: " ; ".to_string(), ..entry };
        assert!(matches!(anonymous.validate(), Err(ScraperError::MalformedItem { .. })));
    }
}
