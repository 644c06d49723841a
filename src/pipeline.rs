//! Retrieval, reconciliation, enrichment and persistence loop.
//!
//! [`PipelineDriver::run`] reads which ranks are already stored, opens one
//! search session and walks the result stream in order. Each step of the
//! stream goes through [`EntryProcessor::process`], which advances the stream
//! once per attempt under the shared retry policy.

use crate::config::{EntryCount, PipelineConfig};
use crate::cookies::Cookie;
use crate::crossref::CrossrefClient;
use crate::demographics::{AgifyClient, DemographicEnricher};
use crate::error::{Result, ScraperError};
use crate::gscholar::ScholarClient;
use crate::reconcile::RecordReconciler;
use crate::record::{AuthorProfile, EnrichedRecord};
use crate::recovery::{ProxyPool, Recovery};
use crate::retry::{Attempt, RetryPolicy};
use crate::session::{RawEntry, ResultStream, SearchSession};
use crate::store::{AppendOutcome, ResumableStore};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What one call to [`EntryProcessor::process`] produced.
#[derive(Debug)]
pub enum EntryOutcome {
    /// A fully processed record, not yet persisted
    Record(Box<EnrichedRecord>),
    /// The rank is already stored; the stream was advanced past it
    Skipped { rank: u32 },
    /// Retries for this step ran out. `rank` is the last entry consumed, if any
    Failed { rank: Option<u32>, error: ScraperError },
    /// The stream has no more entries within the requested range
    EndOfStream,
}

/// Turns raw hits into enriched records.
pub struct EntryProcessor {
    reconciler: RecordReconciler,
    enricher: DemographicEnricher,
    retry: RetryPolicy,
    recovery: Arc<dyn Recovery>,
    scholar_base: String,
}

struct EntryAttempt<'a> {
    processor: &'a EntryProcessor,
    stream: &'a mut dyn ResultStream,
    total: usize,
    targets: &'a BTreeSet<u32>,
    last_rank: Option<u32>,
}

#[async_trait]
impl Attempt for EntryAttempt<'_> {
    type Output = EntryOutcome;

    async fn attempt(&mut self, attempt: u32) -> Result<EntryOutcome> {
        let Some(entry) = self.stream.next_entry().await? else {
            return Ok(EntryOutcome::EndOfStream);
        };
        self.last_rank = Some(entry.rank);

        if entry.rank as usize > self.total {
            debug!(rank = entry.rank, total = self.total, "Stream passed the requested range");
            return Ok(EntryOutcome::EndOfStream);
        }

        let outcome = if self.targets.contains(&entry.rank) {
            if attempt > 1 {
                debug!(rank = entry.rank, attempt, "Processing entry after retry");
            }
            let record = self.processor.build_record(&entry).await?;
            EntryOutcome::Record(Box::new(record))
        } else {
            debug!(rank = entry.rank, "Already downloaded, skipping");
            EntryOutcome::Skipped { rank: entry.rank }
        };

        if entry.rank % 10 == 0 || entry.rank as usize == self.total {
            info!(rank = entry.rank, total = self.total, "{} entries scraped", entry.rank);
        }
        Ok(outcome)
    }
}

impl EntryProcessor {
    /// `scholar_base` is used to render cluster links.
    pub fn new(
        reconciler: RecordReconciler,
        enricher: DemographicEnricher,
        retry: RetryPolicy,
        recovery: Arc<dyn Recovery>,
        scholar_base: impl Into<String>,
    ) -> Self {
        Self {
            reconciler,
            enricher,
            retry,
            recovery,
            scholar_base: scholar_base.into(),
        }
    }

    /// Reconcile and enrich one hit.
    pub async fn build_record(&self, entry: &RawEntry) -> Result<EnrichedRecord> {
        entry.validate()?;

        let reconciliation = self
            .reconciler
            .reconcile(&entry.authors, &entry.year, &entry.title, entry.rank)
            .await?;

        let first = reconciliation.first_author(&entry.authors)?;
        let last = reconciliation.last_author(&entry.authors)?;

        let first_profile = AuthorProfile::new(&first, self.enricher.enrich(&first).await?);
        let last_profile = AuthorProfile::new(&last, self.enricher.enrich(&last).await?);

        Ok(EnrichedRecord::assemble(
            entry,
            &reconciliation,
            first_profile,
            last_profile,
            &self.scholar_base,
        ))
    }

    /// Advance the stream and process the entry it yields.
    ///
    /// Every attempt consumes one entry. Running out of attempts is reported as
    /// [`EntryOutcome::Failed`]; only an operator abort is returned as an error.
    pub async fn process(
        &self,
        stream: &mut dyn ResultStream,
        total: usize,
        targets: &BTreeSet<u32>,
    ) -> Result<EntryOutcome> {
        let mut op = EntryAttempt {
            processor: self,
            stream,
            total,
            targets,
            last_rank: None,
        };

        match self.retry.run("process entry", &mut op, self.recovery.as_ref()).await {
            Ok(outcome) => Ok(outcome),
            Err(ScraperError::Aborted) => Err(ScraperError::Aborted),
            Err(e @ ScraperError::AuthorSplit { .. }) => {
                error!(rank = ?op.last_rank, error = %e, "No structured author to enrich");
                Ok(EntryOutcome::Failed { rank: op.last_rank, error: e })
            }
            Err(e) => {
                error!(rank = ?op.last_rank, error = %e, "Entry not saved, it will be retried on the next run");
                Ok(EntryOutcome::Failed { rank: op.last_rank, error: e })
            }
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Entries the run covered, after capping
    pub requested: usize,
    /// Ranks found in the store before the run
    pub already_present: usize,
    pub written: usize,
    /// Appends that found their rank already stored
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Failed entries whose authors could not be split, counted in `failed` too
    pub author_split: usize,
}

impl RunSummary {
    fn count_failure(&mut self, error: &ScraperError) {
        self.failed += 1;
        if matches!(error, ScraperError::AuthorSplit { .. }) {
            self.author_split += 1;
        }
    }
}

/// Drives one query from availability check to persisted rows.
pub struct PipelineDriver {
    session: SearchSession,
    processor: EntryProcessor,
    store: ResumableStore,
}

impl PipelineDriver {
    /// Driver over already wired components.
    pub fn new(session: SearchSession, processor: EntryProcessor, store: ResumableStore) -> Self {
        Self {
            session,
            processor,
            store,
        }
    }

    /// Wire the production clients from `config`.
    pub fn from_config(
        config: &PipelineConfig,
        recovery: Arc<dyn Recovery>,
        proxies: Arc<ProxyPool>,
        cookies: &[Cookie],
        output_dir: &Path,
    ) -> Result<Self> {
        config.validate()?;
        let retry = RetryPolicy::new(config.max_attempts);

        let scholar = ScholarClient::new(config, proxies, cookies);
        let session = SearchSession::new(Arc::new(scholar), retry, Arc::clone(&recovery), config.max_entries);

        let reconciler = RecordReconciler::new(Arc::new(CrossrefClient::new(config)?));
        let enricher = DemographicEnricher::new(Arc::new(AgifyClient::new(config)?));
        let processor = EntryProcessor::new(reconciler, enricher, retry, recovery, config.scholar_url.clone());

        let store = ResumableStore::open(output_dir, config.store_cooldown)?;
        Ok(Self::new(session, processor, store))
    }

    /// Store the driver appends to
    pub fn store(&self) -> &ResumableStore {
        &self.store
    }

    /// Fetch, reconcile, enrich and store every missing rank of `query`.
    pub async fn run(&self, query: &str, requested: EntryCount) -> Result<RunSummary> {
        let total = self.session.available_count(query, requested).await?;
        let present = self.store.already_downloaded(query)?;
        let targets: BTreeSet<u32> = (1..=total as u32).filter(|r| !present.contains(r)).collect();

        let mut summary = RunSummary {
            requested: total,
            already_present: total - targets.len(),
            ..Default::default()
        };

        let Some(&last_target) = targets.last() else {
            info!(query, total, "All requested entries already downloaded");
            return Ok(summary);
        };

        info!(
            query,
            total,
            missing = targets.len(),
            path = %self.store.path_for(query).display(),
            "Starting download"
        );

        let mut stream = self.session.open(query).await?;
        let mut position = 0u32;

        while position < last_target {
            match self.processor.process(stream.as_mut(), total, &targets).await? {
                EntryOutcome::Record(record) => {
                    position = position.max(record.rank);
                    match self.store.append(query, &record).await? {
                        AppendOutcome::Written => summary.written += 1,
                        AppendOutcome::DuplicateRank => summary.duplicates += 1,
                    }
                }
                EntryOutcome::Skipped { rank } => {
                    position = position.max(rank);
                    summary.skipped += 1;
                }
                EntryOutcome::Failed { rank: Some(rank), error } => {
                    position = position.max(rank);
                    summary.count_failure(&error);
                }
                EntryOutcome::Failed { rank: None, error } => {
                    return Err(ScraperError::UpstreamUnavailable(format!(
                        "result stream stopped advancing after rank {}: {}",
                        position, error
                    )));
                }
                EntryOutcome::EndOfStream => {
                    warn!(position, total, "Result stream ended early");
                    break;
                }
            }
        }

        info!(
            written = summary.written,
            skipped = summary.skipped,
            failed = summary.failed,
            author_split = summary.author_split,
            "Download finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_author_split_failures_are_counted_separately() {
        let mut summary = RunSummary::default();
        summary.count_failure(&ScraperError::AuthorSplit {
            authors: "Genome Consortium".to_string(),
        });
        summary.count_failure(&ScraperError::Captcha);

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.author_split, 1);
    }
}
