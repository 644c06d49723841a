//! Resumable per-query CSV store.
//!
//! Each query maps to one file named from a slug of the query text, so a
//! restarted run appends to the same file. The rank column is the key: ranks
//! present in the file are not fetched again and are never written twice.

use crate::error::Result;
use crate::record::{Column, EnrichedRecord};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const SLUG_LEN: usize = 15;
const FALLBACK_SLUG: &str = "untitled";

/// Result of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Written,
    /// A row with this rank was already present; nothing was written
    DuplicateRank,
}

/// File stem for a query: its ASCII letters, lower-cased, at most 15 long.
pub fn query_slug(query: &str) -> String {
    let slug: String = query
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .take(SLUG_LEN)
        .collect();
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Directory of per-query result files.
pub struct ResumableStore {
    dir: PathBuf,
    cooldown: Duration,
}

impl ResumableStore {
    /// Store rooted at `dir`, created if missing. `cooldown` is waited after
    /// every append.
    pub fn open(dir: impl Into<PathBuf>, cooldown: Duration) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, cooldown })
    }

    /// File holding the rows of `query`
    pub fn path_for(&self, query: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", query_slug(query)))
    }

    /// Ranks already persisted for `query`; empty when there is no file yet.
    pub fn already_downloaded(&self, query: &str) -> Result<BTreeSet<u32>> {
        let contents = read_existing(&self.path_for(query))?;
        Ok(scan(&contents).ranks)
    }

    /// Append `record` unless its rank is already in the file.
    ///
    /// An interrupted trailing row is cut off first. The header is written
    /// only into an empty file. The row is synced to
    /// disk before the cooldown starts.
    pub async fn append(&self, query: &str, record: &EnrichedRecord) -> Result<AppendOutcome> {
        let path = self.path_for(query);
        let outcome = write_row(&path, record)?;

        match outcome {
            AppendOutcome::Written => debug!(rank = record.rank, path = %path.display(), "Row written"),
            AppendOutcome::DuplicateRank => info!(rank = record.rank, "Rank already stored, skipping write"),
        }

        if !self.cooldown.is_zero() {
            tokio::time::sleep(self.cooldown).await;
        }
        Ok(outcome)
    }
}

fn read_existing(path: &Path) -> Result<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// What a scan of an existing store file found.
#[derive(Debug, Default)]
struct Scan {
    ranks: BTreeSet<u32>,
    /// Byte length up to the end of the last newline-terminated record.
    intact_len: usize,
}

/// Scan stored rows. Only newline-terminated rows with the full column count
/// hold a rank; an unterminated tail is an interrupted write.
fn scan(contents: &[u8]) -> Scan {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(contents);

    let mut scan = Scan::default();
    let mut row = csv::StringRecord::new();
    let mut header_seen = false;
    loop {
        let read = reader.read_record(&mut row);
        let end = (reader.position().byte() as usize).min(contents.len());
        let terminated = contents[..end].ends_with(b"\n");

        match read {
            Ok(false) => break,
            Ok(true) if !terminated => {
                debug!(fields = row.len(), "Ignoring interrupted row");
                continue;
            }
            Ok(true) if !header_seen => header_seen = true,
            Ok(true) if row.len() == Column::ALL.len() => {
                match row.get(Column::Rank.index()).map(|r| r.trim().parse::<u32>()) {
                    Some(Ok(rank)) => {
                        scan.ranks.insert(rank);
                    }
                    _ => warn!(line = reader.position().line(), "Row without a valid rank"),
                }
            }
            Ok(true) => debug!(fields = row.len(), "Ignoring incomplete row"),
            Err(e) => warn!("Unreadable row in store: {}", e),
        }
        if terminated {
            scan.intact_len = end;
        }
    }
    scan
}

fn write_row(path: &Path, record: &EnrichedRecord) -> Result<AppendOutcome> {
    let existing = read_existing(path)?;
    let scan = scan(&existing);
    if scan.ranks.contains(&record.rank) {
        return Ok(AppendOutcome::DuplicateRank);
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    if scan.intact_len == 0 {
        writer.write_record(Column::header_row())?;
    }
    writer.write_record(record.to_row())?;
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;

    let mut file = OpenOptions::new().create(true).write(true).truncate(false).open(path)?;
    if scan.intact_len < existing.len() {
        warn!(
            path = %path.display(),
            bytes = existing.len() - scan.intact_len,
            "Discarding interrupted row"
        );
        file.set_len(scan.intact_len as u64)?;
    }
    file.seek(SeekFrom::Start(scan.intact_len as u64))?;
    file.write_all(&bytes)?;
    file.sync_data()?;
    Ok(AppendOutcome::Written)
}
