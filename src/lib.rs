//! # gscraper
//!
//! Resumable Google Scholar harvester: search hits are cross-checked against
//! Crossref, their first and last authors get nation and gender predictions,
//! and every record is appended once to a per-query CSV file.
//!
//! ## Modules
//!
//! - [`gscholar`] - Google Scholar result pages and pagination probe
//! - [`session`] - Search session and result stream traits
//! - [`crossref`] - Crossref works lookup
//! - [`reconcile`] - Author matching and PASS/REVIEW/MISSING status
//! - [`demographics`] - nationalize.io / genderize.io enrichment
//! - [`record`] - Output schema and row assembly
//! - [`store`] - Resumable, idempotent CSV store
//! - [`pipeline`] - Entry processing and the run driver
//! - [`retry`] / [`recovery`] - Bounded retries and recovery strategies
//! - [`cookies`] - Cookie persistence
//! - [`config`] - Settings and defaults
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gscraper::config::{EntryCount, PipelineConfig};
//! use gscraper::pipeline::PipelineDriver;
//! use gscraper::recovery::{CooldownRecovery, ProxyPool};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::default();
//!     let recovery = Arc::new(CooldownRecovery::new(config.recovery_cooldown));
//!     let driver = PipelineDriver::from_config(
//!         &config,
//!         recovery,
//!         Arc::new(ProxyPool::default()),
//!         &[],
//!         Path::new("./output"),
//!     )?;
//!     let summary = driver.run("climate change", EntryCount::Exact(20)).await?;
//!     println!("Wrote {} rows", summary.written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cookies;
pub mod crossref;
pub mod demographics;
pub mod error;
pub mod gscholar;
pub mod pipeline;
pub mod reconcile;
pub mod record;
pub mod recovery;
pub mod retry;
pub mod session;
pub mod store;

pub use error::{Result, ScraperError};
