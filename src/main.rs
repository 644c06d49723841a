//! gscraper - resumable Google Scholar harvester
//!
//! Searches Google Scholar, checks every hit against Crossref, predicts the
//! nation and gender of its first and last authors and appends the result to
//! a CSV file named after the query. Re-running the same query resumes where
//! the previous run stopped.
//!
//! ## Usage
//!
//! ```bash
//! gscraper search -q "climate change" -o ./output -n 100
//! gscraper cookies import exported.json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gscraper::config::{EntryCount, PipelineConfig};
use gscraper::cookies::CookieJar;
use gscraper::pipeline::PipelineDriver;
use gscraper::recovery::{CooldownRecovery, InteractiveRecovery, ProxyPool, ProxyRotation, Recovery};
use gscraper::ScraperError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Resumable Google Scholar harvester with Crossref and demographic enrichment
#[derive(Parser)]
#[command(name = "gscraper")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download, reconcile and store the results of a query
    Search {
        /// Search query
        #[arg(short, long)]
        query: String,

        /// Directory for the per-query CSV files
        #[arg(short, long)]
        output: PathBuf,

        /// Number of entries, or "all" for everything available (max 1000)
        #[arg(short = 'n', long, default_value = "all")]
        entries: EntryCount,

        /// Attempts per upstream operation before giving up
        #[arg(long, default_value_t = gscraper::config::DEFAULT_MAX_ATTEMPTS)]
        max_attempts: u32,

        /// Seconds to wait after a recovery action
        #[arg(long, default_value = "15")]
        cooldown_secs: u64,

        /// Seconds to wait after each stored row
        #[arg(long, default_value = "3")]
        store_cooldown_secs: u64,

        /// Proxy URL to rotate through on failures (repeatable)
        #[arg(long = "proxy")]
        proxies: Vec<String>,

        /// Wait and retry instead of prompting when blocked
        #[arg(long)]
        non_interactive: bool,

        /// Contact email for the Crossref polite pool
        #[arg(long, env = "GSCRAPER_MAILTO")]
        mailto: Option<String>,

        /// API key for nationalize.io / genderize.io
        #[arg(long, env = "GENDERIZE_API_KEY")]
        genderize_key: Option<String>,

        /// Cookie file to send with Scholar requests (default: ~/.gscraper_cookies.json)
        #[arg(long)]
        cookies: Option<PathBuf>,
    },

    /// Manage cookies
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
}

#[derive(Subcommand)]
enum CookieAction {
    /// Clear stored cookies
    Clear,
    /// Show cookie file path
    Path,
    /// Import cookies exported from a browser (JSON list)
    Import {
        /// Exported cookie file
        file: PathBuf,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gscraper={}", log_level)));

    if cli.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(cli.verbose)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Search {
            query,
            output,
            entries,
            max_attempts,
            cooldown_secs,
            store_cooldown_secs,
            proxies,
            non_interactive,
            mailto,
            genderize_key,
            cookies,
        } => {
            let mut config = PipelineConfig {
                max_attempts,
                recovery_cooldown: Duration::from_secs(cooldown_secs),
                store_cooldown: Duration::from_secs(store_cooldown_secs),
                inference_api_key: genderize_key,
                proxies,
                ..PipelineConfig::default()
            };
            if let Some(mailto) = mailto {
                config.mailto = mailto;
            }
            run_search(config, &query, entries, output, non_interactive, cookies).await
        }
        Commands::Cookies { action } => handle_cookies(action),
    }
}

// ============================================================================
// Search
// ============================================================================

async fn run_search(
    config: PipelineConfig,
    query: &str,
    entries: EntryCount,
    output: PathBuf,
    non_interactive: bool,
    cookie_file: Option<PathBuf>,
) -> Result<()> {
    let jar = match cookie_file {
        Some(path) => CookieJar::with_path(path),
        None => CookieJar::new()?,
    };
    let cookies = jar.load();
    if !cookies.is_empty() {
        info!(count = cookies.len(), path = ?jar.path(), "Loaded cookies");
    }

    let pool = Arc::new(ProxyPool::new(config.proxies.clone()));
    let recovery: Arc<dyn Recovery> = if !pool.is_empty() {
        Arc::new(ProxyRotation::new(Arc::clone(&pool), config.recovery_cooldown))
    } else if non_interactive {
        Arc::new(CooldownRecovery::new(config.recovery_cooldown))
    } else {
        Arc::new(InteractiveRecovery::new(config.recovery_cooldown))
    };

    let driver = PipelineDriver::from_config(&config, recovery, pool, &cookies, &output)
        .context("Failed to set up pipeline")?;

    match driver.run(query, entries).await {
        Ok(summary) => {
            println!("Output file: {}", driver.store().path_for(query).display());
            println!(
                "{} written, {} already present, {} failed (of {} requested)",
                summary.written, summary.already_present, summary.failed, summary.requested
            );
            if summary.failed > 0 {
                println!("Run the same command again to retry the failed entries.");
            }
            Ok(())
        }
        Err(ScraperError::Aborted) => {
            info!("Stopped by operator");
            Ok(())
        }
        Err(e @ ScraperError::UpstreamUnavailable(_)) => {
            error!("Too many failed attempts at reaching Google Scholar. Try again later.");
            Err(e.into())
        }
        Err(e) => Err(e).context("Pipeline failed"),
    }
}

// ============================================================================
// Cookies
// ============================================================================

fn handle_cookies(action: CookieAction) -> Result<()> {
    let jar = CookieJar::new()?;

    match action {
        CookieAction::Clear => {
            jar.clear()?;
            println!("Cookies cleared.");
        }
        CookieAction::Path => {
            println!("Cookie file: {:?}", jar.path());
        }
        CookieAction::Import { file } => {
            let count = jar
                .import(&file)
                .with_context(|| format!("Failed to import cookies from {}", file.display()))?;
            println!("Imported {} cookies to {:?}", count, jar.path());
        }
    }

    Ok(())
}
