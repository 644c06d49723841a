//! Recovery actions run between failed upstream attempts.
//!
//! When Google Scholar starts blocking requests the only remedy is a new
//! network egress point plus a cooldown. How that happens depends on the
//! deployment: an operator at a terminal switches VPNs by hand, an automated
//! job rotates through a proxy list or simply waits. Each of these is a
//! [`Recovery`] strategy.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// What the retry driver should do after a recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Try the operation again
    Continue,
    /// Stop the whole run
    Abort,
}

/// A pluggable recovery strategy.
#[async_trait]
pub trait Recovery: Send + Sync {
    /// Perform the recovery side effect and report whether to continue.
    async fn attempt_recovery(&self) -> RecoveryOutcome;
}

/// Non-interactive strategy: wait and continue.
#[derive(Debug, Clone)]
pub struct CooldownRecovery {
    cooldown: Duration,
}

impl CooldownRecovery {
    /// Strategy that only waits `cooldown`.
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }
}

#[async_trait]
impl Recovery for CooldownRecovery {
    async fn attempt_recovery(&self) -> RecoveryOutcome {
        info!(secs = self.cooldown.as_secs(), "Cooling down before retry");
        tokio::time::sleep(self.cooldown).await;
        RecoveryOutcome::Continue
    }
}

/// Asks the operator to change IP (VPN, new proxy) and waits for confirmation.
///
/// An empty line continues after the cooldown, `exit` aborts the run, and any
/// other input repeats the prompt. Replies are read through one buffered
/// reader for the lifetime of the strategy, so typed-ahead lines are kept.
#[derive(Debug)]
pub struct InteractiveRecovery<R = Stdin> {
    cooldown: Duration,
    replies: Mutex<Lines<BufReader<R>>>,
}

impl InteractiveRecovery {
    /// Prompt on stderr and read replies from stdin.
    pub fn new(cooldown: Duration) -> Self {
        Self::with_input(tokio::io::stdin(), cooldown)
    }
}

impl<R: AsyncRead + Unpin> InteractiveRecovery<R> {
    /// Read operator replies from `input` instead of stdin.
    pub fn with_input(input: R, cooldown: Duration) -> Self {
        Self {
            cooldown,
            replies: Mutex::new(BufReader::new(input).lines()),
        }
    }
}

/// Interpret one line typed by the operator.
fn parse_operator_reply(line: &str) -> Option<RecoveryOutcome> {
    let reply = line.trim();
    if reply.eq_ignore_ascii_case("exit") {
        Some(RecoveryOutcome::Abort)
    } else if reply.is_empty() {
        Some(RecoveryOutcome::Continue)
    } else {
        None
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Recovery for InteractiveRecovery<R> {
    async fn attempt_recovery(&self) -> RecoveryOutcome {
        let mut replies = self.replies.lock().await;
        let mut stderr = tokio::io::stderr();

        loop {
            let prompt = "You have been blocked, try changing your IP or using a VPN. \
                Press Enter to continue downloading, or type \"exit\" to stop and exit... ";
            if let Err(e) = stderr.write_all(prompt.as_bytes()).await {
                warn!("Failed to write recovery prompt: {}", e);
            }
            let _ = stderr.flush().await;

            let line = match replies.next_line().await {
                Ok(Some(line)) => line,
                // stdin closed
                Ok(None) => return RecoveryOutcome::Abort,
                Err(e) => {
                    warn!("Failed to read operator reply: {}", e);
                    return RecoveryOutcome::Abort;
                }
            };

            match parse_operator_reply(&line) {
                Some(RecoveryOutcome::Continue) => {
                    info!(secs = self.cooldown.as_secs(), "Waiting before retry");
                    tokio::time::sleep(self.cooldown).await;
                    return RecoveryOutcome::Continue;
                }
                Some(RecoveryOutcome::Abort) => return RecoveryOutcome::Abort,
                None => continue,
            }
        }
    }
}

/// Round-robin list of proxy URLs shared by the HTTP clients.
#[derive(Debug, Default)]
pub struct ProxyPool {
    proxies: Vec<String>,
    current: AtomicUsize,
}

impl ProxyPool {
    /// Pool starting at the first of `proxies`.
    pub fn new(proxies: Vec<String>) -> Self {
        Self {
            proxies,
            current: AtomicUsize::new(0),
        }
    }

    /// True when no proxies are configured
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Proxy new requests should go through, if any
    pub fn current(&self) -> Option<&str> {
        if self.proxies.is_empty() {
            return None;
        }
        let idx = self.current.load(Ordering::Relaxed) % self.proxies.len();
        self.proxies.get(idx).map(String::as_str)
    }

    /// Move to the next proxy and return it
    pub fn rotate(&self) -> Option<&str> {
        if self.proxies.is_empty() {
            return None;
        }
        self.current.fetch_add(1, Ordering::Relaxed);
        self.current()
    }
}

/// Automated egress rotation: switch to the next proxy, then cool down.
#[derive(Debug, Clone)]
pub struct ProxyRotation {
    pool: Arc<ProxyPool>,
    cooldown: Duration,
}

impl ProxyRotation {
    /// Rotate through `pool`, then wait `cooldown`.
    pub fn new(pool: Arc<ProxyPool>, cooldown: Duration) -> Self {
        Self { pool, cooldown }
    }
}

#[async_trait]
impl Recovery for ProxyRotation {
    async fn attempt_recovery(&self) -> RecoveryOutcome {
        match self.pool.rotate() {
            Some(proxy) => info!(proxy, "Rotated to new proxy"),
            None => warn!("No proxies configured, only cooling down"),
        }
        tokio::time::sleep(self.cooldown).await;
        RecoveryOutcome::Continue
    }
}
