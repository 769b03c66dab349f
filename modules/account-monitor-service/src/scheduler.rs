//! Background poll loop over monitored accounts.
//!
//! One tokio task walks the enabled accounts in fixed-size batches,
//! sequentially within a batch, sleeping between batches and between
//! cycles. Every sleep is raced against the stop token.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use account_monitor_types::*;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::Db;
use crate::error::{ClientError, StoreError, StoreResult};
use crate::x_api::PostSource;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_DELAY_SECS: u64 = 5;
pub const DEFAULT_FAILURE_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub failure_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_secs(DEFAULT_BATCH_DELAY_SECS),
            failure_backoff: Duration::from_secs(DEFAULT_FAILURE_BACKOFF_SECS),
        }
    }
}

/// Split `len` items into consecutive batches of `batch_size` (at least 1)
pub fn batch_ranges(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    let size = batch_size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Insert fetched posts through the dedup gate, returning how many were new
pub fn store_posts(
    db: &Db,
    account_id: i64,
    posts: Vec<FetchedPost>,
    historical: bool,
) -> StoreResult<usize> {
    let mut inserted = 0;
    for post in posts {
        if db.insert_post_if_absent(&post.into_new_post(account_id, historical))? {
            inserted += 1;
        }
    }
    Ok(inserted)
}

/// Returns false if the token fired first
async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[derive(Debug)]
enum AccountError {
    Client(ClientError),
    Store(StoreError),
}

/// A spawned poll loop and the token that stops it
struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    db: Arc<Db>,
    source: Arc<dyn PostSource>,
    config: SchedulerConfig,
    worker: Mutex<Option<Worker>>,
    // Stopped loops that may still be winding down
    retired: Mutex<Vec<JoinHandle<()>>>,
    active_loops: AtomicUsize,
    last_cycle: Mutex<Option<CycleReport>>,
}

impl Scheduler {
    pub fn new(db: Arc<Db>, source: Arc<dyn PostSource>, config: SchedulerConfig) -> Self {
        Self {
            db,
            source,
            config,
            worker: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
            active_loops: AtomicUsize::new(0),
            last_cycle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.lock().clone()
    }

    /// Spawn the poll loop. Returns false if it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            scheduler.run_loop(loop_token).await;
        });
        *worker = Some(Worker { token, handle });

        log::info!(
            "[SCHEDULER] Started (batch size {}, batch delay {:?})",
            self.config.batch_size,
            self.config.batch_delay
        );
        true
    }

    /// Signal the loop to stop at its next suspension point.
    /// Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return false;
        };
        worker.token.cancel();

        let mut retired = self.retired.lock();
        retired.retain(|handle| !handle.is_finished());
        retired.push(worker.handle);

        log::info!("[SCHEDULER] Stop requested");
        true
    }

    /// Stop and wait for every loop task to finish
    pub async fn shutdown(&self) {
        self.stop();
        let handles = std::mem::take(&mut *self.retired.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("[SCHEDULER] Poll loop task failed: {}", e);
            }
        }
    }

    #[cfg(test)]
    fn active_loops(&self) -> usize {
        self.active_loops.load(Ordering::SeqCst)
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        self.active_loops.fetch_add(1, Ordering::SeqCst);
        log::info!("[SCHEDULER] Poll loop running");

        loop {
            let pause = match self.run_cycle(&token).await {
                Ok(report) => {
                    log::info!(
                        "[SCHEDULER] Cycle complete: {} checked, {} failed, {} new posts",
                        report.accounts_checked,
                        report.accounts_failed,
                        report.posts_inserted
                    );
                    *self.last_cycle.lock() = Some(report);
                    // Read at sleep time so interval changes apply to the next wait
                    match self.db.poll_interval_secs() {
                        Ok(secs) => Duration::from_secs(secs),
                        Err(e) => {
                            log::error!("[SCHEDULER] Could not read poll interval: {}", e);
                            self.config.failure_backoff
                        }
                    }
                }
                Err(e) => {
                    log::error!(
                        "[SCHEDULER] Cycle failed: {}; retrying in {:?}",
                        e,
                        self.config.failure_backoff
                    );
                    self.config.failure_backoff
                }
            };

            if token.is_cancelled() || !sleep_or_cancel(&token, pause).await {
                break;
            }
        }

        let remaining = self.active_loops.fetch_sub(1, Ordering::SeqCst) - 1;
        log::info!("[SCHEDULER] Poll loop stopped ({} still active)", remaining);
    }

    /// One pass over a snapshot of the enabled accounts.
    ///
    /// Account-scoped failures are logged and counted; anything else from
    /// the store ends the cycle.
    async fn run_cycle(&self, token: &CancellationToken) -> StoreResult<CycleReport> {
        let started_at = Utc::now();
        let accounts = self.db.list_enabled_accounts()?;
        let posts_per_check = self.db.posts_per_check()?;
        let batches = batch_ranges(accounts.len(), self.config.batch_size);

        let mut report = CycleReport {
            started_at,
            finished_at: started_at,
            batches: batches.len(),
            accounts_checked: 0,
            accounts_failed: 0,
            posts_inserted: 0,
        };

        log::debug!(
            "[SCHEDULER] Cycle: {} accounts in {} batches",
            accounts.len(),
            batches.len()
        );

        'batches: for (index, range) in batches.into_iter().enumerate() {
            for account in &accounts[range] {
                if token.is_cancelled() {
                    break 'batches;
                }
                match self.poll_account(account, posts_per_check).await {
                    Ok(inserted) => {
                        report.accounts_checked += 1;
                        report.posts_inserted += inserted;
                    }
                    Err(AccountError::Client(e)) => {
                        log::warn!("[SCHEDULER] Skipping {}: {}", account.handle, e);
                        report.accounts_failed += 1;
                    }
                    Err(AccountError::Store(e)) if e.is_account_scoped() => {
                        log::warn!("[SCHEDULER] Skipping {}: {}", account.handle, e);
                        report.accounts_failed += 1;
                    }
                    Err(AccountError::Store(e)) => return Err(e),
                }
            }

            log::debug!("[SCHEDULER] Batch {} done", index + 1);
            if !sleep_or_cancel(token, self.config.batch_delay).await {
                break;
            }
        }

        report.finished_at = Utc::now();
        Ok(report)
    }

    async fn poll_account(
        &self,
        account: &TrackedAccount,
        max_results: u32,
    ) -> Result<usize, AccountError> {
        let posts = self
            .source
            .try_recent_posts(&account.handle, max_results, None)
            .await
            .map_err(AccountError::Client)?;
        let inserted =
            store_posts(&self.db, account.id, posts, false).map_err(AccountError::Store)?;
        self.db
            .touch_monitoring_task(account.id)
            .map_err(AccountError::Store)?;
        Ok(inserted)
    }
}
