//! Application context shared by every request handler.

use std::sync::Arc;
use std::time::Instant;

use account_monitor_types::*;
use chrono::Utc;

use crate::db::{Db, normalize_handle};
use crate::error::{AppError, ClientError};
use crate::scheduler::{Scheduler, SchedulerConfig, store_posts};
use crate::x_api::PostSource;

const DEFAULT_DETAIL_POSTS: usize = 20;
const DEFAULT_METRICS_DAYS: u32 = 30;
const MAX_FETCH_RESULTS: u32 = 100;

pub struct AppContext {
    pub db: Arc<Db>,
    pub source: Arc<dyn PostSource>,
    pub scheduler: Arc<Scheduler>,
    started_at: Instant,
}

impl AppContext {
    pub fn new(db: Arc<Db>, source: Arc<dyn PostSource>, config: SchedulerConfig) -> Self {
        let scheduler = Arc::new(Scheduler::new(db.clone(), source.clone(), config));
        Self {
            db,
            source,
            scheduler,
            started_at: Instant::now(),
        }
    }

    // =====================================================
    // Accounts
    // =====================================================

    /// Register an account, filling follower counts from the platform when
    /// it is reachable. A handle the platform does not know is rejected.
    pub async fn add_account(&self, req: AddAccountRequest) -> Result<TrackedAccount, AppError> {
        let mut account = req.account;
        let handle = normalize_handle(&account.handle).ok_or_else(|| {
            AppError::Validation(format!("'{}' is not a valid handle", account.handle))
        })?;

        if self.source.status() != ClientStatus::Disconnected {
            match self.source.fetch_profile(&handle).await {
                Ok(profile) => {
                    account.follower_count = account.follower_count.or(Some(profile.follower_count));
                    account.following_count =
                        account.following_count.or(Some(profile.following_count));
                    if account.display_name.trim().is_empty() {
                        account.display_name = profile.display_name;
                    }
                }
                Err(ClientError::NotFound(_)) => {
                    return Err(AppError::NotFound(format!("Handle {}", handle)));
                }
                Err(e) => {
                    log::warn!(
                        "[ACCOUNT_MONITOR] Profile lookup for {} failed, adding without counts: {}",
                        handle,
                        e
                    );
                }
            }
        }

        let existing = self.db.get_account_by_handle(&handle)?;
        let saved = self.db.upsert_account(&account)?;
        if existing.is_some() {
            log::info!("[ACCOUNT_MONITOR] Updated {} (#{})", saved.handle, saved.id);
        } else {
            log::info!("[ACCOUNT_MONITOR] Registered {} (#{})", saved.handle, saved.id);
        }

        if !req.monitor {
            return Ok(saved);
        }
        let toggled = self.db.set_monitoring(&[saved.id], true)?;
        if !toggled.failed.is_empty() {
            return Err(AppError::MonitoringNotEnabled(saved.id));
        }
        self.db
            .get_account(saved.id)?
            .ok_or_else(|| AppError::NotFound(format!("Account #{}", saved.id)))
    }

    pub fn remove_account(&self, id: i64) -> Result<(), AppError> {
        if self.db.remove_account(id)? {
            log::info!("[ACCOUNT_MONITOR] Removed account #{}", id);
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Account #{}", id)))
        }
    }

    pub fn list_accounts(&self, query: ListAccountsQuery) -> Result<AccountPage, AppError> {
        let defaults = PageRequest::default();
        let page = PageRequest {
            page: query.page.unwrap_or(defaults.page),
            per_page: query.per_page.unwrap_or(defaults.per_page),
        };
        let filter = AccountFilter {
            search: query.search,
        };
        let (items, total) = self.db.list_accounts(&filter, page)?;
        Ok(AccountPage {
            items,
            total,
            page: page.page.max(1),
            per_page: page.per_page.clamp(1, 100),
        })
    }

    pub fn account_detail(&self, id: i64, limit: Option<usize>) -> Result<AccountDetail, AppError> {
        let account = self
            .db
            .get_account(id)?
            .ok_or_else(|| AppError::NotFound(format!("Account #{}", id)))?;
        let task = self.db.get_monitoring_task(id)?;
        let recent_posts = self
            .db
            .list_posts(id, limit.unwrap_or(DEFAULT_DETAIL_POSTS))?;
        Ok(AccountDetail {
            account,
            task,
            recent_posts,
        })
    }

    pub fn import_accounts(&self, rows: &[ImportRow]) -> Result<ImportSummary, AppError> {
        Ok(self.db.import_accounts(rows)?)
    }

    // =====================================================
    // Monitoring
    // =====================================================

    pub fn set_monitoring(
        &self,
        ids: &[i64],
        enabled: bool,
    ) -> Result<MonitoringToggleResult, AppError> {
        let result = self.db.set_monitoring(ids, enabled)?;
        log::info!(
            "[ACCOUNT_MONITOR] Monitoring {} for {} accounts ({} failed)",
            if enabled { "enabled" } else { "disabled" },
            result.succeeded.len(),
            result.failed.len()
        );
        Ok(result)
    }

    /// Fetch one account right now, outside the poll loop.
    ///
    /// With `since` (and optionally `until`, default now) this is a
    /// backfill and inserted posts are marked historical. Does not advance
    /// the account's last check. Only an unknown account or a bad request
    /// fails; an unreachable platform yields an empty report.
    pub async fn fetch_now(&self, req: FetchNowRequest) -> Result<FetchReport, AppError> {
        let account = self
            .db
            .get_account(req.account_id)?
            .ok_or_else(|| AppError::NotFound(format!("Account #{}", req.account_id)))?;

        let window = match (req.since, req.until) {
            (None, None) => None,
            (None, Some(_)) => {
                return Err(AppError::Validation("'until' requires 'since'".to_string()));
            }
            (Some(start), until) => {
                let end = until.unwrap_or_else(Utc::now);
                if start >= end {
                    return Err(AppError::Validation(
                        "'since' must be earlier than 'until'".to_string(),
                    ));
                }
                Some(TimeWindow { start, end })
            }
        };

        let max_results = match req.max_results {
            Some(n) if n == 0 || n > MAX_FETCH_RESULTS => {
                return Err(AppError::Validation(format!(
                    "max_results must be between 1 and {}",
                    MAX_FETCH_RESULTS
                )));
            }
            Some(n) => n,
            None => self.db.posts_per_check()?,
        };

        // Client trouble degrades to an empty fetch; the client logs the cause
        let posts = self
            .source
            .fetch_recent_posts(&account.handle, max_results, window)
            .await;
        let fetched = posts.len();
        let historical = window.is_some();
        let inserted = store_posts(&self.db, account.id, posts, historical)?;

        log::info!(
            "[ACCOUNT_MONITOR] Fetch-now {}: {} fetched, {} new{}",
            account.handle,
            fetched,
            inserted,
            if historical { " (historical)" } else { "" }
        );

        Ok(FetchReport {
            account_id: account.id,
            fetched,
            inserted,
            historical,
        })
    }

    /// Spawn the poll loop; refused while the platform client is disconnected
    pub fn start_scheduler(&self) -> Result<bool, AppError> {
        if self.source.status() == ClientStatus::Disconnected {
            return Err(ClientError::Disconnected.into());
        }
        Ok(self.scheduler.start())
    }

    pub fn stop_scheduler(&self) -> bool {
        self.scheduler.stop()
    }

    // =====================================================
    // Settings & Reporting
    // =====================================================

    pub fn list_settings(&self) -> Result<Vec<Setting>, AppError> {
        Ok(self.db.list_settings()?)
    }

    pub fn update_setting(&self, key: &str, value: &str) -> Result<Setting, AppError> {
        let setting = self.db.put_setting(key, value)?;
        log::info!("[ACCOUNT_MONITOR] Setting {} = {}", setting.key, setting.value);
        Ok(setting)
    }

    pub fn poll_interval(&self) -> Result<u64, AppError> {
        Ok(self.db.poll_interval_secs()?)
    }

    pub fn set_poll_interval(&self, secs: u64) -> Result<Setting, AppError> {
        let setting = self.db.set_poll_interval_secs(secs)?;
        log::info!("[ACCOUNT_MONITOR] Poll interval set to {}s", secs);
        Ok(setting)
    }

    pub fn metrics(&self, days: Option<u32>) -> Result<AggregateMetrics, AppError> {
        Ok(self.db.get_metrics(days.unwrap_or(DEFAULT_METRICS_DAYS))?)
    }

    pub fn status(&self) -> Result<ServiceStatus, AppError> {
        let totals = self.db.totals()?;
        Ok(ServiceStatus {
            uptime_secs: self.started_at.elapsed().as_secs(),
            client_status: self.source.status(),
            scheduler_running: self.scheduler.is_running(),
            poll_interval_secs: self.db.poll_interval_secs()?,
            total_accounts: totals.accounts,
            monitored_accounts: totals.monitored,
            total_posts: totals.posts,
            last_cycle: self.scheduler.last_cycle(),
        })
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
