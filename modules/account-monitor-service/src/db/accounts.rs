//! Account registry and monitoring-task bookkeeping

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension};

use super::{ACCOUNT_COLUMNS, Db, row_to_account, row_to_task};
use crate::error::{StoreError, StoreResult};
use account_monitor_types::*;

/// Largest id set accepted by one bulk toggle
pub const MAX_TOGGLE_IDS: usize = 1000;

const MAX_PER_PAGE: u32 = 100;

/// Profile URLs pasted instead of bare handles
static PROFILE_URL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:www\.|mobile\.)?(?:x|twitter)\.com/").unwrap()
});

static HANDLE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^@[A-Za-z0-9_]{1,15}$").unwrap());

/// Normalize a user-supplied handle to `@name` form.
///
/// Accepts bare names, `@name`, and x.com/twitter.com profile URLs.
/// Returns `None` when nothing resembling a valid handle remains.
pub fn normalize_handle(raw: &str) -> Option<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let stripped = PROFILE_URL_PREFIX.replace(&compact, "");
    let path = stripped.split(['?', '#']).next().unwrap_or_default();
    let bare = path.trim_end_matches('/').trim_start_matches('@');
    if bare.is_empty() {
        return None;
    }
    let handle = format!("@{}", bare);
    HANDLE_PATTERN.is_match(&handle).then_some(handle)
}

fn clean_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Spreadsheet exports often render integer ranks as `3.0`
fn parse_rank(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0)
            .map(|f| f as i64)
    })
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn upsert_account_in(conn: &Connection, account: &NewAccount) -> StoreResult<TrackedAccount> {
    let display_name = account.display_name.trim();
    if display_name.is_empty() {
        return Err(StoreError::Validation("display name is required".to_string()));
    }
    let handle = normalize_handle(&account.handle).ok_or_else(|| {
        StoreError::Validation(format!("'{}' is not a valid handle", account.handle))
    })?;
    let now = Utc::now();

    conn.execute(
        "INSERT INTO tracked_accounts (display_name, handle, rank, country, organization, topic,
            special_focus, follower_count, following_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, COALESCE(?7, 0), COALESCE(?8, 0), COALESCE(?9, 0), ?10, ?10)
         ON CONFLICT(handle) DO UPDATE SET
            display_name = excluded.display_name,
            rank = COALESCE(?3, rank),
            country = COALESCE(?4, country),
            organization = COALESCE(?5, organization),
            topic = COALESCE(?6, topic),
            special_focus = COALESCE(?7, special_focus),
            follower_count = COALESCE(?8, follower_count),
            following_count = COALESCE(?9, following_count),
            updated_at = ?10",
        rusqlite::params![
            display_name,
            handle,
            account.rank,
            clean_text(&account.country),
            clean_text(&account.organization),
            clean_text(&account.topic),
            account.special_focus,
            account.follower_count,
            account.following_count,
            now
        ],
    )?;

    let sql = format!(
        "SELECT {} FROM tracked_accounts WHERE handle = ?1",
        ACCOUNT_COLUMNS
    );
    Ok(conn.query_row(&sql, [&handle], row_to_account)?)
}

/// Flip the flag and the task status together; `Ok(false)` for unknown ids
fn set_monitoring_one(conn: &mut Connection, id: i64, enabled: bool) -> rusqlite::Result<bool> {
    let tx = conn.transaction()?;
    let now = Utc::now();

    let rows = tx.execute(
        "UPDATE tracked_accounts SET monitoring_enabled = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![enabled, now, id],
    )?;
    if rows == 0 {
        return Ok(false);
    }

    let status = if enabled {
        MonitoringStatus::Active
    } else {
        MonitoringStatus::Inactive
    };
    tx.execute(
        "INSERT INTO monitoring_tasks (account_id, status, last_check, created_at, updated_at)
         VALUES (?1, ?2, NULL, ?3, ?3)
         ON CONFLICT(account_id) DO UPDATE SET
            status = excluded.status,
            updated_at = excluded.updated_at",
        rusqlite::params![id, status.as_str(), now],
    )?;

    tx.commit()?;
    Ok(true)
}

impl Db {
    // =====================================================
    // Account Operations
    // =====================================================

    /// Insert, or update the catalog fields of the account with the same handle.
    /// Never changes the monitoring flag.
    pub fn upsert_account(&self, account: &NewAccount) -> StoreResult<TrackedAccount> {
        let conn = self.conn();
        upsert_account_in(&conn, account)
    }

    pub fn get_account(&self, id: i64) -> StoreResult<Option<TrackedAccount>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM tracked_accounts WHERE id = ?1", ACCOUNT_COLUMNS);
        Ok(conn.query_row(&sql, [id], row_to_account).optional()?)
    }

    pub fn get_account_by_handle(&self, handle: &str) -> StoreResult<Option<TrackedAccount>> {
        let Some(handle) = normalize_handle(handle) else {
            return Ok(None);
        };
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM tracked_accounts WHERE handle = ?1",
            ACCOUNT_COLUMNS
        );
        Ok(conn.query_row(&sql, [handle], row_to_account).optional()?)
    }

    /// Deletes the account; posts and task go with it
    pub fn remove_account(&self, id: i64) -> StoreResult<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM tracked_accounts WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    /// Filtered page of accounts plus the total matching count
    pub fn list_accounts(
        &self,
        filter: &AccountFilter,
        page: PageRequest,
    ) -> StoreResult<(Vec<TrackedAccount>, i64)> {
        let pattern = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(s)));
        let per_page = page.per_page.clamp(1, MAX_PER_PAGE);
        let offset = (page.page.max(1) - 1) as i64 * per_page as i64;

        let condition = "?1 IS NULL
            OR display_name LIKE ?1 ESCAPE '\\'
            OR organization LIKE ?1 ESCAPE '\\'
            OR topic LIKE ?1 ESCAPE '\\'";

        let conn = self.conn();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM tracked_accounts WHERE {}", condition),
            [&pattern],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM tracked_accounts
             WHERE {}
             ORDER BY rank IS NULL, rank ASC, id ASC
             LIMIT ?2 OFFSET ?3",
            ACCOUNT_COLUMNS, condition
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(rusqlite::params![pattern, per_page, offset], row_to_account)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((items, total))
    }

    /// Snapshot of every account with monitoring enabled, in id order
    pub fn list_enabled_accounts(&self) -> StoreResult<Vec<TrackedAccount>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM tracked_accounts WHERE monitoring_enabled = 1 ORDER BY id ASC",
            ACCOUNT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([], row_to_account)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    // =====================================================
    // Monitoring Operations
    // =====================================================

    /// Toggle monitoring for each id independently.
    ///
    /// One id failing does not abort the others. Oversized requests are
    /// rejected before anything is written.
    pub fn set_monitoring(
        &self,
        account_ids: &[i64],
        enabled: bool,
    ) -> StoreResult<MonitoringToggleResult> {
        if account_ids.len() > MAX_TOGGLE_IDS {
            return Err(StoreError::Validation(format!(
                "at most {} ids per request, got {}",
                MAX_TOGGLE_IDS,
                account_ids.len()
            )));
        }

        let mut conn = self.conn();
        let mut result = MonitoringToggleResult::default();
        for &id in account_ids {
            match set_monitoring_one(&mut conn, id, enabled) {
                Ok(true) => result.succeeded.push(id),
                Ok(false) => result.failed.push(id),
                Err(e) => {
                    log::warn!(
                        "[ACCOUNT_MONITOR] Failed to toggle monitoring for #{}: {}",
                        id,
                        e
                    );
                    result.failed.push(id);
                }
            }
        }
        Ok(result)
    }

    pub fn get_monitoring_task(&self, account_id: i64) -> StoreResult<Option<MonitoringTask>> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT account_id, status, last_check, updated_at
                 FROM monitoring_tasks WHERE account_id = ?1",
                [account_id],
                row_to_task,
            )
            .optional()?)
    }

    /// Record a completed check for the account
    pub fn touch_monitoring_task(&self, account_id: i64) -> StoreResult<()> {
        let conn = self.conn();
        let now = Utc::now();
        let rows = conn.execute(
            "INSERT INTO monitoring_tasks (account_id, status, last_check, created_at, updated_at)
             SELECT id, CASE WHEN monitoring_enabled = 1 THEN 'active' ELSE 'inactive' END, ?2, ?2, ?2
             FROM tracked_accounts WHERE id = ?1
             ON CONFLICT(account_id) DO UPDATE SET
                last_check = excluded.last_check,
                updated_at = excluded.updated_at",
            rusqlite::params![account_id, now],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Account #{}", account_id)));
        }
        Ok(())
    }

    // =====================================================
    // Bulk Import
    // =====================================================

    /// Import parsed tabular rows in one transaction.
    ///
    /// Rows without a name are skipped; rows with a name but no usable
    /// handle are reported as failed. A storage error rolls back the batch.
    pub fn import_accounts(&self, rows: &[ImportRow]) -> StoreResult<ImportSummary> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut summary = ImportSummary::default();

        for (idx, row) in rows.iter().enumerate() {
            let row_number = idx + 1;
            let name = row.name.trim();
            if name.is_empty() {
                summary.skipped += 1;
                continue;
            }

            let Some(handle) = row
                .handle
                .as_deref()
                .map(str::trim)
                .filter(|h| !h.is_empty())
            else {
                summary.failed.push(ImportFailure {
                    row: row_number,
                    reason: "missing handle".to_string(),
                });
                continue;
            };

            let account = NewAccount {
                display_name: name.to_string(),
                handle: handle.to_string(),
                rank: row.rank.as_deref().and_then(parse_rank),
                country: row.country.clone(),
                organization: row.organization.clone(),
                topic: row.topic.clone(),
                ..Default::default()
            };

            match upsert_account_in(&tx, &account) {
                Ok(_) => summary.imported += 1,
                Err(StoreError::Validation(reason)) => {
                    summary.failed.push(ImportFailure {
                        row: row_number,
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        tx.commit()?;
        log::info!(
            "[ACCOUNT_MONITOR] Import: {} imported, {} skipped, {} failed",
            summary.imported,
            summary.skipped,
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Populate an empty registry with a few well-known researchers
    pub fn seed_sample_accounts(&self) -> StoreResult<usize> {
        let mut conn = self.conn();
        let existing: i64 =
            conn.query_row("SELECT COUNT(*) FROM tracked_accounts", [], |row| row.get(0))?;
        if existing > 0 {
            return Ok(0);
        }

        let samples = [
            (1, "Ilya Sutskever", "Canada", "SSI", "AlexNet, Seq2seq, deep learning", "@ilyasut", 127_000, 89),
            (2, "Noam Shazeer", "USA", "Google DeepMind", "Attention, mixture of experts", "@noamshazeer", 45_000, 156),
            (3, "Geoffrey Hinton", "UK", "University of Toronto", "Backpropagation, Boltzmann machines", "@geoffreyhinton", 234_000, 67),
        ];

        let tx = conn.transaction()?;
        for (rank, name, country, organization, topic, handle, followers, following) in samples {
            upsert_account_in(
                &tx,
                &NewAccount {
                    display_name: name.to_string(),
                    handle: handle.to_string(),
                    rank: Some(rank),
                    country: Some(country.to_string()),
                    organization: Some(organization.to_string()),
                    topic: Some(topic.to_string()),
                    special_focus: None,
                    follower_count: Some(followers),
                    following_count: Some(following),
                },
            )?;
        }
        tx.commit()?;
        Ok(samples.len())
    }
}
