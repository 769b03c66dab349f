//! SQLite storage for tracked accounts, posts, monitoring tasks and settings.
//!
//! One connection behind a mutex; each public operation is atomic as a unit.

mod accounts;
mod metrics;
mod posts;
mod settings;

pub use accounts::normalize_handle;

use crate::error::StoreResult;
use account_monitor_types::*;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, Row};

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        db.seed_settings()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    #[cfg(test)]
    pub fn execute_sql(&self, sql: &str) -> StoreResult<()> {
        Ok(self.conn().execute_batch(sql)?)
    }

    fn create_tables(&self) -> StoreResult<()> {
        let conn = self.conn();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tracked_accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                display_name TEXT NOT NULL,
                handle TEXT NOT NULL UNIQUE COLLATE NOCASE,
                rank INTEGER,
                country TEXT,
                organization TEXT,
                topic TEXT,
                monitoring_enabled INTEGER NOT NULL DEFAULT 0,
                special_focus INTEGER NOT NULL DEFAULT 0,
                follower_count INTEGER NOT NULL DEFAULT 0,
                following_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_enabled ON tracked_accounts(monitoring_enabled, id);

            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                external_post_id TEXT NOT NULL UNIQUE,
                text TEXT NOT NULL,
                like_count INTEGER NOT NULL DEFAULT 0,
                retweet_count INTEGER NOT NULL DEFAULT 0,
                reply_count INTEGER NOT NULL DEFAULT 0,
                quote_count INTEGER NOT NULL DEFAULT 0,
                content_kind TEXT NOT NULL DEFAULT 'text',
                media_json TEXT NOT NULL DEFAULT '[]',
                historical INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                collected_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES tracked_accounts(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_posts_account_time ON posts(account_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_posts_time ON posts(created_at DESC);

            CREATE TABLE IF NOT EXISTS monitoring_tasks (
                account_id INTEGER PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'active',
                last_check TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES tracked_accounts(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL
            );",
        )?;

        Ok(())
    }
}

// =====================================================
// Row Mappers
// =====================================================

const ACCOUNT_COLUMNS: &str = "id, display_name, handle, rank, country, organization, topic,
    monitoring_enabled, special_focus, follower_count, following_count, created_at, updated_at";

fn row_to_account(row: &Row) -> rusqlite::Result<TrackedAccount> {
    Ok(TrackedAccount {
        id: row.get(0)?,
        display_name: row.get(1)?,
        handle: row.get(2)?,
        rank: row.get(3)?,
        country: row.get(4)?,
        organization: row.get(5)?,
        topic: row.get(6)?,
        monitoring_enabled: row.get(7)?,
        special_focus: row.get(8)?,
        follower_count: row.get(9)?,
        following_count: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

const POST_COLUMNS: &str = "id, account_id, external_post_id, text, like_count, retweet_count,
    reply_count, quote_count, created_at, collected_at, historical, media_json";

fn row_to_post(row: &Row) -> rusqlite::Result<Post> {
    let media_json: String = row.get(11)?;
    let media: Vec<MediaRef> = serde_json::from_str(&media_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Post {
        id: row.get(0)?,
        account_id: row.get(1)?,
        external_post_id: row.get(2)?,
        text: row.get(3)?,
        metrics: PostMetrics {
            likes: row.get(4)?,
            retweets: row.get(5)?,
            replies: row.get(6)?,
            quotes: row.get(7)?,
        },
        created_at: row.get(8)?,
        collected_at: row.get(9)?,
        historical: row.get(10)?,
        media,
    })
}

fn row_to_task(row: &Row) -> rusqlite::Result<MonitoringTask> {
    let status: String = row.get(1)?;
    let status = MonitoringStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown monitoring status '{}'", status).into(),
        )
    })?;
    Ok(MonitoringTask {
        account_id: row.get(0)?,
        status,
        last_check: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_seeds_settings() {
        let db = Db::open(":memory:").expect("Failed to create test db");
        let settings = db.list_settings().unwrap();
        assert_eq!(settings.len(), 2);
        assert_eq!(
            db.poll_interval_secs().unwrap(),
            settings::DEFAULT_POLL_INTERVAL_SECS
        );
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.db");
        let path = path.to_str().unwrap();

        {
            let db = Db::open(path).unwrap();
            db.put_setting("poll_interval_secs", "900").unwrap();
            db.upsert_account(&NewAccount {
                display_name: "Geoffrey Hinton".to_string(),
                handle: "geoffreyhinton".to_string(),
                ..Default::default()
            })
            .unwrap();
        }

        let db = Db::open(path).unwrap();
        assert_eq!(db.poll_interval_secs().unwrap(), 900);
        let account = db.get_account_by_handle("@GeoffreyHinton").unwrap().unwrap();
        assert_eq!(account.display_name, "Geoffrey Hinton");
    }
}
