//! Validated key/value settings

use chrono::Utc;
use rusqlite::OptionalExtension;

use super::Db;
use crate::error::{StoreError, StoreResult};
use account_monitor_types::Setting;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1800;
pub const MIN_POLL_INTERVAL_SECS: u64 = 300;
/// One week
pub const MAX_POLL_INTERVAL_SECS: u64 = 604_800;

pub const DEFAULT_POSTS_PER_CHECK: u32 = 5;
const MAX_POSTS_PER_CHECK: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    PollIntervalSecs,
    PostsPerCheck,
}

impl SettingKey {
    pub const ALL: [SettingKey; 2] = [SettingKey::PollIntervalSecs, SettingKey::PostsPerCheck];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::PollIntervalSecs => "poll_interval_secs",
            SettingKey::PostsPerCheck => "posts_per_check",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }

    pub fn description(&self) -> &'static str {
        match self {
            SettingKey::PollIntervalSecs => "Seconds between poll cycles",
            SettingKey::PostsPerCheck => "Posts requested per account on each poll",
        }
    }

    fn default_value(&self) -> u64 {
        match self {
            SettingKey::PollIntervalSecs => DEFAULT_POLL_INTERVAL_SECS,
            SettingKey::PostsPerCheck => DEFAULT_POSTS_PER_CHECK as u64,
        }
    }

    fn range(&self) -> (u64, u64) {
        match self {
            SettingKey::PollIntervalSecs => (MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS),
            SettingKey::PostsPerCheck => (1, MAX_POSTS_PER_CHECK as u64),
        }
    }

    /// Parse and range-check a raw value, returning its canonical form
    pub fn validate(&self, value: &str) -> StoreResult<u64> {
        let parsed: u64 = value.trim().parse().map_err(|_| {
            StoreError::Validation(format!(
                "{} must be a whole number, got '{}'",
                self.as_str(),
                value
            ))
        })?;
        let (min, max) = self.range();
        if parsed < min || parsed > max {
            return Err(StoreError::Validation(format!(
                "{} must be between {} and {}, got {}",
                self.as_str(),
                min,
                max,
                parsed
            )));
        }
        Ok(parsed)
    }
}

impl Db {
    /// Insert defaults for keys that have never been written
    pub(super) fn seed_settings(&self) -> StoreResult<()> {
        let conn = self.conn();
        let now = Utc::now();
        for key in SettingKey::ALL {
            conn.execute(
                "INSERT OR IGNORE INTO settings (key, value, description, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    key.as_str(),
                    key.default_value().to_string(),
                    key.description(),
                    now
                ],
            )?;
        }
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> StoreResult<String> {
        let setting_key = parse_key(key)?;
        let conn = self.conn();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [setting_key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or_else(|| setting_key.default_value().to_string()))
    }

    /// Validated write. Rejected values leave the stored setting untouched.
    pub fn put_setting(&self, key: &str, value: &str) -> StoreResult<Setting> {
        let setting_key = parse_key(key)?;
        let canonical = setting_key.validate(value)?.to_string();
        let now = Utc::now();

        let conn = self.conn();
        conn.execute(
            "INSERT INTO settings (key, value, description, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            rusqlite::params![setting_key.as_str(), canonical, setting_key.description(), now],
        )?;

        Ok(Setting {
            key: setting_key.as_str().to_string(),
            value: canonical,
            description: setting_key.description().to_string(),
            updated_at: now,
        })
    }

    pub fn list_settings(&self) -> StoreResult<Vec<Setting>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT key, value, description, updated_at FROM settings ORDER BY key")?;
        let settings = stmt
            .query_map([], |row| {
                Ok(Setting {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    description: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(settings)
    }

    pub fn poll_interval_secs(&self) -> StoreResult<u64> {
        self.numeric_setting(SettingKey::PollIntervalSecs)
    }

    pub fn set_poll_interval_secs(&self, secs: u64) -> StoreResult<Setting> {
        self.put_setting(SettingKey::PollIntervalSecs.as_str(), &secs.to_string())
    }

    pub fn posts_per_check(&self) -> StoreResult<u32> {
        let value = self.numeric_setting(SettingKey::PostsPerCheck)?;
        Ok(value as u32)
    }

    /// A stored value that no longer validates falls back to the default.
    fn numeric_setting(&self, key: SettingKey) -> StoreResult<u64> {
        let raw = self.get_setting(key.as_str())?;
        Ok(key.validate(&raw).unwrap_or_else(|e| {
            log::warn!("[ACCOUNT_MONITOR] Ignoring stored setting: {}", e);
            key.default_value()
        }))
    }
}

fn parse_key(key: &str) -> StoreResult<SettingKey> {
    SettingKey::parse(key)
        .ok_or_else(|| StoreError::Validation(format!("Unknown setting '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Db {
        Db::open(":memory:").expect("Failed to create test db")
    }

    #[test]
    fn test_defaults_are_seeded() {
        let db = test_db();
        assert_eq!(db.get_setting("poll_interval_secs").unwrap(), "1800");
        assert_eq!(db.get_setting("posts_per_check").unwrap(), "5");
        assert_eq!(db.posts_per_check().unwrap(), DEFAULT_POSTS_PER_CHECK);
    }

    #[test]
    fn test_poll_interval_out_of_range_is_rejected() {
        let db = test_db();
        for bad in ["299", "604801", "0", "-5", "soon", ""] {
            let result = db.put_setting("poll_interval_secs", bad);
            assert!(
                matches!(result, Err(StoreError::Validation(_))),
                "{} should be rejected",
                bad
            );
        }
        // No partial effect
        assert_eq!(db.get_setting("poll_interval_secs").unwrap(), "1800");
    }

    #[test]
    fn test_poll_interval_in_range_is_visible() {
        let db = test_db();
        for good in [300u64, 1800, 86_400, 604_800] {
            db.put_setting("poll_interval_secs", &good.to_string()).unwrap();
            assert_eq!(db.get_setting("poll_interval_secs").unwrap(), good.to_string());
            assert_eq!(db.poll_interval_secs().unwrap(), good);
        }
    }

    #[test]
    fn test_value_is_stored_canonically() {
        let db = test_db();
        let setting = db.put_setting("posts_per_check", " 20 ").unwrap();
        assert_eq!(setting.value, "20");
        assert_eq!(db.posts_per_check().unwrap(), 20);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let db = test_db();
        assert!(matches!(
            db.put_setting("theme", "dark"),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(db.get_setting("theme"), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_posts_per_check_bounds() {
        let db = test_db();
        assert!(db.put_setting("posts_per_check", "0").is_err());
        assert!(db.put_setting("posts_per_check", "101").is_err());
        assert!(db.put_setting("posts_per_check", "100").is_ok());
    }
}
