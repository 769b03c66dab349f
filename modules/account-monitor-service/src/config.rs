//! Process configuration read from the environment at startup.
//!
//! Values that can change at runtime (poll interval, posts per check)
//! live in the settings table instead.

use std::time::Duration;

use crate::scheduler::{
    DEFAULT_BATCH_DELAY_SECS, DEFAULT_BATCH_SIZE, DEFAULT_FAILURE_BACKOFF_SECS, SchedulerConfig,
};
use crate::x_api::DEFAULT_BASE_URL;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    pub api_base_url: String,
    pub batch_size: usize,
    pub batch_delay_secs: u64,
    pub failure_backoff_secs: u64,
    pub seed_samples: bool,
    pub autostart: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let number = |key: &str, default: u64| -> u64 {
            match lookup(key) {
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    log::warn!("[ACCOUNT_MONITOR] Ignoring invalid {}={:?}", key, raw);
                    default
                }),
                None => default,
            }
        };
        let flag = |key: &str, default: bool| match lookup(key).as_deref().map(str::trim) {
            Some("1") | Some("true") | Some("yes") | Some("on") => true,
            Some("0") | Some("false") | Some("no") | Some("off") => false,
            _ => default,
        };

        Self {
            port: u16::try_from(number("ACCOUNT_MONITOR_PORT", 9102)).unwrap_or(9102),
            db_path: string("ACCOUNT_MONITOR_DB_PATH", "./account_monitor.db"),
            api_base_url: string("X_API_BASE_URL", DEFAULT_BASE_URL),
            batch_size: number("MONITOR_BATCH_SIZE", DEFAULT_BATCH_SIZE as u64).max(1) as usize,
            batch_delay_secs: number("MONITOR_BATCH_DELAY_SECS", DEFAULT_BATCH_DELAY_SECS),
            failure_backoff_secs: number(
                "MONITOR_FAILURE_BACKOFF_SECS",
                DEFAULT_FAILURE_BACKOFF_SECS,
            ),
            seed_samples: flag("ACCOUNT_MONITOR_SEED_SAMPLES", false),
            autostart: flag("ACCOUNT_MONITOR_AUTOSTART", true),
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.batch_size,
            batch_delay: Duration::from_secs(self.batch_delay_secs),
            failure_backoff: Duration::from_secs(self.failure_backoff_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.port, 9102);
        assert_eq!(cfg.db_path, "./account_monitor.db");
        assert_eq!(cfg.api_base_url, DEFAULT_BASE_URL);
        assert!(!cfg.seed_samples);
        assert!(cfg.autostart);

        let sched = cfg.scheduler();
        assert_eq!(sched.batch_size, 50);
        assert_eq!(sched.batch_delay, Duration::from_secs(5));
        assert_eq!(sched.failure_backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let cfg = config(&[
            ("ACCOUNT_MONITOR_PORT", "8080"),
            ("MONITOR_BATCH_SIZE", "0"),
            ("MONITOR_BATCH_DELAY_SECS", "soon"),
            ("ACCOUNT_MONITOR_SEED_SAMPLES", "true"),
            ("ACCOUNT_MONITOR_AUTOSTART", "0"),
            ("X_API_BASE_URL", "http://127.0.0.1:9999/2"),
        ]);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.batch_delay_secs, 5);
        assert!(cfg.seed_samples);
        assert!(!cfg.autostart);
        assert_eq!(cfg.api_base_url, "http://127.0.0.1:9999/2");

        assert_eq!(config(&[("ACCOUNT_MONITOR_PORT", "70000")]).port, 9102);
    }
}
