//! Aggregate analytics over accounts and collected posts

use std::collections::HashMap;

use chrono::{Duration, Utc};

use super::Db;
use crate::error::StoreResult;
use account_monitor_types::*;

const MAX_TREND_DAYS: u32 = 90;

/// Headline counts for the status endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub accounts: i64,
    pub monitored: i64,
    pub posts: i64,
}

impl Db {
    pub fn totals(&self) -> StoreResult<Totals> {
        let conn = self.conn();
        let (accounts, monitored): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(monitoring_enabled), 0) FROM tracked_accounts",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let posts: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(Totals {
            accounts,
            monitored,
            posts,
        })
    }

    /// Aggregate metrics with a daily post trend over the trailing `trend_days`
    /// (clamped to 1..=90), today included.
    pub fn get_metrics(&self, trend_days: u32) -> StoreResult<AggregateMetrics> {
        let trend_days = trend_days.clamp(1, MAX_TREND_DAYS);
        let today = Utc::now().date_naive();
        let first_day = today - Duration::days(trend_days as i64 - 1);
        let cutoff = first_day.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();

        let conn = self.conn();

        let (total_accounts, monitored_accounts, special_focus_accounts): (i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(monitoring_enabled), 0),
                        COALESCE(SUM(special_focus), 0)
                 FROM tracked_accounts",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        let (total_posts, historical_posts, total_engagement): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(historical), 0),
                    COALESCE(SUM(like_count + retweet_count + reply_count + quote_count), 0)
             FROM posts",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut content_distribution = ContentDistribution::default();
        {
            let mut stmt =
                conn.prepare("SELECT content_kind, COUNT(*) FROM posts GROUP BY content_kind")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (kind, count) = row?;
                match kind.as_str() {
                    "image" => content_distribution.images += count,
                    "video" => content_distribution.videos += count,
                    _ => content_distribution.text += count,
                }
            }
        }

        let accounts_by_country = {
            let mut stmt = conn.prepare(
                "SELECT COALESCE(NULLIF(TRIM(country), ''), 'Unknown') AS c, COUNT(*) AS n
                 FROM tracked_accounts
                 GROUP BY c
                 ORDER BY n DESC, c ASC",
            )?;
            stmt.query_map([], |row| {
                Ok(CountryCount {
                    country: row.get(0)?,
                    accounts: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let per_day: HashMap<String, i64> = {
            let mut stmt = conn.prepare(
                "SELECT substr(created_at, 1, 10) AS day, COUNT(*)
                 FROM posts
                 WHERE created_at >= ?1
                 GROUP BY day",
            )?;
            stmt.query_map([cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<HashMap<_, _>>>()?
        };

        let daily_trend = (0..trend_days as i64)
            .map(|offset| {
                let date = first_day + Duration::days(offset);
                let key = date.format("%Y-%m-%d").to_string();
                DailyCount {
                    date,
                    posts: per_day.get(&key).copied().unwrap_or(0),
                }
            })
            .collect();

        Ok(AggregateMetrics {
            total_accounts,
            monitored_accounts,
            special_focus_accounts,
            total_posts,
            historical_posts,
            total_engagement,
            content_distribution,
            accounts_by_country,
            daily_trend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Db {
        Db::open(":memory:").expect("Failed to create test db")
    }

    fn media(kind: &str) -> MediaRef {
        MediaRef {
            media_type: kind.to_string(),
            url: format!("https://pbs.example.com/{}", kind),
        }
    }

    #[test]
    fn test_empty_store_metrics() {
        let db = test_db();
        let metrics = db.get_metrics(7).unwrap();
        assert_eq!(metrics.total_accounts, 0);
        assert_eq!(metrics.total_posts, 0);
        assert_eq!(metrics.total_engagement, 0);
        assert_eq!(metrics.content_distribution, ContentDistribution::default());
        assert!(metrics.accounts_by_country.is_empty());
        assert_eq!(metrics.daily_trend.len(), 7);
        assert!(metrics.daily_trend.iter().all(|d| d.posts == 0));
        assert_eq!(metrics.daily_trend[6].date, Utc::now().date_naive());
    }

    #[test]
    fn test_distribution_and_trend() {
        let db = test_db();
        db.seed_sample_accounts().unwrap();
        db.upsert_account(&NewAccount {
            display_name: "Unplaced".to_string(),
            handle: "@unplaced".to_string(),
            special_focus: Some(true),
            ..Default::default()
        })
        .unwrap();
        let ilya = db.get_account_by_handle("@ilyasut").unwrap().unwrap();
        db.set_monitoring(&[ilya.id], true).unwrap();

        let now = Utc::now();
        let posts = [
            ("p1", vec![], now, false, 10),
            ("p2", vec![media("photo")], now, false, 5),
            ("p3", vec![media("photo"), media("video")], now - Duration::days(2), false, 1),
            ("p4", vec![media("animated_gif")], now - Duration::days(40), true, 0),
        ];
        for (id, media, created_at, historical, likes) in posts {
            db.insert_post_if_absent(&NewPost {
                account_id: ilya.id,
                external_post_id: id.to_string(),
                text: String::new(),
                metrics: PostMetrics {
                    likes,
                    retweets: 1,
                    ..Default::default()
                },
                created_at,
                historical,
                media,
            })
            .unwrap();
        }

        let metrics = db.get_metrics(7).unwrap();
        assert_eq!(metrics.total_accounts, 4);
        assert_eq!(metrics.monitored_accounts, 1);
        assert_eq!(metrics.special_focus_accounts, 1);
        assert_eq!(metrics.total_posts, 4);
        assert_eq!(metrics.historical_posts, 1);
        assert_eq!(metrics.total_engagement, 16 + 4);
        assert_eq!(
            metrics.content_distribution,
            ContentDistribution {
                text: 1,
                images: 1,
                videos: 2,
            }
        );
        assert_eq!(metrics.accounts_by_country.len(), 4);
        assert!(
            metrics
                .accounts_by_country
                .iter()
                .any(|c| c.country == "Unknown" && c.accounts == 1)
        );

        assert_eq!(metrics.daily_trend.len(), 7);
        assert_eq!(metrics.daily_trend[6].posts, 2);
        assert_eq!(metrics.daily_trend[4].posts, 1);
        assert_eq!(metrics.daily_trend.iter().map(|d| d.posts).sum::<i64>(), 3);

        let totals = db.totals().unwrap();
        assert_eq!(
            totals,
            Totals {
                accounts: 4,
                monitored: 1,
                posts: 4,
            }
        );
    }

    #[test]
    fn test_trend_days_are_clamped() {
        let db = test_db();
        assert_eq!(db.get_metrics(0).unwrap().daily_trend.len(), 1);
        assert_eq!(db.get_metrics(365).unwrap().daily_trend.len(), 90);
    }
}
