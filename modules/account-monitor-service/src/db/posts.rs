//! Post storage with the dedup gate on the platform post id

use chrono::Utc;

use super::{Db, POST_COLUMNS, row_to_post};
use crate::error::StoreResult;
use account_monitor_types::*;

const MAX_LIST_LIMIT: usize = 200;

impl Db {
    /// Store the post unless its external id is already known.
    ///
    /// Returns `true` if a row was written. An existing post is never
    /// modified, whichever path fetched it first.
    pub fn insert_post_if_absent(&self, post: &NewPost) -> StoreResult<bool> {
        let media_json = serde_json::to_string(&post.media).unwrap_or_else(|_| "[]".to_string());
        let kind = ContentKind::from_media(&post.media);

        let conn = self.conn();
        let rows = conn.execute(
            "INSERT INTO posts (account_id, external_post_id, text, like_count, retweet_count,
                reply_count, quote_count, content_kind, media_json, historical, created_at, collected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(external_post_id) DO NOTHING",
            rusqlite::params![
                post.account_id,
                post.external_post_id,
                post.text,
                post.metrics.likes,
                post.metrics.retweets,
                post.metrics.replies,
                post.metrics.quotes,
                kind.as_str(),
                media_json,
                post.historical,
                post.created_at,
                Utc::now()
            ],
        )?;
        Ok(rows > 0)
    }

    /// Newest posts for an account, by platform creation time
    pub fn list_posts(&self, account_id: i64, limit: usize) -> StoreResult<Vec<Post>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT) as i64;
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM posts WHERE account_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
            POST_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let posts = stmt
            .query_map(rusqlite::params![account_id, limit], row_to_post)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use chrono::{Duration, TimeZone};

    fn test_db() -> Db {
        Db::open(":memory:").expect("Failed to create test db")
    }

    fn count_posts(db: &Db, account_id: i64) -> i64 {
        db.conn()
            .query_row(
                "SELECT COUNT(*) FROM posts WHERE account_id = ?1",
                [account_id],
                |row| row.get(0),
            )
            .unwrap()
    }

    fn account(db: &Db, handle: &str) -> TrackedAccount {
        db.upsert_account(&NewAccount {
            display_name: handle.trim_start_matches('@').to_string(),
            handle: handle.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn post(account_id: i64, external_id: &str, likes: i64) -> NewPost {
        NewPost {
            account_id,
            external_post_id: external_id.to_string(),
            text: format!("post {}", external_id),
            metrics: PostMetrics {
                likes,
                ..Default::default()
            },
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            historical: false,
            media: vec![],
        }
    }

    #[test]
    fn test_insert_is_idempotent_on_external_id() {
        let db = test_db();
        let acc = account(&db, "@ilyasut");

        assert!(db.insert_post_if_absent(&post(acc.id, "1790000000000000001", 10)).unwrap());
        // Same id with different metrics does not overwrite
        assert!(!db.insert_post_if_absent(&post(acc.id, "1790000000000000001", 99)).unwrap());

        let posts = db.list_posts(acc.id, 10).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].metrics.likes, 10);
    }

    #[test]
    fn test_external_id_is_unique_across_accounts() {
        let db = test_db();
        let a = account(&db, "@alpha");
        let b = account(&db, "@bravo");

        assert!(db.insert_post_if_absent(&post(a.id, "42", 1)).unwrap());
        assert!(!db.insert_post_if_absent(&post(b.id, "42", 1)).unwrap());
        assert_eq!(count_posts(&db, a.id), 1);
        assert_eq!(count_posts(&db, b.id), 0);
    }

    #[test]
    fn test_list_posts_newest_first_with_media() {
        let db = test_db();
        let acc = account(&db, "@karpathy");
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

        for i in 0..5 {
            let mut p = post(acc.id, &format!("id-{}", i), i);
            p.created_at = base + Duration::hours(i);
            if i == 4 {
                p.media = vec![MediaRef {
                    media_type: "photo".to_string(),
                    url: "https://pbs.example.com/a.jpg".to_string(),
                }];
            }
            db.insert_post_if_absent(&p).unwrap();
        }

        let posts = db.list_posts(acc.id, 3).unwrap();
        let ids: Vec<_> = posts.iter().map(|p| p.external_post_id.as_str()).collect();
        assert_eq!(ids, vec!["id-4", "id-3", "id-2"]);
        assert_eq!(posts[0].media.len(), 1);
        assert_eq!(posts[0].media[0].media_type, "photo");
        assert_eq!(posts[0].created_at, base + Duration::hours(4));
    }

    #[test]
    fn test_post_for_unknown_account_violates_constraint() {
        let db = test_db();
        let err = db.insert_post_if_absent(&post(777, "orphan", 0)).unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
        assert!(err.is_account_scoped());
    }

    #[test]
    fn test_remove_account_cascades() {
        let db = test_db();
        let acc = account(&db, "@geoffreyhinton");
        db.set_monitoring(&[acc.id], true).unwrap();
        db.insert_post_if_absent(&post(acc.id, "a", 0)).unwrap();
        db.insert_post_if_absent(&post(acc.id, "b", 0)).unwrap();

        assert!(db.remove_account(acc.id).unwrap());
        assert!(db.get_account(acc.id).unwrap().is_none());
        assert_eq!(count_posts(&db, acc.id), 0);
        assert!(db.get_monitoring_task(acc.id).unwrap().is_none());
        assert!(!db.remove_account(acc.id).unwrap());

        // The freed external ids can be collected again for another account
        let other = account(&db, "@ylecun");
        assert!(db.insert_post_if_absent(&post(other.id, "a", 0)).unwrap());
    }
}
