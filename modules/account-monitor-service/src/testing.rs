//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use account_monitor_types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::db::Db;
use crate::error::ClientError;
use crate::x_api::PostSource;

pub fn test_db() -> Arc<Db> {
    Arc::new(Db::open(":memory:").expect("Failed to create test db"))
}

/// Register an account with monitoring switched on
pub fn enabled_account(db: &Db, handle: &str) -> TrackedAccount {
    let account = db
        .upsert_account(&NewAccount {
            display_name: handle.trim_start_matches('@').to_string(),
            handle: handle.to_string(),
            ..Default::default()
        })
        .unwrap();
    db.set_monitoring(&[account.id], true).unwrap();
    db.get_account(account.id).unwrap().unwrap()
}

pub fn fetched(external_id: &str, created_at: DateTime<Utc>) -> FetchedPost {
    FetchedPost {
        external_post_id: external_id.to_string(),
        text: format!("post {}", external_id),
        metrics: PostMetrics {
            likes: 1,
            ..Default::default()
        },
        created_at,
        media: vec![],
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub handle: String,
    pub max_results: u32,
    pub window: Option<TimeWindow>,
}

/// In-memory post source keyed by handle
pub struct FakeSource {
    status: Mutex<ClientStatus>,
    posts: Mutex<HashMap<String, Vec<FetchedPost>>>,
    profiles: Mutex<HashMap<String, Result<Profile, ClientError>>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(ClientStatus::Ready),
            posts: Mutex::new(HashMap::new()),
            profiles: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn disconnected() -> Self {
        let source = Self::new();
        *source.status.lock() = ClientStatus::Disconnected;
        source
    }

    pub fn set_posts(&self, handle: &str, posts: Vec<FetchedPost>) {
        self.posts.lock().insert(handle.to_lowercase(), posts);
    }

    pub fn set_profile(&self, handle: &str, profile: Result<Profile, ClientError>) {
        self.profiles.lock().insert(handle.to_lowercase(), profile);
    }

    pub fn fail(&self, handle: &str) {
        self.failing.lock().insert(handle.to_lowercase());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn called_handles(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.handle.clone()).collect()
    }
}

#[async_trait]
impl PostSource for FakeSource {
    fn status(&self) -> ClientStatus {
        *self.status.lock()
    }

    async fn fetch_profile(&self, handle: &str) -> Result<Profile, ClientError> {
        if self.status() == ClientStatus::Disconnected {
            return Err(ClientError::Disconnected);
        }
        self.profiles
            .lock()
            .get(&handle.to_lowercase())
            .cloned()
            .unwrap_or_else(|| Err(ClientError::NotFound(handle.to_string())))
    }

    async fn try_recent_posts(
        &self,
        handle: &str,
        max_results: u32,
        window: Option<TimeWindow>,
    ) -> Result<Vec<FetchedPost>, ClientError> {
        self.calls.lock().push(RecordedCall {
            handle: handle.to_string(),
            max_results,
            window,
        });
        if self.status() == ClientStatus::Disconnected {
            return Err(ClientError::Disconnected);
        }
        let key = handle.to_lowercase();
        if self.failing.lock().contains(&key) {
            return Err(ClientError::Network("connection reset by peer".to_string()));
        }
        let mut posts = self.posts.lock().get(&key).cloned().unwrap_or_default();
        if let Some(w) = window {
            posts.retain(|p| p.created_at >= w.start && p.created_at < w.end);
        }
        posts.truncate(max_results as usize);
        Ok(posts)
    }
}
