//! Shared types for the account monitor service and its RPC clients.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// =====================================================
// Domain Types
// =====================================================

/// A tracked X/Twitter account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedAccount {
    pub id: i64,
    pub display_name: String,
    /// Platform identity, always carrying its leading `@`
    pub handle: String,
    pub rank: Option<i64>,
    pub country: Option<String>,
    pub organization: Option<String>,
    pub topic: Option<String>,
    pub monitoring_enabled: bool,
    pub special_focus: bool,
    pub follower_count: i64,
    pub following_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog data for creating or updating an account.
///
/// On update, absent optional fields keep their stored values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAccount {
    pub display_name: String,
    pub handle: String,
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub special_focus: Option<bool>,
    #[serde(default)]
    pub follower_count: Option<i64>,
    #[serde(default)]
    pub following_count: Option<i64>,
}

/// Engagement counters reported by the platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetrics {
    pub likes: i64,
    pub retweets: i64,
    pub replies: i64,
    pub quotes: i64,
}

impl PostMetrics {
    pub fn engagement(&self) -> i64 {
        self.likes + self.retweets + self.replies + self.quotes
    }
}

/// A media attachment, in the order the platform lists it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(rename = "type")]
    pub media_type: String,
    pub url: String,
}

/// Coarse content classification used by the analytics distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Image,
    Video,
}

impl ContentKind {
    /// Any video or animated gif wins over photos; no media at all is text.
    pub fn from_media(media: &[MediaRef]) -> Self {
        if media.is_empty() {
            ContentKind::Text
        } else if media
            .iter()
            .any(|m| m.media_type == "video" || m.media_type == "animated_gif")
        {
            ContentKind::Video
        } else {
            ContentKind::Image
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
            ContentKind::Video => "video",
        }
    }
}

/// A post normalized from the platform, not yet attached to an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedPost {
    pub external_post_id: String,
    pub text: String,
    pub metrics: PostMetrics,
    pub created_at: DateTime<Utc>,
    pub media: Vec<MediaRef>,
}

impl FetchedPost {
    pub fn into_new_post(self, account_id: i64, historical: bool) -> NewPost {
        NewPost {
            account_id,
            external_post_id: self.external_post_id,
            text: self.text,
            metrics: self.metrics,
            created_at: self.created_at,
            historical,
            media: self.media,
        }
    }
}

/// A post ready for the dedup gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub account_id: i64,
    pub external_post_id: String,
    pub text: String,
    pub metrics: PostMetrics,
    pub created_at: DateTime<Utc>,
    pub historical: bool,
    pub media: Vec<MediaRef>,
}

/// A stored post. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub account_id: i64,
    pub external_post_id: String,
    pub text: String,
    pub metrics: PostMetrics,
    pub created_at: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
    pub historical: bool,
    pub media: Vec<MediaRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringStatus {
    Active,
    Inactive,
}

impl MonitoringStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoringStatus::Active => "active",
            MonitoringStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(MonitoringStatus::Active),
            "inactive" => Some(MonitoringStatus::Inactive),
            _ => None,
        }
    }
}

/// Bookkeeping for a monitored account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringTask {
    pub account_id: i64,
    pub status: MonitoringStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted configuration entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

/// Profile info from the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub external_id: String,
    pub handle: String,
    pub display_name: String,
    pub description: Option<String>,
    pub follower_count: i64,
    pub following_count: i64,
}

/// Connection state of the platform client as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Disconnected,
    Ready,
    RateLimited,
}

/// Half-open `[start, end)` range in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// =====================================================
// Query / Result Types
// =====================================================

/// Free-text filter over name, organization and topic
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AccountFilter {
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountPage {
    pub items: Vec<TrackedAccount>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringToggleResult {
    pub succeeded: Vec<i64>,
    pub failed: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountDetail {
    pub account: TrackedAccount,
    pub task: Option<MonitoringTask>,
    pub recent_posts: Vec<Post>,
}

/// One row of a tabular import, already split into columns
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ImportRow {
    #[serde(default, deserialize_with = "text_or_number")]
    pub rank: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
}

/// Spreadsheet exports send numeric cells either quoted or bare
fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Cell {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Cell>::deserialize(deserializer)?.map(|cell| match cell {
        Cell::Text(text) => text,
        Cell::Number(n) => n.to_string(),
    }))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    /// 1-based row number within the request
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub failed: Vec<ImportFailure>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDistribution {
    pub text: i64,
    pub images: i64,
    pub videos: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryCount {
    pub country: String,
    pub accounts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub posts: i64,
}

/// Aggregate state for dashboards and exports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub total_accounts: i64,
    pub monitored_accounts: i64,
    pub special_focus_accounts: i64,
    pub total_posts: i64,
    pub historical_posts: i64,
    pub total_engagement: i64,
    pub content_distribution: ContentDistribution,
    pub accounts_by_country: Vec<CountryCount>,
    /// Oldest day first, one entry per day of the trailing window
    pub daily_trend: Vec<DailyCount>,
}

/// Outcome of one manual fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchReport {
    pub account_id: i64,
    pub fetched: usize,
    pub inserted: usize,
    pub historical: bool,
}

/// Outcome of one scheduler poll cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub batches: usize,
    pub accounts_checked: usize,
    pub accounts_failed: usize,
    pub posts_inserted: usize,
}

// =====================================================
// RPC Request Types
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct AddAccountRequest {
    #[serde(flatten)]
    pub account: NewAccount,
    /// Enable monitoring right after adding
    #[serde(default)]
    pub monitor: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveAccountRequest {
    pub id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountDetailRequest {
    pub id: i64,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListAccountsQuery {
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportAccountsRequest {
    pub rows: Vec<ImportRow>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleMonitoringRequest {
    pub ids: Vec<i64>,
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchNowRequest {
    pub account_id: i64,
    pub max_results: Option<u32>,
    /// With `until`, turns the fetch into a historical backfill
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateSettingRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollIntervalRequest {
    pub secs: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MetricsQuery {
    pub days: Option<u32>,
}

// =====================================================
// RPC Response Types
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> RpcResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// =====================================================
// Service Status
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub uptime_secs: u64,
    pub client_status: ClientStatus,
    pub scheduler_running: bool,
    pub poll_interval_secs: u64,
    pub total_accounts: i64,
    pub monitored_accounts: i64,
    pub total_posts: i64,
    pub last_cycle: Option<CycleReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(kind: &str) -> MediaRef {
        MediaRef {
            media_type: kind.to_string(),
            url: format!("https://pbs.example.com/{}.jpg", kind),
        }
    }

    #[test]
    fn test_content_kind_classification() {
        assert_eq!(ContentKind::from_media(&[]), ContentKind::Text);
        assert_eq!(ContentKind::from_media(&[media("photo")]), ContentKind::Image);
        assert_eq!(
            ContentKind::from_media(&[media("photo"), media("video")]),
            ContentKind::Video
        );
        assert_eq!(
            ContentKind::from_media(&[media("animated_gif")]),
            ContentKind::Video
        );
    }

    #[test]
    fn test_media_ref_wire_format() {
        let json = serde_json::to_string(&media("photo")).unwrap();
        assert!(json.contains("\"type\":\"photo\""));
    }

    #[test]
    fn test_monitoring_status_parse() {
        assert_eq!(MonitoringStatus::parse("active"), Some(MonitoringStatus::Active));
        assert_eq!(MonitoringStatus::parse("inactive"), Some(MonitoringStatus::Inactive));
        assert_eq!(MonitoringStatus::parse("paused"), None);
    }

    #[test]
    fn test_add_account_request_flattens_account() {
        let req: AddAccountRequest = serde_json::from_str(
            r#"{"display_name":"Ilya Sutskever","handle":"@ilyasut","monitor":true}"#,
        )
        .unwrap();
        assert_eq!(req.account.handle, "@ilyasut");
        assert!(req.monitor);
        assert_eq!(req.account.special_focus, None);
    }

    #[test]
    fn test_import_row_rank_accepts_numbers_and_text() {
        let rows: Vec<ImportRow> = serde_json::from_str(
            r#"[
                {"rank": 1, "name": "Ilya Sutskever", "handle": "@ilyasut"},
                {"rank": "2", "name": "Noam Shazeer"},
                {"rank": 3.0, "name": "Geoffrey Hinton"},
                {"rank": null, "name": "Yann LeCun"},
                {"name": "Andrej Karpathy"}
            ]"#,
        )
        .unwrap();
        let ranks: Vec<_> = rows.iter().map(|r| r.rank.as_deref()).collect();
        assert_eq!(ranks, vec![Some("1"), Some("2"), Some("3.0"), None, None]);
    }
}
