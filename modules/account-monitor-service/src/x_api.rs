//! X API v2 client.
//!
//! Profile lookup and recent-post fetching, authenticated with either an
//! app-only bearer token or OAuth 1.0a user keys. A quota signal moves the
//! client to RateLimited; the next successful call moves it back to Ready.

use std::collections::HashMap;
use std::time::Duration;

use account_monitor_types::*;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha1::Sha1;

use crate::error::{ClientError, ConfigurationError};

type HmacSha1 = Hmac<Sha1>;

pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com/2";

/// Platform bounds for `max_results` on the timeline endpoint
const MIN_RESULTS: u32 = 5;
const MAX_RESULTS: u32 = 100;
const LOW_REMAINING_THRESHOLD: u32 = 5;
const REQUEST_TIMEOUT_SECS: u64 = 30;

// =====================================================
// Post Source Seam
// =====================================================

/// Anything that can answer profile and recent-post lookups
#[async_trait]
pub trait PostSource: Send + Sync {
    fn status(&self) -> ClientStatus;

    async fn fetch_profile(&self, handle: &str) -> Result<Profile, ClientError>;

    /// Newest first, at most `max_results` posts
    async fn try_recent_posts(
        &self,
        handle: &str,
        max_results: u32,
        window: Option<TimeWindow>,
    ) -> Result<Vec<FetchedPost>, ClientError>;

    /// Like `try_recent_posts`, but recoverable failures come back empty.
    async fn fetch_recent_posts(
        &self,
        handle: &str,
        max_results: u32,
        window: Option<TimeWindow>,
    ) -> Vec<FetchedPost> {
        match self.try_recent_posts(handle, max_results, window).await {
            Ok(posts) => posts,
            Err(ClientError::Disconnected) => Vec::new(),
            Err(e) => {
                log::warn!("[X_API] No posts for {}: {}", handle, e);
                Vec::new()
            }
        }
    }
}

// =====================================================
// Credentials
// =====================================================

#[derive(Debug, Clone)]
pub struct OAuth1Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

#[derive(Debug, Clone)]
pub enum Credentials {
    Bearer(String),
    OAuth1(OAuth1Credentials),
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// A bearer token wins over OAuth keys; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(token) = get("X_BEARER_TOKEN").or_else(|| get("TWITTER_BEARER_TOKEN")) {
            return Ok(Credentials::Bearer(token));
        }

        match (
            get("TWITTER_CONSUMER_KEY"),
            get("TWITTER_CONSUMER_SECRET"),
            get("TWITTER_ACCESS_TOKEN"),
            get("TWITTER_ACCESS_TOKEN_SECRET"),
        ) {
            (Some(consumer_key), Some(consumer_secret), Some(access_token), Some(access_token_secret)) => {
                Ok(Credentials::OAuth1(OAuth1Credentials {
                    consumer_key,
                    consumer_secret,
                    access_token,
                    access_token_secret,
                }))
            }
            _ => Err(ConfigurationError(
                "no X API credential: set X_BEARER_TOKEN or all four TWITTER_* OAuth keys".to_string(),
            )),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Credentials::Bearer(_) => "bearer",
            Credentials::OAuth1(_) => "oauth1",
        }
    }
}

// =====================================================
// Wire Types
// =====================================================

#[derive(Debug, Deserialize)]
struct ApiProblem {
    title: Option<String>,
    detail: Option<String>,
    #[serde(rename = "type")]
    problem_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserPublicMetrics {
    followers_count: Option<i64>,
    following_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    name: String,
    username: String,
    description: Option<String>,
    public_metrics: Option<UserPublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    data: Option<ApiUser>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct TweetPublicMetrics {
    like_count: Option<i64>,
    retweet_count: Option<i64>,
    reply_count: Option<i64>,
    quote_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Attachments {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTweet {
    id: String,
    #[serde(default)]
    text: String,
    created_at: Option<String>,
    public_metrics: Option<TweetPublicMetrics>,
    attachments: Option<Attachments>,
}

#[derive(Debug, Deserialize)]
struct ApiMedia {
    media_key: String,
    #[serde(rename = "type")]
    media_type: String,
    url: Option<String>,
    preview_image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    media: Vec<ApiMedia>,
}

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    data: Vec<ApiTweet>,
    includes: Option<Includes>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

/// Rate limit info parsed from response headers
#[derive(Debug, Default, Clone, Copy)]
struct RateLimitInfo {
    remaining: Option<u32>,
    reset_at: Option<u64>,
}

impl RateLimitInfo {
    fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            remaining: header_number(headers, "x-rate-limit-remaining"),
            reset_at: header_number(headers, "x-rate-limit-reset"),
        }
    }
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Map an `errors` array from a 200 response onto a client error
fn problem_error(problems: &[ApiProblem], subject: &str) -> ClientError {
    let Some(first) = problems.first() else {
        return ClientError::NotFound(subject.to_string());
    };
    let kind = first.problem_type.as_deref().unwrap_or_default();
    let detail = first
        .detail
        .clone()
        .or_else(|| first.title.clone())
        .unwrap_or_else(|| "unknown error".to_string());

    if kind.contains("not-found") {
        ClientError::NotFound(subject.to_string())
    } else if kind.contains("not-authorized") || kind.contains("forbidden") {
        ClientError::Unauthorized(detail)
    } else {
        ClientError::Api {
            status: 200,
            message: detail,
        }
    }
}

/// Turn a timeline page into posts, newest first
fn normalize_timeline(body: &TimelineResponse, collected_at: DateTime<Utc>) -> Vec<FetchedPost> {
    let media_by_key: HashMap<&str, &ApiMedia> = body
        .includes
        .as_ref()
        .map(|inc| inc.media.iter().map(|m| (m.media_key.as_str(), m)).collect())
        .unwrap_or_default();

    let mut posts: Vec<FetchedPost> = body
        .data
        .iter()
        .map(|tweet| {
            let metrics = tweet.public_metrics.as_ref();
            let media = tweet
                .attachments
                .iter()
                .flat_map(|a| a.media_keys.iter())
                .filter_map(|key| media_by_key.get(key.as_str()))
                .filter_map(|m| {
                    let url = m.url.clone().or_else(|| m.preview_image_url.clone())?;
                    Some(MediaRef {
                        media_type: m.media_type.clone(),
                        url,
                    })
                })
                .collect();

            FetchedPost {
                external_post_id: tweet.id.clone(),
                text: tweet.text.clone(),
                metrics: PostMetrics {
                    likes: metrics.and_then(|m| m.like_count).unwrap_or(0),
                    retweets: metrics.and_then(|m| m.retweet_count).unwrap_or(0),
                    replies: metrics.and_then(|m| m.reply_count).unwrap_or(0),
                    quotes: metrics.and_then(|m| m.quote_count).unwrap_or(0),
                },
                created_at: tweet
                    .created_at
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or(collected_at),
                media,
            }
        })
        .collect();

    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    posts
}

// =====================================================
// Live Client
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Ready,
    RateLimited { reset_at: Option<u64> },
}

pub struct XApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    link: Mutex<LinkState>,
    /// Lowercased username -> platform user id
    user_ids: DashMap<String, String>,
}

impl XApiClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            link: Mutex::new(LinkState::Ready),
            user_ids: DashMap::new(),
        }
    }

    pub fn status(&self) -> ClientStatus {
        match *self.link.lock() {
            LinkState::Ready => ClientStatus::Ready,
            LinkState::RateLimited { .. } => ClientStatus::RateLimited,
        }
    }

    fn mark_rate_limited(&self, reset_at: Option<u64>) {
        let mut link = self.link.lock();
        let previous = std::mem::replace(&mut *link, LinkState::RateLimited { reset_at });
        match previous {
            LinkState::Ready => log::warn!(
                "[X_API] Rate limited (reset at {:?}), returning empty results until a call succeeds",
                reset_at
            ),
            LinkState::RateLimited { reset_at: earlier } if earlier != reset_at => {
                log::debug!("[X_API] Rate limit reset moved to {:?}", reset_at);
            }
            LinkState::RateLimited { .. } => {}
        }
    }

    fn mark_ready(&self) {
        let mut link = self.link.lock();
        if matches!(*link, LinkState::RateLimited { .. }) {
            log::info!("[X_API] Rate limit cleared");
        }
        *link = LinkState::Ready;
    }

    fn authorization(&self, method: &str, url: &str, query: &[(&str, String)]) -> String {
        match &self.credentials {
            Credentials::Bearer(token) => format!("Bearer {}", token),
            Credentials::OAuth1(creds) => generate_oauth_header(method, url, creds, query),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let auth = self.authorization("GET", &url, query);
        let full_url = if query.is_empty() {
            url
        } else {
            let query_string = query
                .iter()
                .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            format!("{}?{}", url, query_string)
        };

        let response = self
            .http
            .get(&full_url)
            .header("Authorization", auth)
            .send()
            .await?;

        let rate = RateLimitInfo::from_headers(response.headers());
        let status = response.status().as_u16();
        let body = response.text().await?;

        match status {
            200..=299 => {}
            429 => {
                self.mark_rate_limited(rate.reset_at);
                return Err(ClientError::RateLimited {
                    reset_at: rate.reset_at,
                });
            }
            401 | 403 => return Err(ClientError::Unauthorized(truncate_error(&body))),
            404 => return Err(ClientError::NotFound(path.to_string())),
            _ => {
                return Err(ClientError::Api {
                    status,
                    message: truncate_error(&body),
                });
            }
        }

        match rate.remaining {
            Some(0) => self.mark_rate_limited(rate.reset_at),
            Some(remaining) => {
                if remaining < LOW_REMAINING_THRESHOLD {
                    log::warn!("[X_API] Rate limit low: {} remaining on {}", remaining, path);
                }
                self.mark_ready();
            }
            None => self.mark_ready(),
        }

        Ok(serde_json::from_str(&body)?)
    }

    async fn lookup_user(&self, handle: &str) -> Result<ApiUser, ClientError> {
        let username = handle.trim().trim_start_matches('@');
        let query = [("user.fields", "public_metrics,description".to_string())];
        let body: UserResponse = self
            .get_json(&format!("/users/by/username/{}", percent_encode(username)), &query)
            .await?;
        let user = body
            .data
            .ok_or_else(|| problem_error(&body.errors, handle))?;
        self.user_ids
            .insert(username.to_lowercase(), user.id.clone());
        Ok(user)
    }

    async fn resolve_user_id(&self, handle: &str) -> Result<String, ClientError> {
        let key = handle.trim().trim_start_matches('@').to_lowercase();
        if let Some(id) = self.user_ids.get(&key) {
            return Ok(id.value().clone());
        }
        Ok(self.lookup_user(handle).await?.id)
    }

    pub async fn fetch_profile(&self, handle: &str) -> Result<Profile, ClientError> {
        let user = self.lookup_user(handle).await?;
        let metrics = user.public_metrics.as_ref();
        Ok(Profile {
            external_id: user.id.clone(),
            handle: format!("@{}", user.username),
            display_name: user.name.clone(),
            description: user.description.clone(),
            follower_count: metrics.and_then(|m| m.followers_count).unwrap_or(0),
            following_count: metrics.and_then(|m| m.following_count).unwrap_or(0),
        })
    }

    pub async fn try_recent_posts(
        &self,
        handle: &str,
        max_results: u32,
        window: Option<TimeWindow>,
    ) -> Result<Vec<FetchedPost>, ClientError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let user_id = self.resolve_user_id(handle).await?;

        let mut query: Vec<(&str, String)> = vec![
            (
                "max_results",
                max_results.clamp(MIN_RESULTS, MAX_RESULTS).to_string(),
            ),
            (
                "tweet.fields",
                "created_at,public_metrics,attachments".to_string(),
            ),
            ("expansions", "attachments.media_keys".to_string()),
            ("media.fields", "type,url,preview_image_url".to_string()),
        ];
        if let Some(w) = &window {
            query.push(("start_time", w.start.to_rfc3339_opts(SecondsFormat::Secs, true)));
            query.push(("end_time", w.end.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }

        let result: Result<TimelineResponse, ClientError> = self
            .get_json(&format!("/users/{}/tweets", percent_encode(&user_id)), &query)
            .await;
        let body = match result {
            Ok(body) => body,
            Err(ClientError::NotFound(what)) => {
                // Cached id may belong to a deleted account
                self.user_ids
                    .remove(&handle.trim().trim_start_matches('@').to_lowercase());
                return Err(ClientError::NotFound(what));
            }
            Err(e) => return Err(e),
        };

        if body.data.is_empty() && !body.errors.is_empty() {
            return Err(problem_error(&body.errors, handle));
        }

        let mut posts = normalize_timeline(&body, Utc::now());
        if let Some(w) = window {
            posts.retain(|p| p.created_at >= w.start && p.created_at < w.end);
        }
        posts.truncate(max_results as usize);
        Ok(posts)
    }
}

// =====================================================
// Content Client
// =====================================================

/// The platform client as the rest of the service sees it.
///
/// `Disabled` is fixed for the process lifetime once construction found
/// no credential.
pub enum ContentClient {
    Disabled { reason: String },
    Live(XApiClient),
}

impl ContentClient {
    pub fn new(base_url: &str, credentials: Result<Credentials, ConfigurationError>) -> Self {
        match credentials {
            Ok(credentials) => {
                log::info!(
                    "[X_API] Client ready ({} auth, {})",
                    credentials.kind(),
                    base_url
                );
                ContentClient::Live(XApiClient::new(base_url, credentials))
            }
            Err(e) => {
                log::warn!("[X_API] {}; platform client disconnected", e);
                ContentClient::Disabled { reason: e.0 }
            }
        }
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        match self {
            ContentClient::Disabled { reason } => Some(reason),
            ContentClient::Live(_) => None,
        }
    }
}

#[async_trait]
impl PostSource for ContentClient {
    fn status(&self) -> ClientStatus {
        match self {
            ContentClient::Disabled { .. } => ClientStatus::Disconnected,
            ContentClient::Live(client) => client.status(),
        }
    }

    async fn fetch_profile(&self, handle: &str) -> Result<Profile, ClientError> {
        match self {
            ContentClient::Disabled { .. } => Err(ClientError::Disconnected),
            ContentClient::Live(client) => client.fetch_profile(handle).await,
        }
    }

    async fn try_recent_posts(
        &self,
        handle: &str,
        max_results: u32,
        window: Option<TimeWindow>,
    ) -> Result<Vec<FetchedPost>, ClientError> {
        match self {
            ContentClient::Disabled { .. } => Err(ClientError::Disconnected),
            ContentClient::Live(client) => client.try_recent_posts(handle, max_results, window).await,
        }
    }
}

// =====================================================
// OAuth 1.0a Implementation
// =====================================================

fn percent_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

/// HMAC-SHA1 over the signature base string of a request
fn oauth_signature(
    method: &str,
    url: &str,
    params: &[(&str, String)],
    credentials: &OAuth1Credentials,
) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&param_string)
    );

    let signing_key = format!(
        "{}&{}",
        percent_encode(&credentials.consumer_secret),
        percent_encode(&credentials.access_token_secret)
    );

    let mut mac =
        HmacSha1::new_from_slice(signing_key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(base_string.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn generate_oauth_header(
    method: &str,
    url: &str,
    credentials: &OAuth1Credentials,
    query: &[(&str, String)],
) -> String {
    let timestamp = Utc::now().timestamp().to_string();
    let nonce: String = (0..32)
        .map(|_| format!("{:x}", rand::random::<u8>()))
        .collect();

    let oauth_params: Vec<(&str, String)> = vec![
        ("oauth_consumer_key", credentials.consumer_key.clone()),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1".to_string()),
        ("oauth_timestamp", timestamp),
        ("oauth_token", credentials.access_token.clone()),
        ("oauth_version", "1.0".to_string()),
    ];

    let mut signed = oauth_params.clone();
    signed.extend(query.iter().cloned());
    let signature = oauth_signature(method, url, &signed, credentials);

    let mut header_params = oauth_params;
    header_params.push(("oauth_signature", signature));
    header_params.sort_by(|a, b| a.0.cmp(b.0));

    let auth_string: String = header_params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");

    format!("OAuth {}", auth_string)
}

fn truncate_error(s: &str) -> String {
    s.chars().take(200).collect()
}
