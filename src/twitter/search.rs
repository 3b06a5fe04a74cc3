//! Mention search through the third-party search proxy.
//!
//! The proxy returns the platform's internal timeline payload, which is
//! undocumented. Extraction walks it with guarded lookups and skips anything
//! that does not match the expected shape instead of failing the cycle.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{MentionedUser, MonitoredHandle, NormalizedMention, SearchCredentials};

const SEARCH_RESULT_COUNT: &str = "20";

#[async_trait]
pub trait MentionSource: Send + Sync {
    /// Latest posts matching `handle`.
    async fn search(&self, handle: &MonitoredHandle) -> Result<Vec<NormalizedMention>>;
}

pub struct SearchClient {
    client: reqwest::Client,
    credentials: SearchCredentials,
    endpoint: String,
    max_retries: u32,
}

impl SearchClient {
    pub fn new(credentials: SearchCredentials, timeout: Duration, max_retries: u32) -> Result<Self> {
        let endpoint = format!("https://{}/search-v2", credentials.host);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build search HTTP client")?;
        Ok(Self {
            client,
            credentials,
            endpoint,
            max_retries,
        })
    }

    /// Point the client at a different endpoint, e.g. a local mock server.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl MentionSource for SearchClient {
    /// Never fails: transport errors, error statuses and unreadable bodies
    /// are logged and yield no mentions for this handle.
    async fn search(&self, handle: &MonitoredHandle) -> Result<Vec<NormalizedMention>> {
        let mut attempt = 0u32;
        loop {
            let response = match self
                .client
                .get(&self.endpoint)
                .header("x-rapidapi-host", &self.credentials.host)
                .header("x-rapidapi-key", &self.credentials.api_key)
                .query(&[
                    ("query", handle.as_str()),
                    ("count", SEARCH_RESULT_COUNT),
                    ("type", "Latest"),
                ])
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!(handle = %handle, "Search request failed: {}", e);
                    return Ok(Vec::new());
                }
            };

            let status = response.status();
            if status.is_success() {
                return match response.json::<Value>().await {
                    Ok(body) => Ok(extract_mentions(&body)),
                    Err(e) => {
                        error!(handle = %handle, "Search response was not JSON: {}", e);
                        Ok(Vec::new())
                    }
                };
            }

            if status.as_u16() == 429 && attempt < self.max_retries {
                let delay = Duration::from_secs(2u64.pow(attempt) * 2);
                warn!(
                    handle = %handle,
                    retry = attempt + 1,
                    max_retries = self.max_retries,
                    "Search rate limited (429), retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            error!(handle = %handle, "Search failed with status {}: {}", status, body);
            return Ok(Vec::new());
        }
    }
}

/// Flatten a search payload into mention records. Never fails: entries that
/// do not match the expected shape are skipped, and a payload without a
/// timeline yields nothing.
pub fn extract_mentions(payload: &Value) -> Vec<NormalizedMention> {
    let Some(instructions) = payload
        .get("result")
        .and_then(|r| r.get("timeline"))
        .and_then(|t| t.get("instructions"))
        .and_then(Value::as_array)
    else {
        warn!("Search payload has no timeline instructions");
        return Vec::new();
    };

    let mentions: Vec<NormalizedMention> = instructions
        .iter()
        .filter(|i| i.get("type").and_then(Value::as_str) == Some("TimelineAddEntries"))
        .filter_map(|i| i.get("entries").and_then(Value::as_array))
        .flatten()
        .filter_map(extract_entry)
        .collect();

    debug!("Extracted {} tweets from search payload", mentions.len());
    mentions
}

fn typename(value: &Value) -> Option<&str> {
    value.get("__typename").and_then(Value::as_str)
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn extract_entry(entry: &Value) -> Option<NormalizedMention> {
    let content = entry.get("content")?;
    if typename(content)? != "TimelineTimelineItem" {
        return None;
    }
    let item = content.get("itemContent")?;
    if typename(item)? != "TimelineTweet" {
        return None;
    }
    let tweet = item.get("tweet_results")?.get("result")?;
    if typename(tweet)? != "Tweet" {
        return None;
    }

    let null = Value::Null;
    let legacy = tweet.get("legacy").unwrap_or(&null);
    let user = tweet
        .get("core")
        .and_then(|c| c.get("user_results"))
        .and_then(|u| u.get("result"))
        .and_then(|r| r.get("legacy"))
        .unwrap_or(&null);

    let mentioned_users = legacy
        .get("entities")
        .and_then(|e| e.get("user_mentions"))
        .and_then(Value::as_array)
        .map(|mentions| {
            mentions
                .iter()
                .map(|m| MentionedUser {
                    id: str_field(m, "id_str"),
                    screen_name: str_field(m, "screen_name"),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(NormalizedMention {
        id: str_field(legacy, "id_str"),
        created_at: str_field(legacy, "created_at"),
        full_text: str_field(legacy, "full_text"),
        author_id: str_field(legacy, "user_id_str"),
        author_screen_name: str_field(user, "screen_name"),
        mentioned_users,
    })
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::fixtures::{payload, tweet_entry};
    use super::*;

    #[test]
    fn test_extracts_well_formed_tweet() {
        let body = payload(vec![tweet_entry(
            "1",
            "Wed Feb 19 19:48:22 +0000 2025",
            "@target hi there",
            &[("222", "target")],
        )]);

        let mentions = extract_mentions(&body);
        assert_eq!(mentions.len(), 1);
        let m = &mentions[0];
        assert_eq!(m.id, "1");
        assert_eq!(m.created_at, "Wed Feb 19 19:48:22 +0000 2025");
        assert_eq!(m.full_text, "@target hi there");
        assert_eq!(m.author_id, "111");
        assert_eq!(m.author_screen_name, "author");
        assert_eq!(
            m.mentioned_users,
            vec![MentionedUser {
                id: "222".to_string(),
                screen_name: "target".to_string()
            }]
        );
    }

    #[test]
    fn test_skips_entries_failing_type_guards() {
        let mut cursor = tweet_entry("2", "x", "y", &[]);
        cursor["content"]["__typename"] = json!("TimelineTimelineCursor");
        let mut tombstone = tweet_entry("3", "x", "y", &[]);
        tombstone["content"]["itemContent"]["tweet_results"]["result"]["__typename"] =
            json!("TweetTombstone");
        let good = tweet_entry("4", "x", "y", &[]);

        let mentions = extract_mentions(&payload(vec![cursor, tombstone, good]));
        let ids: Vec<&str> = mentions.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["4"]);
    }

    #[test]
    fn test_unrecognized_payload_yields_nothing() {
        assert!(extract_mentions(&json!({ "errors": ["nope"] })).is_empty());
        assert!(extract_mentions(&json!({ "result": { "timeline": { "instructions": "bad" } } })).is_empty());
        assert!(extract_mentions(&json!(null)).is_empty());
    }

    #[tokio::test]
    async fn test_search_sends_proxy_headers() {
        let mut server = mockito::Server::new_async().await;
        let body = payload(vec![tweet_entry("9", "x", "hello", &[])]);
        let mock = server
            .mock("GET", "/search-v2")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("query".into(), "@target".into()),
                mockito::Matcher::UrlEncoded("count".into(), "20".into()),
                mockito::Matcher::UrlEncoded("type".into(), "Latest".into()),
            ]))
            .match_header("x-rapidapi-key", "rk")
            .match_header("x-rapidapi-host", "proxy.example")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = SearchClient::new(
            SearchCredentials::new("rk", "proxy.example").unwrap(),
            Duration::from_secs(5),
            3,
        )
        .unwrap()
        .with_endpoint(format!("{}/search-v2", server.url()));

        let handle = MonitoredHandle::new("@target").unwrap();
        let mentions = client.search(&handle).await.unwrap();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].id, "9");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_error_status_yields_no_mentions() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/search-v2")
            .match_query(mockito::Matcher::Any)
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let client = SearchClient::new(
            SearchCredentials::new("rk", "proxy.example").unwrap(),
            Duration::from_secs(5),
            3,
        )
        .unwrap()
        .with_endpoint(format!("{}/search-v2", server.url()));

        let handle = MonitoredHandle::new("target").unwrap();
        assert!(client.search(&handle).await.unwrap().is_empty());
    }

    fn client_for(url: &str, max_retries: u32) -> SearchClient {
        SearchClient::new(
            SearchCredentials::new("rk", "proxy.example").unwrap(),
            Duration::from_secs(5),
            max_retries,
        )
        .unwrap()
        .with_endpoint(format!("{}/search-v2", url))
    }

    #[tokio::test]
    async fn test_non_json_body_yields_no_mentions() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/search-v2")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html>upstream proxy page</html>")
            .create_async()
            .await;

        let handle = MonitoredHandle::new("@target").unwrap();
        let mentions = client_for(&server.url(), 3).search(&handle).await.unwrap();
        assert!(mentions.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_proxy_yields_no_mentions() {
        let handle = MonitoredHandle::new("@target").unwrap();
        let mentions = client_for("http://127.0.0.1:1", 3).search(&handle).await.unwrap();
        assert!(mentions.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_search_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("GET", "/search-v2")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .expect(1)
            .create_async()
            .await;
        let body = payload(vec![tweet_entry("5", "x", "@target hi", &[("222", "target")])]);
        let ok = server
            .mock("GET", "/search-v2")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect(1)
            .create_async()
            .await;

        let handle = MonitoredHandle::new("@target").unwrap();
        let started = std::time::Instant::now();
        let mentions = client_for(&server.url(), 3).search(&handle).await.unwrap();

        // 2^0 * 2 seconds before the second request.
        assert!(started.elapsed() >= Duration::from_secs(2));
        let ids: Vec<&str> = mentions.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["5"]);
        limited.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_retries_run_out() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("GET", "/search-v2")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .expect(2)
            .create_async()
            .await;

        let handle = MonitoredHandle::new("@target").unwrap();
        let mentions = client_for(&server.url(), 1).search(&handle).await.unwrap();

        assert!(mentions.is_empty());
        limited.assert_async().await;
    }
}
