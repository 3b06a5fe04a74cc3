pub mod dispatch;
pub mod filter;
pub mod oauth;
pub mod poller;
pub mod search;

use anyhow::Result;

use crate::config::TwitterConfig;

/// Replies are cut to this many characters.
pub const MAX_POST_CHARS: usize = 280;

/// OAuth 1.0a user-context credentials for the write API.
#[derive(Clone)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

impl Credentials {
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        access_token: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Result<Self> {
        let creds = Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            access_token: access_token.into(),
            access_secret: access_secret.into(),
        };

        let missing: Vec<&str> = [
            ("api_key", &creds.consumer_key),
            ("api_secret", &creds.consumer_secret),
            ("access_token", &creds.access_token),
            ("access_secret", &creds.access_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            anyhow::bail!(
                "Required Twitter API credentials not provided: {}",
                missing.join(", ")
            );
        }
        Ok(creds)
    }

    pub fn from_config(config: &TwitterConfig) -> Result<Self> {
        Self::new(
            config.api_key.as_str(),
            config.api_secret.as_str(),
            config.access_token.as_str(),
            config.access_secret.as_str(),
        )
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .finish_non_exhaustive()
    }
}

/// Key and host for the third-party search proxy.
#[derive(Clone)]
pub struct SearchCredentials {
    pub api_key: String,
    pub host: String,
}

impl SearchCredentials {
    pub fn new(api_key: impl Into<String>, host: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        let host = host.into();
        if api_key.trim().is_empty() {
            anyhow::bail!("RapidAPI key not provided");
        }
        if host.trim().is_empty() {
            anyhow::bail!("RapidAPI host not provided");
        }
        Ok(Self { api_key, host })
    }
}

/// An `@`-prefixed account handle, compared case-insensitively.
#[derive(Debug, Clone)]
pub struct MonitoredHandle(String);

impl MonitoredHandle {
    pub fn new(raw: &str) -> Option<Self> {
        let name = raw.trim().trim_start_matches('@');
        if name.is_empty() {
            return None;
        }
        Some(Self(format!("@{}", name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches_screen_name(&self, screen_name: &str) -> bool {
        self.0[1..].eq_ignore_ascii_case(screen_name)
    }
}

impl PartialEq for MonitoredHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for MonitoredHandle {}

impl std::fmt::Display for MonitoredHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the ordered handle set: first occurrence wins, blanks are dropped.
pub fn monitored_handles<S: AsRef<str>>(raw: &[S]) -> Vec<MonitoredHandle> {
    let mut handles: Vec<MonitoredHandle> = Vec::with_capacity(raw.len());
    for handle in raw.iter().filter_map(|r| MonitoredHandle::new(r.as_ref())) {
        if !handles.contains(&handle) {
            handles.push(handle);
        }
    }
    handles
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionedUser {
    pub id: String,
    pub screen_name: String,
}

/// A tweet found by the search proxy, flattened to the fields we use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMention {
    pub id: String,
    /// Platform format, e.g. `Wed Feb 19 19:48:22 +0000 2025`.
    pub created_at: String,
    pub full_text: String,
    pub author_id: String,
    pub author_screen_name: String,
    pub mentioned_users: Vec<MentionedUser>,
}

/// Cut `text` to [`MAX_POST_CHARS`] characters, ending in `...` when cut.
pub fn truncate_for_post(text: &str) -> String {
    if text.chars().count() <= MAX_POST_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_POST_CHARS - 3).collect();
    cut.push_str("...");
    cut
}
