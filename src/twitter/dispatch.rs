use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::oauth::RequestSigner;
use super::Credentials;

/// Body of `POST /tweets`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PostRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyTarget>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReplyTarget {
    pub in_reply_to_tweet_id: String,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug)]
pub enum SendError {
    Timeout,
    Other(anyhow::Error),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Timeout => write!(f, "request timed out"),
            SendError::Other(e) => write!(f, "{:#}", e),
        }
    }
}

/// One signed attempt at the write endpoint.
#[async_trait]
pub trait PostTransport: Send + Sync {
    async fn send(&self, request: &PostRequest) -> Result<ApiResponse, SendError>;
}

/// Reqwest transport that signs every attempt with a fresh nonce.
pub struct HttpTransport {
    client: reqwest::Client,
    signer: RequestSigner,
    url: String,
}

impl HttpTransport {
    pub fn new(credentials: Credentials, api_base: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Twitter HTTP client")?;
        Ok(Self {
            client,
            signer: RequestSigner::new(credentials),
            url: format!("{}/tweets", api_base.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl PostTransport for HttpTransport {
    async fn send(&self, request: &PostRequest) -> Result<ApiResponse, SendError> {
        let authorization = self
            .signer
            .sign("POST", &self.url, &[])
            .map_err(SendError::Other)?;

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", authorization)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendError::Timeout
                } else {
                    SendError::Other(e.into())
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                SendError::Timeout
            } else {
                SendError::Other(e.into())
            }
        })?;
        Ok(ApiResponse { status, body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Server(u16),
    RateLimited,
    Timeout,
    Unexpected,
}

impl Failure {
    /// `2^attempt * base`, where the base depends on the failure.
    fn backoff(self, attempt: u32) -> Duration {
        let base = match self {
            Failure::Server(_) => 2,
            Failure::RateLimited => 10,
            Failure::Timeout => 5,
            Failure::Unexpected => 3,
        };
        Duration::from_secs(2u64.saturating_pow(attempt).saturating_mul(base))
    }
}

#[derive(Deserialize)]
struct CreatedPost {
    data: CreatedPostData,
}

#[derive(Deserialize)]
struct CreatedPostData {
    id: String,
}

/// Posts and replies with bounded exponential backoff. At most
/// `max_retries + 1` attempts are made per call; failures come back as
/// `None`, never as errors. A cancelled token cuts the backoff short.
pub struct ReplyDispatcher<T> {
    transport: T,
    max_retries: u32,
    cancel: CancellationToken,
}

impl ReplyDispatcher<HttpTransport> {
    pub fn from_credentials(
        credentials: Credentials,
        api_base: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(
            HttpTransport::new(credentials, api_base, timeout)?,
            max_retries,
        ))
    }
}

impl<T: PostTransport> ReplyDispatcher<T> {
    pub fn new(transport: T, max_retries: u32) -> Self {
        Self {
            transport,
            max_retries,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon pending retries once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Publish a standalone post. Returns the new post id.
    pub async fn post(&self, text: &str) -> Option<String> {
        let request = PostRequest {
            text: text.to_string(),
            reply: None,
        };
        self.send_with_retry(&request, "tweet").await
    }

    pub async fn reply(&self, text: &str, in_reply_to: &str) -> Option<String> {
        let request = PostRequest {
            text: text.to_string(),
            reply: Some(ReplyTarget {
                in_reply_to_tweet_id: in_reply_to.to_string(),
            }),
        };
        self.send_with_retry(&request, "reply").await
    }

    async fn send_with_retry(&self, request: &PostRequest, kind: &str) -> Option<String> {
        for attempt in 0..=self.max_retries {
            let failure = match self.transport.send(request).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    return match serde_json::from_str::<CreatedPost>(&response.body) {
                        Ok(created) => {
                            info!(post_id = %created.data.id, "Posted {} successfully", kind);
                            Some(created.data.id)
                        }
                        Err(e) => {
                            error!("Posted {} but could not read its id: {}", kind, e);
                            None
                        }
                    };
                }
                Ok(response) if response.status >= 500 => Failure::Server(response.status),
                Ok(response) if response.status == 429 => Failure::RateLimited,
                Ok(response) => {
                    error!("Failed to post {}, status {}: {}", kind, response.status, response.body);
                    return None;
                }
                Err(SendError::Timeout) => Failure::Timeout,
                Err(SendError::Other(e)) => {
                    warn!("Unexpected error posting {}: {:#}", kind, e);
                    Failure::Unexpected
                }
            };

            if attempt == self.max_retries {
                error!(
                    "Failed to post {} after {} retries (last failure: {:?})",
                    kind, self.max_retries, failure
                );
                return None;
            }

            let delay = failure.backoff(attempt);
            warn!(
                retry = attempt + 1,
                max_retries = self.max_retries,
                "Twitter API {:?} while posting {}, retrying in {:?}",
                failure,
                kind,
                delay
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!("Shutdown requested, abandoning {} after {} attempts", kind, attempt + 1);
                    return None;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        None
    }
}
