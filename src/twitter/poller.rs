use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::dispatch::{PostTransport, ReplyDispatcher};
use super::filter::filter_mentions;
use super::search::MentionSource;
use super::{truncate_for_post, MonitoredHandle, NormalizedMention};
use crate::llm::TextGenerator;
use crate::prompts::mention_fallback_reply;

const INTER_HANDLE_DELAY: Duration = Duration::from_secs(1);

/// Search, filter, answer, sleep; once per handle per cycle, strictly in
/// order. Runs until cancelled.
pub struct MentionPoller<S, T> {
    source: S,
    dispatcher: ReplyDispatcher<T>,
    generator: Arc<dyn TextGenerator>,
    handles: Vec<MonitoredHandle>,
    polling_interval: u64,
}

impl<S: MentionSource, T: PostTransport> MentionPoller<S, T> {
    pub fn new(
        source: S,
        dispatcher: ReplyDispatcher<T>,
        generator: Arc<dyn TextGenerator>,
        handles: Vec<MonitoredHandle>,
        polling_interval: u64,
    ) -> Result<Self> {
        if handles.is_empty() {
            anyhow::bail!("No accounts to monitor");
        }
        if polling_interval == 0 {
            anyhow::bail!("Polling interval must be at least 1 second");
        }
        info!(
            accounts = ?handles.iter().map(|h| h.as_str()).collect::<Vec<_>>(),
            "Mention poller initialized - monitoring mentions for accounts"
        );
        Ok(Self {
            source,
            dispatcher,
            generator,
            handles,
            polling_interval,
        })
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!("Starting Twitter monitoring bot");
        let interval = Duration::from_secs(self.polling_interval);

        loop {
            let pause = match self.poll_cycle(&cancel).await {
                Ok(()) => {
                    debug!("Completed mention check cycle, sleeping for {:?}", interval);
                    interval
                }
                Err(e) => {
                    error!("Error in monitoring loop: {:#}", e);
                    interval * 2
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Twitter monitoring stopped");
    }

    /// One pass over every monitored handle. A failed search skips only its
    /// own handle; the cycle fails when every search failed.
    pub async fn poll_cycle(&self, cancel: &CancellationToken) -> Result<()> {
        let mut failed = 0;
        for handle in &self.handles {
            if cancel.is_cancelled() {
                return Ok(());
            }

            debug!(handle = %handle, "Searching for mentions");
            match self.source.search(handle).await {
                Ok(found) => {
                    let fresh = filter_mentions(found, handle, Utc::now(), self.polling_interval);
                    if fresh.is_empty() {
                        debug!(handle = %handle, "No new mentions found");
                    } else {
                        info!(handle = %handle, "Found {} new mentions", fresh.len());
                        for mention in &fresh {
                            self.handle_mention(mention).await;
                        }
                    }
                }
                Err(e) => {
                    error!(handle = %handle, "Search for mentions failed: {:#}", e);
                    failed += 1;
                }
            }

            if self.handles.len() > 1 {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(INTER_HANDLE_DELAY) => {}
                }
            }
        }

        if failed == self.handles.len() {
            anyhow::bail!("Mention search failed for all {} handles", failed);
        }
        Ok(())
    }

    /// Generate and post a reply to one mention. Generation failures are
    /// answered with a fixed apology. Returns the id of the posted reply.
    pub async fn handle_mention(&self, mention: &NormalizedMention) -> Option<String> {
        let prompt = strip_mentions(mention);

        let reply = match self.generator.generate(&prompt, None).await {
            Ok(generated) => truncate_for_post(&generated.text),
            Err(e) => {
                error!(tweet_id = %mention.id, "Error generating AI response: {:#}", e);
                mention_fallback_reply(author_username(mention))
            }
        };

        self.dispatcher.reply(&reply, &mention.id).await
    }
}

/// Screen name of the author if they appear among the mentioned users.
fn author_username(mention: &NormalizedMention) -> &str {
    mention
        .mentioned_users
        .iter()
        .find(|u| !u.id.is_empty() && u.id == mention.author_id)
        .map(|u| u.screen_name.as_str())
        .unwrap_or("user")
}

fn strip_mentions(mention: &NormalizedMention) -> String {
    mention
        .mentioned_users
        .iter()
        .filter(|u| !u.screen_name.is_empty())
        .fold(mention.full_text.clone(), |text, user| {
            text.replace(&format!("@{}", user.screen_name), "")
                .trim()
                .to_string()
        })
}
