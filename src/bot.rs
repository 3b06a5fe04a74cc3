use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, TelegramConfig, TwitterConfig};
use crate::llm::{LlmClient, TextGenerator};
use crate::platform::session::ChatSessionHandler;
use crate::platform::telegram::{self, TelegramChannel};
use crate::platform::AccessControlList;
use crate::twitter::dispatch::{HttpTransport, ReplyDispatcher};
use crate::twitter::poller::MentionPoller;
use crate::twitter::search::SearchClient;
use crate::twitter::{monitored_handles, Credentials, SearchCredentials};

type TwitterPoller = MentionPoller<SearchClient, HttpTransport>;

/// What a channel task hands back when it ends.
type BotExit = (&'static str, Result<()>);

/// Build the Twitter mention poller from config. Fails when credentials are
/// incomplete or no account is configured.
fn build_twitter_poller(
    config: &TwitterConfig,
    generator: Arc<dyn TextGenerator>,
    cancel: CancellationToken,
) -> Result<TwitterPoller> {
    let handles = monitored_handles(&config.accounts_to_monitor);
    if handles.is_empty() {
        anyhow::bail!("No accounts to monitor configured");
    }

    let timeout = Duration::from_secs(config.request_timeout_secs);
    let credentials = Credentials::from_config(config)?;
    let search_credentials = SearchCredentials::new(&config.rapidapi_key, &config.rapidapi_host)?;

    let source = SearchClient::new(search_credentials, timeout, config.max_retries)?;
    let dispatcher =
        ReplyDispatcher::from_credentials(credentials, &config.api_base, timeout, config.max_retries)?
            .with_cancellation(cancel);

    MentionPoller::new(source, dispatcher, generator, handles, config.polling_interval)
}

fn build_telegram(
    config: &TelegramConfig,
    generator: Arc<dyn TextGenerator>,
) -> Result<(Bot, Arc<telegram::TelegramSession>)> {
    if config.bot_token.trim().is_empty() {
        anyhow::bail!("Telegram bot token not provided");
    }

    let bot = Bot::new(&config.bot_token);
    let acl = AccessControlList::new(config.allowed_user_ids.iter().copied());
    let session = ChatSessionHandler::new(TelegramChannel::new(bot.clone()), generator, acl);
    Ok((bot, Arc::new(session)))
}

/// Start every enabled channel and run until Ctrl-C or until every channel
/// has stopped on its own.
pub async fn run(config: Config) -> Result<()> {
    let generator: Arc<dyn TextGenerator> =
        Arc::new(LlmClient::new(config.llm.clone()).context("Failed to create LLM client")?);

    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<BotExit> = JoinSet::new();

    if config.twitter.enabled && config.twitter.accounts_to_monitor.is_empty() {
        warn!("Twitter enabled but no accounts to monitor, not starting the poller");
    } else if config.twitter.enabled {
        match build_twitter_poller(&config.twitter, generator.clone(), cancel.clone()) {
            Ok(poller) => {
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    poller.run(cancel).await;
                    ("twitter", Ok(()))
                });
                info!("Twitter bot started");
            }
            Err(e) => error!("Twitter bot not started: {:#}", e),
        }
    } else {
        info!("Twitter bot disabled");
    }

    if config.telegram.enabled {
        match build_telegram(&config.telegram, generator.clone()) {
            Ok((bot, session)) => {
                let cancel = cancel.clone();
                tasks.spawn(async move { ("telegram", telegram::run(bot, session, cancel).await) });
                info!("Telegram bot started");
            }
            Err(e) => error!("Telegram bot not started: {:#}", e),
        }
    } else {
        info!("Telegram bot disabled");
    }

    if tasks.is_empty() {
        anyhow::bail!("No bots could be started");
    }
    info!("{} bot(s) running, press Ctrl-C to stop", tasks.len());

    supervise(tasks, cancel, shutdown_signal()).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C, bots will run until they stop: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Wait for `shutdown` while any bot is still running. A bot that stops on
/// its own is reported and the others keep going. On shutdown, or once
/// none are left, `cancel` fires and every remaining task is joined.
async fn supervise<F>(mut tasks: JoinSet<BotExit>, cancel: CancellationToken, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            finished = tasks.join_next() => {
                let Some(finished) = finished else { break };
                report(finished);
                if tasks.is_empty() {
                    warn!("All bots have stopped");
                    break;
                }
                info!("{} bot(s) still running", tasks.len());
            }
        }
    }

    cancel.cancel();
    while let Some(finished) = tasks.join_next().await {
        report(finished);
    }
    info!("All bots stopped");
}

fn report(finished: Result<BotExit, tokio::task::JoinError>) {
    match finished {
        Ok((name, Ok(()))) => info!("{} bot stopped", name),
        Ok((name, Err(e))) => error!("{} bot failed: {:#}", name, e),
        Err(e) => error!("Bot task panicked: {}", e),
    }
}
