use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, warn};

use super::mention::{self, MatchKind};
use super::{AccessControlList, BotIdentity, ChatKind, ChatMessage};
use crate::llm::TextGenerator;
use crate::prompts::{CHAT_FALLBACK_REPLY, UNAUTHORIZED_REPLY};

const HELP_TEXT: &str = "I answer questions about the project, its network and its community.\n\n\
     Commands:\n\
     /start - Start the conversation\n\
     /help - Show this help message\n\
     /debug - Show diagnostic information\n\n\
     In groups, mention me or reply to one of my messages.";

/// Outbound half of a chat platform.
#[async_trait]
pub trait ChatChannel: Send + Sync {
    async fn fetch_identity(&self) -> Result<BotIdentity>;
    async fn send_typing(&self, chat_id: i64) -> Result<()>;
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// No text or no author.
    Skipped,
    /// Multi-party message not addressed to the bot.
    NotAddressed,
    /// Sender is outside the allow list.
    Denied,
    Command,
    Replied,
    /// Generation failed and the apology was sent instead.
    Fallback,
}

/// Handles one inbound chat message at a time: mention detection, access
/// control, typing indicator, generation and reply.
pub struct ChatSessionHandler<C> {
    channel: C,
    generator: Arc<dyn TextGenerator>,
    acl: AccessControlList,
    identity: OnceCell<BotIdentity>,
    last_processed: Mutex<HashMap<i64, DateTime<Utc>>>,
}

impl<C: ChatChannel> ChatSessionHandler<C> {
    pub fn new(channel: C, generator: Arc<dyn TextGenerator>, acl: AccessControlList) -> Self {
        if acl.is_restricted() {
            info!("Chat handler initialized with access restrictions");
        } else {
            info!("Chat handler initialized without access restrictions (public bot)");
        }
        Self {
            channel,
            generator,
            acl,
            identity: OnceCell::new(),
            last_processed: Mutex::new(HashMap::new()),
        }
    }

    /// The bot's own identity, fetched on first use and cached afterwards.
    pub async fn identity(&self) -> Result<&BotIdentity> {
        self.identity
            .get_or_try_init(|| async {
                let me = self.channel.fetch_identity().await?;
                info!(
                    "Resolved bot identity: @{} ({}, id {})",
                    me.username, me.first_name, me.id
                );
                Ok(me)
            })
            .await
    }

    pub async fn last_processed(&self, chat_id: i64) -> Option<DateTime<Utc>> {
        self.last_processed.lock().await.get(&chat_id).copied()
    }

    pub async fn handle(&self, message: &ChatMessage) -> Result<SessionOutcome> {
        let identity = self.identity().await?;

        let (Some(text), Some(author)) = (message.text.as_deref(), message.author.as_ref()) else {
            debug!("Skipping message without text or sender");
            return Ok(SessionOutcome::Skipped);
        };
        let chat_id = message.chat.id;
        let kind = message.chat.kind;

        info!(
            user_id = author.id,
            chat_id,
            chat_kind = ?kind,
            entities = message.entities.len(),
            "Received message"
        );

        match parse_command(text, &identity.username) {
            Some(Command::Unknown) => {
                debug!(chat_id, user_id = author.id, "Ignoring unknown command");
                return Ok(SessionOutcome::Skipped);
            }
            Some(command) => {
                return self.handle_command(command, chat_id, kind, author.id, &author.name).await;
            }
            None => {}
        }

        let detection = mention::detect(
            text,
            &message.entities,
            message.reply_to.as_ref(),
            identity,
            kind,
        );
        if kind.is_multi_party() {
            info!(
                addressed = detection.addressed,
                matched = ?detection.matched,
                chat_id,
                "Group mention detection result"
            );
        }
        if !detection.addressed {
            debug!(chat_id, user_id = author.id, "Ignoring group message (not mentioned)");
            return Ok(SessionOutcome::NotAddressed);
        }

        if !self.acl.is_allowed(author.id) {
            warn!(user_id = author.id, chat_id, group = kind.is_multi_party(), "Unauthorized message");
            if detection.matched == Some(MatchKind::Direct) {
                self.channel.send_text(chat_id, UNAUTHORIZED_REPLY).await?;
            }
            return Ok(SessionOutcome::Denied);
        }

        if let Err(e) = self.channel.send_typing(chat_id).await {
            warn!(chat_id, "Failed to send typing indicator: {:#}", e);
        }

        match self.generator.generate(&detection.text, None).await {
            Ok(generated) => {
                self.last_processed.lock().await.insert(chat_id, Utc::now());
                self.channel.send_text(chat_id, &generated.text).await?;
                info!(chat_id, user_id = author.id, "Sent AI response");
                Ok(SessionOutcome::Replied)
            }
            Err(e) => {
                error!("Error generating AI response: {:#}", e);
                self.channel.send_text(chat_id, CHAT_FALLBACK_REPLY).await?;
                Ok(SessionOutcome::Fallback)
            }
        }
    }

    async fn handle_command(
        &self,
        command: Command,
        chat_id: i64,
        kind: ChatKind,
        user_id: u64,
        first_name: &str,
    ) -> Result<SessionOutcome> {
        if command == Command::Debug {
            let identity = self.identity().await?;
            warn!(user_id, chat_id, chat_kind = ?kind, "Debug command received");
            let report = format!(
                "Debug info:\n\
                 - Bot username: {}\n\
                 - Bot ID: {}\n\
                 - Chat type: {}\n\
                 - Chat ID: {}\n\
                 - Message received successfully!",
                identity.username,
                identity.id,
                kind.as_str(),
                chat_id
            );
            self.channel.send_text(chat_id, &report).await?;
            return Ok(SessionOutcome::Command);
        }

        if !self.acl.is_allowed(user_id) {
            warn!(user_id, ?command, "Unauthorized command");
            self.channel.send_text(chat_id, UNAUTHORIZED_REPLY).await?;
            return Ok(SessionOutcome::Denied);
        }

        match command {
            Command::Start => {
                let greeting = format!(
                    "Hello {}! Ask me anything about the network, its oracles or the wider ecosystem.",
                    first_name
                );
                self.channel.send_text(chat_id, &greeting).await?;
            }
            Command::Help => {
                self.channel.send_text(chat_id, HELP_TEXT).await?;
            }
            Command::Debug | Command::Unknown => {}
        }
        info!(user_id, ?command, "Command handled");
        Ok(SessionOutcome::Command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Help,
    Debug,
    Unknown,
}

/// Parse `/cmd` or `/cmd@botname`. Commands addressed to another bot are
/// not commands for us.
fn parse_command(text: &str, bot_username: &str) -> Option<Command> {
    let head = text.trim_start().strip_prefix('/')?.split_whitespace().next()?;
    let (name, target) = match head.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (head, None),
    };
    if target.is_some_and(|t| !t.eq_ignore_ascii_case(bot_username)) {
        return None;
    }
    Some(match name {
        "start" => Command::Start,
        "help" => Command::Help,
        "debug" => Command::Debug,
        _ => Command::Unknown,
    })
}
