use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, MessageEntityKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::session::{ChatChannel, ChatSessionHandler};
use super::{Author, BotIdentity, ChatKind, ChatMessage, ChatRef, EntityKind, MessageEntity, ReplyTo};

/// [`ChatChannel`] backed by the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramChannel {
    bot: Bot,
}

impl TelegramChannel {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatChannel for TelegramChannel {
    async fn fetch_identity(&self) -> Result<BotIdentity> {
        let me = self.bot.get_me().await?;
        Ok(BotIdentity {
            id: me.user.id.0,
            username: me.username().to_string(),
            first_name: me.user.first_name.clone(),
        })
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await?;
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(())
    }
}

pub type TelegramSession = ChatSessionHandler<TelegramChannel>;

/// Convert a Telegram update message into the channel-agnostic form.
pub fn to_chat_message(msg: &Message) -> ChatMessage {
    let kind = if msg.chat.is_private() {
        ChatKind::Private
    } else if msg.chat.is_supergroup() {
        ChatKind::Supergroup
    } else if msg.chat.is_channel() {
        ChatKind::Channel
    } else {
        ChatKind::Group
    };

    let entities = msg
        .entities()
        .unwrap_or_default()
        .iter()
        .map(|e| MessageEntity {
            kind: match e.kind {
                MessageEntityKind::Mention => EntityKind::Mention,
                _ => EntityKind::Other,
            },
            offset: e.offset,
            length: e.length,
        })
        .collect();

    let reply_to = msg.reply_to_message().map(|r| ReplyTo {
        author_id: r.from.as_ref().map(|u| u.id.0),
        text: r.text().map(str::to_string),
    });

    ChatMessage {
        text: msg.text().map(str::to_string),
        entities,
        reply_to,
        chat: ChatRef {
            id: msg.chat.id.0,
            kind,
        },
        author: msg.from.as_ref().map(|u| Author {
            id: u.id.0,
            name: u.first_name.clone(),
        }),
    }
}

/// Run the Telegram long-polling dispatcher until `cancel` fires.
pub async fn run(bot: Bot, session: Arc<TelegramSession>, cancel: CancellationToken) -> Result<()> {
    info!("Starting Telegram platform...");

    // Resolve the identity up front so the first message does not pay for it.
    if let Err(e) = session.identity().await {
        warn!("Failed to get bot info at startup, will retry on first message: {:#}", e);
    }

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_channel_post().endpoint(handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![session])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build();

    let shutdown = dispatcher.shutdown_token();
    let watcher = tokio::spawn(async move {
        cancel.cancelled().await;
        info!("Stopping Telegram dispatcher");
        match shutdown.shutdown() {
            Ok(stopped) => stopped.await,
            Err(e) => warn!("Telegram dispatcher was not running: {:?}", e),
        }
    });

    dispatcher.dispatch().await;
    watcher.abort();

    info!("Telegram platform stopped");
    Ok(())
}

async fn handle_message(msg: Message, session: Arc<TelegramSession>) -> ResponseResult<()> {
    let message = to_chat_message(&msg);
    if let Err(e) = session.handle(&message).await {
        error!(chat_id = message.chat.id, "Error handling Telegram message: {:#}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_group_message_conversion() {
        let msg = parse(serde_json::json!({
            "message_id": 10,
            "date": 1_700_000_000,
            "chat": { "id": -1001, "type": "supergroup", "title": "Community" },
            "from": { "id": 7, "is_bot": false, "first_name": "Ada" },
            "text": "hello @bot how are you",
            "entities": [{ "type": "mention", "offset": 6, "length": 4 }]
        }));

        let converted = to_chat_message(&msg);
        assert_eq!(converted.chat, ChatRef { id: -1001, kind: ChatKind::Supergroup });
        assert_eq!(converted.text.as_deref(), Some("hello @bot how are you"));
        assert_eq!(
            converted.entities,
            vec![MessageEntity { kind: EntityKind::Mention, offset: 6, length: 4 }]
        );
        assert_eq!(converted.author, Some(Author { id: 7, name: "Ada".to_string() }));
        assert!(converted.reply_to.is_none());
    }

    #[test]
    fn test_channel_post_conversion() {
        let msg = parse(serde_json::json!({
            "message_id": 12,
            "date": 1_700_000_000,
            "chat": { "id": -1002, "type": "channel", "title": "Announcements" },
            "sender_chat": { "id": -1002, "type": "channel", "title": "Announcements" },
            "text": "@bot what changed?"
        }));

        let converted = to_chat_message(&msg);
        assert_eq!(converted.chat, ChatRef { id: -1002, kind: ChatKind::Channel });
        assert!(converted.chat.kind.is_multi_party());
        assert!(converted.author.is_none());
    }

    #[test]
    fn test_private_message_conversion() {
        let msg = parse(serde_json::json!({
            "message_id": 11,
            "date": 1_700_000_000,
            "chat": { "id": 7, "type": "private", "first_name": "Ada" },
            "from": { "id": 7, "is_bot": false, "first_name": "Ada" },
            "text": "gm"
        }));

        let converted = to_chat_message(&msg);
        assert_eq!(converted.chat.kind, ChatKind::Private);
        assert!(converted.entities.is_empty());
    }
}
