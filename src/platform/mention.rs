//! Decides whether a chat message addresses the bot.
//!
//! Direct chats are always addressed. In multi-party chats the first
//! matching rule wins: a `mention` entity naming the bot, then a literal
//! `@username` in the text, then a reply to one of the bot's messages.

use std::ops::Range;

use super::{BotIdentity, ChatKind, EntityKind, MessageEntity, ReplyTo};
use crate::prompts::EMPTY_MENTION_PROMPT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Direct,
    Entity,
    Text,
    Reply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub addressed: bool,
    /// Message text with the bot mention removed; the original text when
    /// not addressed or matched by reply.
    pub text: String,
    pub matched: Option<MatchKind>,
}

impl Detection {
    fn ignored(text: &str) -> Self {
        Self {
            addressed: false,
            text: text.to_string(),
            matched: None,
        }
    }

    fn addressed(text: String, matched: MatchKind) -> Self {
        Self {
            addressed: true,
            text,
            matched: Some(matched),
        }
    }
}

pub fn detect(
    text: &str,
    entities: &[MessageEntity],
    reply_to: Option<&ReplyTo>,
    identity: &BotIdentity,
    kind: ChatKind,
) -> Detection {
    if !kind.is_multi_party() {
        return Detection::addressed(text.to_string(), MatchKind::Direct);
    }

    if !identity.username.is_empty() {
        if let Some(range) = find_entity_mention(text, entities, &identity.username) {
            return Detection::addressed(strip_range(text, range), MatchKind::Entity);
        }

        let handle = format!("@{}", identity.username);
        if let Some(range) = find_ignore_ascii_case(text, &handle) {
            return Detection::addressed(strip_range(text, range), MatchKind::Text);
        }
    }

    let replied_to_bot = reply_to
        .and_then(|r| r.author_id)
        .is_some_and(|author| author == identity.id);
    if replied_to_bot {
        return Detection::addressed(text.to_string(), MatchKind::Reply);
    }

    Detection::ignored(text)
}

/// Byte range of the first `mention` entity whose text names `username`.
fn find_entity_mention(text: &str, entities: &[MessageEntity], username: &str) -> Option<Range<usize>> {
    entities
        .iter()
        .filter(|e| e.kind == EntityKind::Mention)
        .filter_map(|e| utf16_span_to_bytes(text, e.offset, e.length))
        .find(|range| {
            let span = &text[range.clone()];
            let name = span.strip_prefix('@').unwrap_or(span);
            name.eq_ignore_ascii_case(username)
        })
}

/// Convert a UTF-16 offset/length pair to a byte range. Spans that run past
/// the text or split a character are rejected.
fn utf16_span_to_bytes(text: &str, offset: usize, length: usize) -> Option<Range<usize>> {
    let end_units = offset.checked_add(length)?;
    let mut units = 0;
    let mut start = None;

    for (idx, ch) in text.char_indices() {
        if units == offset {
            start = Some(idx);
        }
        if units == end_units {
            return start.map(|s| s..idx);
        }
        if units > end_units {
            return None;
        }
        units += ch.len_utf16();
    }

    if units == offset {
        start = Some(text.len());
    }
    if units == end_units {
        return start.map(|s| s..text.len());
    }
    None
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<Range<usize>> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .char_indices()
        .map(|(idx, _)| idx)
        .find(|&idx| {
            haystack
                .get(idx..idx + needle.len())
                .is_some_and(|candidate| candidate.eq_ignore_ascii_case(needle))
        })
        .map(|idx| idx..idx + needle.len())
}

fn strip_range(text: &str, range: Range<usize>) -> String {
    let mut stripped = String::with_capacity(text.len());
    stripped.push_str(&text[..range.start]);
    stripped.push_str(&text[range.end..]);

    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        EMPTY_MENTION_PROMPT.to_string()
    } else {
        trimmed.to_string()
    }
}
