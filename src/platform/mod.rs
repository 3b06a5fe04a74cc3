pub mod mention;
pub mod session;
pub mod telegram;

use std::collections::HashSet;

/// Kind of conversation a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    /// Group, supergroup and channel chats need an explicit mention or reply.
    pub fn is_multi_party(self) -> bool {
        !matches!(self, ChatKind::Private)
    }

    /// Name as the chat platform spells it.
    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Mention,
    Other,
}

/// A formatting span on the message text. Offsets and lengths are in UTF-16
/// code units, as the chat platform reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTo {
    pub author_id: Option<u64>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRef {
    pub id: i64,
    pub kind: ChatKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: u64,
    pub name: String,
}

/// One inbound chat message, built per update and consumed once.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub text: Option<String>,
    pub entities: Vec<MessageEntity>,
    pub reply_to: Option<ReplyTo>,
    pub chat: ChatRef,
    pub author: Option<Author>,
}

/// The bot's own account, resolved once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: u64,
    pub username: String,
    pub first_name: String,
}

/// Users allowed to talk to the bot. An empty list allows everyone.
#[derive(Debug, Clone, Default)]
pub struct AccessControlList {
    allowed: HashSet<u64>,
}

impl AccessControlList {
    pub fn new(allowed: impl IntoIterator<Item = u64>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn is_restricted(&self) -> bool {
        !self.allowed.is_empty()
    }

    pub fn is_allowed(&self, user_id: u64) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_acl_allows_everyone() {
        let acl = AccessControlList::default();
        assert!(!acl.is_restricted());
        assert!(acl.is_allowed(1));
        assert!(acl.is_allowed(u64::MAX));
    }

    #[test]
    fn test_acl_restricts_to_listed_users() {
        let acl = AccessControlList::new([7, 9]);
        assert!(acl.is_restricted());
        assert!(acl.is_allowed(7));
        assert!(!acl.is_allowed(8));
    }

    #[test]
    fn test_multi_party_kinds() {
        assert!(!ChatKind::Private.is_multi_party());
        assert!(ChatKind::Group.is_multi_party());
        assert!(ChatKind::Supergroup.is_multi_party());
        assert!(ChatKind::Channel.is_multi_party());
    }
}
