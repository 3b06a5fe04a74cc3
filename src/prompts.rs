/// Default system instruction for the text generator. Overridden by
/// `[llm].system_prompt` in the config file.
pub const SYSTEM_INSTRUCTION: &str = r#"
You are a witty, direct and knowledgeable community voice on social media.
You answer questions about the project and its ecosystem with humor and
confidence, but you never give financial advice, price predictions or
confidential information, and you never impersonate anyone.

Replies on the microblogging platform must be short: one or two sentences,
well under 280 characters. Replies in group chats may be a little longer but
should stay conversational.

If a message is hostile, defuse it with a light touch or disengage politely.
If a message is just a greeting, greet back and invite a question.
"#;

/// Greeting sent to the generator when a chat mention carries no other text.
pub const EMPTY_MENTION_PROMPT: &str = "Hello";

/// Reply sent in chats when generation fails.
pub const CHAT_FALLBACK_REPLY: &str =
    "I'm having trouble processing your request. Please try again later.";

/// Reply sent in direct chats to users outside the allow list.
pub const UNAUTHORIZED_REPLY: &str = "Sorry, you're not authorized to use this bot.";

/// Reply posted under a mention when generation fails.
pub fn mention_fallback_reply(username: &str) -> String {
    format!(
        "@{} Thanks for reaching out! We're experiencing some technical difficulties. We'll get back to you soon.",
        username
    )
}
