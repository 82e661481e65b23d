use async_trait::async_trait;

use relay_types::{ChatId, MessageRef, PromptHandle, UserId};

use crate::prompt::Prompt;

/// Outbound capabilities the relay needs from the chat platform.
///
/// Errors are plain `anyhow` errors: the relay only records or relays their
/// text, it never branches on them.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Copy `source` into `to` without a forward header.
    async fn copy_message(&self, to: ChatId, source: MessageRef) -> anyhow::Result<()>;

    /// Send an interactive prompt into the user's private chat with the bot.
    /// Fails when the user never opened that chat.
    async fn send_prompt(&self, user: UserId, prompt: &Prompt) -> anyhow::Result<PromptHandle>;

    /// Re-render an existing prompt in place.
    async fn update_prompt(&self, handle: PromptHandle, prompt: &Prompt) -> anyhow::Result<()>;

    async fn send_text(&self, chat: ChatId, text: &str) -> anyhow::Result<()>;

    /// Acknowledge a button press, optionally with a short notice for the presser.
    async fn acknowledge(&self, interaction_id: &str, notice: Option<&str>) -> anyhow::Result<()>;

    /// Title of a chat the bot is a member of.
    async fn chat_title(&self, chat: ChatId) -> anyhow::Result<Option<String>>;
}
