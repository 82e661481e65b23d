use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::trace;

use relay_core::ChatTransport;
use relay_core::prompt::Prompt;
use relay_types::telegram::{
    AnswerCallbackQueryRequest, ApiResponse, Chat, CopiedMessageId, CopyMessageRequest,
    EditMessageTextRequest, GetChatRequest, GetUpdatesRequest, InlineKeyboardButton,
    InlineKeyboardMarkup, Message, SendMessageRequest, SetWebhookRequest, Update, User,
};
use relay_types::{ChatId, MessageId, MessageRef, PromptHandle, UserId};

/// Update kinds the bot subscribes to.
pub const ALLOWED_UPDATES: &[&str] = &["message", "channel_post", "callback_query"];

/// Long-poll wait on the Telegram side.
pub const LONG_POLL_SECS: u64 = 30;

/// Must exceed the long-poll wait.
const HTTP_TIMEOUT: Duration = Duration::from_secs(LONG_POLL_SECS + 15);

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(reqwest::Error),

    #[error("{description} (code {code})")]
    Telegram {
        code: i64,
        description: String,
        retry_after: Option<u64>,
    },

    #[error("response had no result")]
    MissingResult,
}

impl ApiError {
    /// Seconds Telegram asked us to wait, for flood-control errors.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Telegram { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Minimal Telegram Bot API client over HTTPS/JSON.
pub struct TelegramClient {
    http: reqwest::Client,
    /// `{api_url}/bot{token}`. Never logged.
    base: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, ApiError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        trace!("Bot API call {}", method);
        // URLs carry the token; strip them from transport errors
        let response = self
            .http
            .post(format!("{}/{}", self.base, method))
            .json(params)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.without_url()))?;

        let body: ApiResponse<R> = response
            .json()
            .await
            .map_err(|e| ApiError::Http(e.without_url()))?;

        if !body.ok {
            return Err(ApiError::Telegram {
                code: body.error_code.unwrap_or_default(),
                description: body.description.unwrap_or_else(|| "unknown error".into()),
                retry_after: body.parameters.and_then(|p| p.retry_after),
            });
        }
        body.result.ok_or(ApiError::MissingResult)
    }

    pub async fn get_me(&self) -> Result<User, ApiError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ApiError> {
        self.call(
            "getUpdates",
            &GetUpdatesRequest {
                offset,
                timeout: LONG_POLL_SECS,
                allowed_updates: ALLOWED_UPDATES,
            },
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, ApiError> {
        self.call(
            "sendMessage",
            &SendMessageRequest {
                chat_id,
                text,
                reply_markup,
                reply_to_message_id: None,
            },
        )
        .await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        reply_markup: &InlineKeyboardMarkup,
    ) -> Result<(), ApiError> {
        // Returns the edited Message; only success matters here
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &EditMessageTextRequest {
                    chat_id,
                    message_id,
                    text,
                    reply_markup,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn copy_message(
        &self,
        chat_id: ChatId,
        from_chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<MessageId, ApiError> {
        let copied: CopiedMessageId = self
            .call(
                "copyMessage",
                &CopyMessageRequest {
                    chat_id,
                    from_chat_id,
                    message_id,
                },
            )
            .await?;
        Ok(copied.message_id)
    }

    pub async fn answer_callback_query(&self, id: &str, text: Option<&str>) -> Result<(), ApiError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &AnswerCallbackQueryRequest {
                    callback_query_id: id,
                    text,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn get_chat(&self, chat_id: ChatId) -> Result<Chat, ApiError> {
        self.call("getChat", &GetChatRequest { chat_id }).await
    }

    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<(), ApiError> {
        let _: bool = self
            .call(
                "setWebhook",
                &SetWebhookRequest {
                    url,
                    secret_token,
                    allowed_updates: ALLOWED_UPDATES,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn delete_webhook(&self) -> Result<(), ApiError> {
        let _: bool = self.call("deleteWebhook", &serde_json::json!({})).await?;
        Ok(())
    }
}

/// Render prompt buttons as an inline keyboard. No buttons gives an empty
/// keyboard, which removes any existing one on edit.
pub fn keyboard(prompt: &Prompt) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: prompt
            .buttons
            .iter()
            .map(|row| {
                row.iter()
                    .map(|button| InlineKeyboardButton {
                        text: button.label.clone(),
                        callback_data: button.action.to_callback_data(),
                    })
                    .collect()
            })
            .collect(),
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn copy_message(&self, to: ChatId, source: MessageRef) -> Result<()> {
        TelegramClient::copy_message(self, to, source.chat_id, source.message_id).await?;
        Ok(())
    }

    async fn send_prompt(&self, user: UserId, prompt: &Prompt) -> Result<PromptHandle> {
        let markup = keyboard(prompt);
        let message = self
            .send_message(user.private_chat(), &prompt.text, Some(&markup))
            .await?;
        Ok(PromptHandle {
            chat_id: message.chat.id,
            message_id: message.message_id,
        })
    }

    async fn update_prompt(&self, handle: PromptHandle, prompt: &Prompt) -> Result<()> {
        self.edit_message_text(handle.chat_id, handle.message_id, &prompt.text, &keyboard(prompt))
            .await?;
        Ok(())
    }

    async fn send_text(&self, chat: ChatId, text: &str) -> Result<()> {
        self.send_message(chat, text, None).await?;
        Ok(())
    }

    async fn acknowledge(&self, interaction_id: &str, notice: Option<&str>) -> Result<()> {
        self.answer_callback_query(interaction_id, notice).await?;
        Ok(())
    }

    async fn chat_title(&self, chat: ChatId) -> Result<Option<String>> {
        let chat = self.get_chat(chat).await?;
        Ok(chat.display_name().map(str::to_string))
    }
}
