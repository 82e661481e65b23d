//! In-memory `ChatTransport` that records every call.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use relay_types::{ChatId, MessageId, MessageRef, PromptHandle, UserId};

use crate::prompt::Prompt;
use crate::transport::ChatTransport;

#[derive(Default)]
pub struct RecordingTransport {
    next_message_id: AtomicI64,
    fail_prompts: AtomicBool,
    update_delay: Mutex<Option<Duration>>,
    copy_failures: Mutex<HashMap<ChatId, String>>,
    titles: Mutex<HashMap<ChatId, String>>,
    copies: Mutex<Vec<(ChatId, MessageRef)>>,
    prompts: Mutex<Vec<(PromptHandle, Prompt)>>,
    updates: Mutex<Vec<(PromptHandle, Prompt)>>,
    texts: Mutex<Vec<(ChatId, String)>>,
    acks: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1000),
            ..Default::default()
        }
    }

    // -- Setup --

    pub fn fail_copies_to(&self, chat: ChatId, reason: &str) {
        self.copy_failures.lock().unwrap().insert(chat, reason.to_string());
    }

    pub fn fail_prompts(&self, fail: bool) {
        self.fail_prompts.store(fail, Ordering::SeqCst);
    }

    /// Make the next `update_prompt` call take `delay` before it lands.
    pub fn delay_next_update(&self, delay: Duration) {
        *self.update_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_title(&self, chat: ChatId, title: &str) {
        self.titles.lock().unwrap().insert(chat, title.to_string());
    }

    // -- Inspection --

    pub fn copy_targets(&self) -> Vec<ChatId> {
        self.copies.lock().unwrap().iter().map(|(to, _)| *to).collect()
    }

    pub fn copies(&self) -> Vec<(ChatId, MessageRef)> {
        self.copies.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<(PromptHandle, Prompt)> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn last_prompt_handle(&self) -> Option<PromptHandle> {
        self.prompts.lock().unwrap().last().map(|(handle, _)| *handle)
    }

    pub fn updates(&self) -> Vec<(PromptHandle, Prompt)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn last_update(&self) -> Option<Prompt> {
        self.updates.lock().unwrap().last().map(|(_, prompt)| prompt.clone())
    }

    pub fn texts(&self) -> Vec<(ChatId, String)> {
        self.texts.lock().unwrap().clone()
    }

    pub fn texts_to(&self, chat: ChatId) -> Vec<String> {
        self.texts
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| *to == chat)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn acks(&self) -> Vec<(String, Option<String>)> {
        self.acks.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn copy_message(&self, to: ChatId, source: MessageRef) -> anyhow::Result<()> {
        self.copies.lock().unwrap().push((to, source));
        match self.copy_failures.lock().unwrap().get(&to) {
            Some(reason) => Err(anyhow::anyhow!("{}", reason)),
            None => Ok(()),
        }
    }

    async fn send_prompt(&self, user: UserId, prompt: &Prompt) -> anyhow::Result<PromptHandle> {
        if self.fail_prompts.load(Ordering::SeqCst) {
            anyhow::bail!("Forbidden: bot can't initiate conversation with a user");
        }
        let handle = PromptHandle {
            chat_id: user.private_chat(),
            message_id: MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst)),
        };
        self.prompts.lock().unwrap().push((handle, prompt.clone()));
        Ok(handle)
    }

    async fn update_prompt(&self, handle: PromptHandle, prompt: &Prompt) -> anyhow::Result<()> {
        let delay = self.update_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.updates.lock().unwrap().push((handle, prompt.clone()));
        Ok(())
    }

    async fn send_text(&self, chat: ChatId, text: &str) -> anyhow::Result<()> {
        self.texts.lock().unwrap().push((chat, text.to_string()));
        Ok(())
    }

    async fn acknowledge(&self, interaction_id: &str, notice: Option<&str>) -> anyhow::Result<()> {
        self.acks
            .lock()
            .unwrap()
            .push((interaction_id.to_string(), notice.map(str::to_string)));
        Ok(())
    }

    async fn chat_title(&self, chat: ChatId) -> anyhow::Result<Option<String>> {
        Ok(self.titles.lock().unwrap().get(&chat).cloned())
    }
}
