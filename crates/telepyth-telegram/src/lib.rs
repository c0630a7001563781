//! Telegram adapter (teloxide).
//!
//! This crate implements the `telepyth-core` ChatPort over the Telegram Bot API.

use std::time::Duration;

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InputFile, UpdateKind},
};
use tracing::debug;

use telepyth_core::{
    chat::{
        port::ChatPort,
        types::{IncomingMessage, ParseMode, PhotoSource, SendOptions, Update},
    },
    domain::{ChatId, User, UserId},
    errors::Error,
    Result,
};

/// Slack on top of the long-poll timeout before the HTTP client gives up.
const HTTP_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct TelegramChat {
    bot: Bot,
}

impl TelegramChat {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Bot whose HTTP client outlives a `poll_timeout` long poll.
    pub fn with_poll_timeout(token: impl Into<String>, poll_timeout: Duration) -> Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(poll_timeout + HTTP_TIMEOUT_MARGIN)
            .build()
            .map_err(|e| Error::External(format!("failed to build http client: {e}")))?;
        Ok(Self::new(Bot::with_client(token, client)))
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    #[allow(deprecated)]
    fn tg_parse_mode(mode: ParseMode) -> teloxide::types::ParseMode {
        match mode {
            ParseMode::Html => teloxide::types::ParseMode::Html,
            ParseMode::Markdown => teloxide::types::ParseMode::Markdown,
        }
    }
}

fn user_from_tg(u: &teloxide::types::User) -> User {
    User {
        id: UserId(u.id.0 as i64),
        first_name: Some(u.first_name.clone()).filter(|s| !s.is_empty()),
        last_name: u.last_name.clone(),
        username: u.username.clone(),
    }
}

fn update_from_tg(update: teloxide::types::Update) -> Update {
    let message = match &update.kind {
        UpdateKind::Message(msg) => Some(IncomingMessage {
            chat_id: ChatId(msg.chat.id.0),
            from: msg.from().map(user_from_tg),
            text: msg.text().map(str::to_string),
        }),
        _ => None,
    };

    Update {
        id: i64::from(update.id),
        message,
    }
}

fn input_file(photo: PhotoSource) -> InputFile {
    match photo {
        PhotoSource::Existing(reference) => InputFile::file_id(reference),
        PhotoSource::Upload { file_name, bytes } => InputFile::memory(bytes).file_name(file_name),
    }
}

#[async_trait]
impl ChatPort for TelegramChat {
    async fn get_me(&self) -> Result<User> {
        let me = self.bot.get_me().await.map_err(Self::map_err)?;
        Ok(user_from_tg(&me.user))
    }

    async fn get_updates(&self, offset: i64, limit: u8, timeout: Duration) -> Result<Vec<Update>> {
        let offset = i32::try_from(offset)
            .map_err(|_| Error::External(format!("update offset {offset} out of range")))?;
        let timeout = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);

        let updates = self
            .bot
            .get_updates()
            .offset(offset)
            .limit(limit)
            .timeout(timeout)
            .await
            .map_err(Self::map_err)?;

        if !updates.is_empty() {
            debug!(offset, count = updates.len(), "getUpdates returned");
        }
        Ok(updates.into_iter().map(update_from_tg).collect())
    }

    async fn send_message(&self, chat_id: ChatId, text: &str, options: SendOptions) -> Result<()> {
        let mut req = self.bot.send_message(Self::tg_chat(chat_id), text.to_string());
        if let Some(mode) = options.parse_mode {
            req = req.parse_mode(Self::tg_parse_mode(mode));
        }
        if options.disable_notification {
            req = req.disable_notification(true);
        }
        if options.disable_web_page_preview {
            req = req.disable_web_page_preview(true);
        }

        req.await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo: PhotoSource,
        caption: Option<&str>,
        options: SendOptions,
    ) -> Result<()> {
        let mut req = self
            .bot
            .send_photo(Self::tg_chat(chat_id), input_file(photo));
        if let Some(caption) = caption.filter(|c| !c.is_empty()) {
            req = req.caption(caption.to_string());
        }
        if let Some(mode) = options.parse_mode {
            req = req.parse_mode(Self::tg_parse_mode(mode));
        }
        if options.disable_notification {
            req = req.disable_notification(true);
        }

        req.await.map_err(Self::map_err)?;
        Ok(())
    }
}
