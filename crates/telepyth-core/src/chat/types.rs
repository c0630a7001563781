use crate::domain::{ChatId, User};

/// One element of a `getUpdates` batch.
#[derive(Clone, Debug)]
pub struct Update {
    pub id: i64,
    /// `None` for update kinds the bot does not handle (edits, callbacks, ...).
    pub message: Option<IncomingMessage>,
}

#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseMode {
    Html,
    /// Telegram's legacy Markdown flavour, which is what notification
    /// clients have always been sending.
    Markdown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub parse_mode: Option<ParseMode>,
    pub disable_notification: bool,
    pub disable_web_page_preview: bool,
}

impl SendOptions {
    pub fn html() -> Self {
        Self {
            parse_mode: Some(ParseMode::Html),
            ..Self::default()
        }
    }

    pub fn markdown() -> Self {
        Self {
            parse_mode: Some(ParseMode::Markdown),
            ..Self::default()
        }
    }
}

/// Photo payload for `sendPhoto`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PhotoSource {
    /// A file id or URL Telegram can already resolve.
    Existing(String),
    /// Raw bytes uploaded as multipart.
    Upload { file_name: String, bytes: Vec<u8> },
}

impl PhotoSource {
    pub fn upload(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::Upload {
            file_name: file_name.into(),
            bytes,
        }
    }
}
