use std::time::Duration;

use async_trait::async_trait;

use crate::{
    chat::types::{PhotoSource, SendOptions, Update},
    domain::{ChatId, User},
    Result,
};

/// Chat-platform port.
///
/// The four calls the bot needs from the Bot API. Implementations map their
/// transport errors into [`crate::Error::External`] and never retry.
#[async_trait]
pub trait ChatPort: Send + Sync {
    /// Identity of the bot itself; doubles as a credential check at startup.
    async fn get_me(&self) -> Result<User>;

    /// Long-poll for updates with `id >= offset`.
    async fn get_updates(&self, offset: i64, limit: u8, timeout: Duration) -> Result<Vec<Update>>;

    async fn send_message(&self, chat_id: ChatId, text: &str, options: SendOptions) -> Result<()>;

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo: PhotoSource,
        caption: Option<&str>,
        options: SendOptions,
    ) -> Result<()>;
}
