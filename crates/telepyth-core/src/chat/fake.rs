use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    chat::{
        port::ChatPort,
        types::{IncomingMessage, PhotoSource, SendOptions, Update},
    },
    domain::{ChatId, User},
    Error, Result,
};

/// In-memory `ChatPort` for unit tests.
///
/// `get_updates` hands out queued batches (`None` = fetch error) and then
/// blocks forever, so loops under test only make progress on scripted input.
#[derive(Default)]
pub(crate) struct FakeChat {
    batches: Mutex<VecDeque<Option<Vec<Update>>>>,
    offsets: Mutex<Vec<i64>>,
    sent: Mutex<Vec<(ChatId, String, SendOptions)>>,
    photos: Mutex<Vec<(ChatId, PhotoSource, Option<String>, SendOptions)>>,
    fail_sends: AtomicBool,
    send_attempts: AtomicUsize,
}

impl FakeChat {
    pub(crate) fn push_batch(&self, updates: Vec<Update>) {
        self.batches.lock().unwrap().push_back(Some(updates));
    }

    pub(crate) fn push_fetch_error(&self) {
        self.batches.lock().unwrap().push_back(None);
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text, _)| text.clone())
            .collect()
    }

    pub(crate) fn sent(&self) -> Vec<(ChatId, String, SendOptions)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn photos(&self) -> Vec<(ChatId, PhotoSource, Option<String>, SendOptions)> {
        self.photos.lock().unwrap().clone()
    }

    pub(crate) fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatPort for FakeChat {
    async fn get_me(&self) -> Result<User> {
        let mut me = User::new(777);
        me.username = Some("telepyth_bot".to_string());
        Ok(me)
    }

    async fn get_updates(&self, offset: i64, _limit: u8, _timeout: Duration) -> Result<Vec<Update>> {
        self.offsets.lock().unwrap().push(offset);
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(Some(updates)) => Ok(updates),
            Some(None) => Err(Error::External("getUpdates failed".to_string())),
            None => std::future::pending().await,
        }
    }

    async fn send_message(&self, chat_id: ChatId, text: &str, options: SendOptions) -> Result<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::External("sendMessage failed".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat_id, text.to_string(), options));
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo: PhotoSource,
        caption: Option<&str>,
        options: SendOptions,
    ) -> Result<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::External("sendPhoto failed".to_string()));
        }
        self.photos
            .lock()
            .unwrap()
            .push((chat_id, photo, caption.map(str::to_string), options));
        Ok(())
    }
}

pub(crate) fn message(id: i64, from: &User, text: &str) -> Update {
    Update {
        id,
        message: Some(IncomingMessage {
            chat_id: ChatId(from.id.0),
            from: Some(from.clone()),
            text: Some(text.to_string()),
        }),
    }
}
