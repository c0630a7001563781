//! Long-polling loop feeding `getUpdates` batches into the dispatcher.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    chat::{port::ChatPort, types::Update},
    dispatcher::CommandDispatcher,
    Result,
};

/// Bounded exponential backoff for failed fetches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PollerConfig {
    pub limit: u8,
    pub timeout: Duration,
    pub backoff: Backoff,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            timeout: Duration::from_secs(30),
            backoff: Backoff::default(),
        }
    }
}

pub struct UpdatePoller {
    chat: Arc<dyn ChatPort>,
    dispatcher: Arc<CommandDispatcher>,
    cfg: PollerConfig,
}

impl UpdatePoller {
    pub fn new(
        chat: Arc<dyn ChatPort>,
        dispatcher: Arc<CommandDispatcher>,
        cfg: PollerConfig,
    ) -> Self {
        Self {
            chat,
            dispatcher,
            cfg,
        }
    }

    /// Run the loop on its own task until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            limit = self.cfg.limit,
            timeout_secs = self.cfg.timeout.as_secs(),
            "update poller started"
        );

        let mut offset = 0i64;
        let mut failures = 0u32;

        loop {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.fetch(offset) => r,
            };

            match fetched {
                Ok(updates) => {
                    failures = 0;
                    offset = self.process_batch(offset, &updates).await;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.cfg.backoff.delay(failures);
                    warn!(
                        offset,
                        failures,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "getUpdates failed"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }

        info!(offset, "update poller stopped");
    }

    /// Fetch and process a single batch, returning the advanced offset.
    pub async fn poll_once(&self, offset: i64) -> Result<i64> {
        let updates = self.fetch(offset).await?;
        Ok(self.process_batch(offset, &updates).await)
    }

    async fn fetch(&self, offset: i64) -> Result<Vec<Update>> {
        self.chat
            .get_updates(offset, self.cfg.limit, self.cfg.timeout)
            .await
    }

    async fn process_batch(&self, mut offset: i64, updates: &[Update]) -> i64 {
        if !updates.is_empty() {
            debug!(offset, count = updates.len(), "processing updates");
        }
        for update in updates {
            self.dispatcher.handle(update).await;
            offset = offset.max(update.id + 1);
        }
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audit::AuditLogger,
        chat::fake::{message, FakeChat},
        domain::{User, UserId},
        store::TokenStore,
    };
    use tokio::time::{timeout, Instant};

    fn setup() -> (Arc<TokenStore>, Arc<FakeChat>, UpdatePoller) {
        let store = Arc::new(TokenStore::temporary().unwrap());
        let chat = Arc::new(FakeChat::default());
        let dispatcher = Arc::new(CommandDispatcher::new(
            store.clone(),
            chat.clone(),
            Arc::new(AuditLogger::disabled()),
        ));
        let cfg = PollerConfig {
            limit: 100,
            timeout: Duration::from_secs(1),
            backoff: Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
        };
        (store, chat.clone(), UpdatePoller::new(chat, dispatcher, cfg))
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(4), Duration::from_millis(800));
        assert_eq!(b.delay(5), Duration::from_millis(1000));
        assert_eq!(b.delay(u32::MAX), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn cursor_moves_past_failed_dispatch() {
        let (store, chat, poller) = setup();
        let alice = User::new(10);
        let bob = User::new(20);

        // Bob has no token, so his /revoke only logs an error.
        chat.push_batch(vec![
            message(5, &alice, "/start"),
            message(6, &bob, "/revoke"),
            message(7, &alice, "/help"),
        ]);

        let offset = poller.poll_once(0).await.unwrap();

        assert_eq!(offset, 8);
        assert_eq!(chat.offsets(), vec![0]);
        assert!(store.lookup_token(UserId(10)).is_ok());
        assert_eq!(chat.texts().len(), 2);
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let (_, chat, poller) = setup();
        let user = User::new(1);
        chat.push_batch(vec![message(3, &user, "/help")]);

        assert_eq!(poller.poll_once(10).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn run_retries_same_offset_after_fetch_error_then_stops_on_cancel() {
        let (_, chat, poller) = setup();
        let user = User::new(1);

        chat.push_batch(vec![message(41, &user, "/help")]);
        chat.push_fetch_error();
        chat.push_fetch_error();
        chat.push_batch(vec![message(42, &user, "/help")]);

        let cancel = CancellationToken::new();
        let handle = poller.spawn(cancel.clone());

        wait_until(|| chat.offsets().len() == 5).await;
        cancel.cancel();
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();

        assert_eq!(chat.offsets(), vec![0, 42, 42, 42, 43]);
        assert_eq!(chat.texts().len(), 2);
    }

    #[tokio::test]
    async fn cancel_interrupts_idle_long_poll() {
        let (_, chat, poller) = setup();
        let cancel = CancellationToken::new();
        let handle = poller.spawn(cancel.clone());

        wait_until(|| chat.offsets().len() == 1).await;
        cancel.cancel();
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
    }
}
