//! Chat command handling: one inbound message in, at most one reply out.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    audit::{AuditKind, AuditLogger},
    chat::{
        port::ChatPort,
        types::{SendOptions, Update},
    },
    domain::{ChatId, User},
    store::{StoreError, TokenStore},
};

pub const HELP_TEXT: &str = "<b>telepyth</b> delivers notifications from your scripts and notebooks to Telegram.

<b>Available commands</b>:
/start begin interaction and issue a new token.
/revoke revoke the token issued before.
/last show the currently valid token, if any.
/help show this message.

Send a notification with <code>curl -H 'Content-Type: text/plain' -d 'hello' https://&lt;host&gt;/api/notify/&lt;token&gt;</code>.";

const NO_VALID_TOKEN: &str = "You do not have any valid token. Send /start to issue a new one.";
const REVOKED: &str = "Your token has been revoked. Send /start to obtain a new one.";
const UNKNOWN_COMMAND: &str = "Unknown command. Try /help to see usage details.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Last,
    Revoke,
    Help,
    Unknown,
}

impl Command {
    /// Telegram may send `/cmd@botname ...`; only the command word counts.
    pub fn parse(text: &str) -> Self {
        let first = text.split_whitespace().next().unwrap_or("");
        let Some(name) = first.strip_prefix('/') else {
            return Self::Unknown;
        };
        let name = name.split('@').next().unwrap_or("").to_lowercase();

        match name.as_str() {
            "start" => Self::Start,
            "last" => Self::Last,
            "revoke" => Self::Revoke,
            "help" => Self::Help,
            _ => Self::Unknown,
        }
    }

    fn audit_kind(self) -> AuditKind {
        match self {
            Self::Start => AuditKind::Start,
            Self::Last => AuditKind::Last,
            Self::Revoke => AuditKind::Revoke,
            Self::Help => AuditKind::Help,
            Self::Unknown => AuditKind::Unknown,
        }
    }
}

pub struct CommandDispatcher {
    store: Arc<TokenStore>,
    chat: Arc<dyn ChatPort>,
    audit: Arc<AuditLogger>,
}

impl CommandDispatcher {
    pub fn new(store: Arc<TokenStore>, chat: Arc<dyn ChatPort>, audit: Arc<AuditLogger>) -> Self {
        Self { store, chat, audit }
    }

    /// Handle one update. Failures are logged here and never surface to the
    /// caller, so the poller can always move past the update.
    ///
    /// Replies go to the sender's private chat, never to the chat the
    /// command was typed in: `/start` in a group must not leak the token.
    pub async fn handle(&self, update: &Update) {
        let Some(msg) = &update.message else {
            debug!(update_id = update.id, "skipping update without a message");
            return;
        };
        let Some(user) = &msg.from else {
            debug!(update_id = update.id, "skipping message without a sender");
            return;
        };

        let command = Command::parse(msg.text.as_deref().unwrap_or(""));
        info!(update_id = update.id, user = %user.label(), ?command, "command received");
        self.audit.record(user.id, command.audit_kind());

        let Some(reply) = self.reply_for(command, user) else {
            return;
        };

        let reply_to = ChatId::from(user.id);
        if reply_to != msg.chat_id {
            debug!(update_id = update.id, chat_id = msg.chat_id.0, "replying in private chat");
        }
        if let Err(e) = self
            .chat
            .send_message(reply_to, &reply, SendOptions::html())
            .await
        {
            warn!(update_id = update.id, user = %user.label(), error = %e, "reply delivery failed");
        }
    }

    fn reply_for(&self, command: Command, user: &User) -> Option<String> {
        match command {
            Command::Start => match self.store.issue_token(user) {
                Ok(token) => Some(format!("Your access token is <code>{token}</code>.")),
                Err(e) => {
                    error!(user = %user.label(), error = %e, "token issuance failed");
                    None
                }
            },
            Command::Last => self.last_token_reply(user),
            Command::Revoke => match self.store.revoke_token(user.id) {
                Ok(_) => Some(REVOKED.to_string()),
                Err(e @ StoreError::UnknownUser(_)) => {
                    warn!(user = %user.label(), error = %e, "nothing to revoke");
                    None
                }
                Err(e) => {
                    error!(user = %user.label(), error = %e, "token revocation failed");
                    None
                }
            },
            Command::Help => Some(HELP_TEXT.to_string()),
            Command::Unknown => Some(UNKNOWN_COMMAND.to_string()),
        }
    }

    fn last_token_reply(&self, user: &User) -> Option<String> {
        let token = match self.store.lookup_token(user.id) {
            Ok(token) => token,
            Err(e) if e.is_not_found() => return Some(NO_VALID_TOKEN.to_string()),
            Err(e) => {
                error!(user = %user.label(), error = %e, "token lookup failed");
                return None;
            }
        };

        match self.store.is_revoked(token.as_str()) {
            Ok(true) => Some(NO_VALID_TOKEN.to_string()),
            Ok(false) => Some(format!("Your last valid token is <code>{token}</code>.")),
            Err(e) => {
                error!(user = %user.label(), error = %e, "revocation check failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chat::{
            fake::{message, FakeChat},
            types::ParseMode,
        },
        domain::UserId,
        store::TokenSource,
    };

    struct Constant;

    impl TokenSource for Constant {
        fn next_token(&mut self) -> String {
            "1".to_string()
        }
    }

    fn durov() -> User {
        User {
            id: UserId(1),
            first_name: Some("Pavel".to_string()),
            last_name: Some("Durov".to_string()),
            username: Some("durov".to_string()),
        }
    }

    fn setup(store: TokenStore) -> (Arc<TokenStore>, Arc<FakeChat>, CommandDispatcher) {
        let store = Arc::new(store);
        let chat = Arc::new(FakeChat::default());
        let dispatcher = CommandDispatcher::new(
            store.clone(),
            chat.clone(),
            Arc::new(AuditLogger::disabled()),
        );
        (store, chat, dispatcher)
    }

    #[test]
    fn parses_command_word() {
        assert_eq!(Command::parse("/start"), Command::Start);
        assert_eq!(Command::parse("  /last  "), Command::Last);
        assert_eq!(Command::parse("/revoke@telepyth_bot"), Command::Revoke);
        assert_eq!(Command::parse("/HELP"), Command::Help);
        assert_eq!(Command::parse("/stop"), Command::Unknown);
        assert_eq!(Command::parse("start"), Command::Unknown);
        assert_eq!(Command::parse(""), Command::Unknown);
    }

    #[tokio::test]
    async fn start_last_revoke_last() {
        let (store, chat, dispatcher) = setup(TokenStore::temporary().unwrap());
        let user = durov();

        dispatcher.handle(&message(1, &user, "/start")).await;
        let token = store.lookup_token(user.id).unwrap();
        assert_eq!(store.lookup_user(token.as_str()).unwrap(), user);
        assert!(!store.is_revoked(token.as_str()).unwrap());

        dispatcher.handle(&message(2, &user, "/last")).await;
        dispatcher.handle(&message(3, &user, "/revoke")).await;
        dispatcher.handle(&message(4, &user, "/last")).await;

        let sent = chat.sent();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|(chat_id, _, _)| *chat_id == ChatId(1)));
        assert!(sent
            .iter()
            .all(|(_, _, opts)| opts.parse_mode == Some(ParseMode::Html)));

        assert!(sent[0].1.contains(token.as_str()));
        assert!(sent[1].1.contains(token.as_str()));
        assert!(sent[2].1.contains("revoked"));
        assert!(!sent[3].1.contains(token.as_str()));
        assert!(sent[3].1.contains("do not have any valid token"));
    }

    #[tokio::test]
    async fn group_command_is_answered_privately() {
        let (store, chat, dispatcher) = setup(TokenStore::temporary().unwrap());
        let user = durov();

        let mut update = message(1, &user, "/start@telepyth_bot");
        if let Some(msg) = update.message.as_mut() {
            msg.chat_id = ChatId(-100123);
        }
        dispatcher.handle(&update).await;

        let token = store.lookup_token(user.id).unwrap();
        let sent = chat.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChatId(1));
        assert!(sent[0].1.contains(token.as_str()));
    }

    #[tokio::test]
    async fn last_without_token_points_to_start() {
        let (_, chat, dispatcher) = setup(TokenStore::temporary().unwrap());

        dispatcher.handle(&message(1, &durov(), "/last")).await;

        assert_eq!(chat.texts(), vec![NO_VALID_TOKEN.to_string()]);
    }

    #[tokio::test]
    async fn revoke_without_token_sends_nothing() {
        let (_, chat, dispatcher) = setup(TokenStore::temporary().unwrap());

        dispatcher.handle(&message(1, &durov(), "/revoke")).await;

        assert_eq!(chat.send_attempts(), 0);
    }

    #[tokio::test]
    async fn failed_issuance_sends_nothing() {
        let (store, chat, dispatcher) =
            setup(TokenStore::temporary().unwrap().with_token_source(Constant));

        dispatcher.handle(&message(1, &User::new(1), "/start")).await;
        dispatcher.handle(&message(2, &User::new(2), "/start")).await;

        assert_eq!(chat.send_attempts(), 1);
        assert!(store.lookup_token(UserId(2)).is_err());
    }

    #[tokio::test]
    async fn help_and_unknown_are_static() {
        let (store, chat, dispatcher) = setup(TokenStore::temporary().unwrap());
        let user = durov();

        dispatcher.handle(&message(1, &user, "/help")).await;
        dispatcher.handle(&message(2, &user, "hello there")).await;

        assert_eq!(
            chat.texts(),
            vec![HELP_TEXT.to_string(), UNKNOWN_COMMAND.to_string()]
        );
        assert!(store.records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn message_without_text_is_unknown_and_without_sender_is_skipped() {
        let (_, chat, dispatcher) = setup(TokenStore::temporary().unwrap());

        let mut no_text = message(1, &durov(), "");
        if let Some(msg) = no_text.message.as_mut() {
            msg.text = None;
        }
        dispatcher.handle(&no_text).await;

        let mut no_sender = message(2, &durov(), "/start");
        if let Some(msg) = no_sender.message.as_mut() {
            msg.from = None;
        }
        dispatcher.handle(&no_sender).await;
        dispatcher
            .handle(&Update {
                id: 3,
                message: None,
            })
            .await;

        assert_eq!(chat.texts(), vec![UNKNOWN_COMMAND.to_string()]);
    }

    #[tokio::test]
    async fn delivery_failure_keeps_store_change() {
        let (store, chat, dispatcher) = setup(TokenStore::temporary().unwrap());
        chat.fail_sends(true);

        dispatcher.handle(&message(1, &durov(), "/start")).await;

        assert_eq!(chat.send_attempts(), 1);
        assert!(store.lookup_token(UserId(1)).is_ok());
    }
}
