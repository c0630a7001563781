//! Token-authorized delivery of third-party notifications.
//!
//! Transport-agnostic: the HTTP crate parses the request and maps
//! [`NotifyError`] onto status codes.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    audit::{AuditKind, AuditLogger},
    chat::{
        port::ChatPort,
        types::{PhotoSource, SendOptions},
    },
    domain::{ChatId, User},
    store::{StoreError, TokenStore},
    Error,
};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("token has been revoked")]
    Revoked,

    #[error("unknown token")]
    UnknownToken,

    #[error("multipart form has no `figure` part")]
    MissingFigure,

    #[error("store failure: {0}")]
    Store(StoreError),

    #[error("delivery failed: {0}")]
    Delivery(Error),
}

impl From<StoreError> for NotifyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownToken(_) => Self::UnknownToken,
            other => Self::Store(other),
        }
    }
}

/// Payload accepted by `/api/notify/{token}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Text(String),
    Photo {
        photo: PhotoSource,
        caption: Option<String>,
    },
}

impl Notification {
    fn audit_kind(&self) -> AuditKind {
        match self {
            Self::Text(_) => AuditKind::NotifyText,
            Self::Photo { .. } => AuditKind::NotifyPhoto,
        }
    }
}

pub struct NotifyGateway {
    store: Arc<TokenStore>,
    chat: Arc<dyn ChatPort>,
    audit: Arc<AuditLogger>,
}

impl NotifyGateway {
    pub fn new(store: Arc<TokenStore>, chat: Arc<dyn ChatPort>, audit: Arc<AuditLogger>) -> Self {
        Self { store, chat, audit }
    }

    /// Resolve the user behind a non-revoked token.
    pub fn authorize(&self, token: &str) -> Result<User, NotifyError> {
        if self.store.is_revoked(token)? {
            return Err(NotifyError::Revoked);
        }
        Ok(self.store.lookup_user(token)?)
    }

    /// Forward a notification to `user`'s private chat.
    pub async fn deliver(&self, user: &User, notification: Notification) -> Result<(), NotifyError> {
        let chat_id = ChatId::from(user.id);
        let kind = notification.audit_kind();

        let sent = match notification {
            Notification::Text(text) => {
                self.chat
                    .send_message(chat_id, &text, SendOptions::markdown())
                    .await
            }
            // Captions go out as plain text.
            Notification::Photo { photo, caption } => {
                self.chat
                    .send_photo(chat_id, photo, caption.as_deref(), SendOptions::default())
                    .await
            }
        };

        if let Err(e) = sent {
            warn!(user = %user.label(), event = kind.as_str(), error = %e, "notification delivery failed");
            return Err(NotifyError::Delivery(e));
        }

        info!(user = %user.label(), event = kind.as_str(), "notification delivered");
        self.audit.record(user.id, kind);
        Ok(())
    }

    /// Authorize then deliver.
    pub async fn notify(&self, token: &str, notification: Notification) -> Result<User, NotifyError> {
        let user = self.authorize(token)?;
        self.deliver(&user, notification).await?;
        Ok(user)
    }
}
