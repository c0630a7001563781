use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use telepyth_core::{
    audit::AuditLogger,
    chat::port::ChatPort,
    config::Config,
    dispatcher::CommandDispatcher,
    gateway::NotifyGateway,
    poller::UpdatePoller,
    store::TokenStore,
};
use telepyth_http::{build_app, serve};
use telepyth_telegram::TelegramChat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telepyth_core::logging::init("telepyth")?;

    let cfg = Config::load()?;
    info!(
        database = %cfg.database_path.display(),
        listen = %cfg.listen_addr,
        polling = cfg.polling,
        "starting telepyth"
    );

    let store = Arc::new(
        TokenStore::open(&cfg.database_path)
            .with_context(|| format!("failed to open token store {}", cfg.database_path.display()))?,
    );

    let chat: Arc<dyn ChatPort> = Arc::new(TelegramChat::with_poll_timeout(
        cfg.bot_token.clone(),
        cfg.poll_timeout,
    )?);
    let me = chat
        .get_me()
        .await
        .context("telegram rejected the bot token (getMe failed)")?;
    info!(bot = %me.label(), id = %me.id, "authorized on telegram");

    let audit = Arc::new(match &cfg.audit_log_path {
        Some(path) => AuditLogger::new(path.clone(), cfg.audit_log_json),
        None => AuditLogger::disabled(),
    });

    let cancel = CancellationToken::new();

    let poller = if cfg.polling {
        let dispatcher = Arc::new(CommandDispatcher::new(
            store.clone(),
            chat.clone(),
            audit.clone(),
        ));
        Some(UpdatePoller::new(chat.clone(), dispatcher, cfg.poller()).spawn(cancel.clone()))
    } else {
        info!("long polling disabled");
        None
    };

    let gateway = Arc::new(NotifyGateway::new(store.clone(), chat, audit));
    let app = build_app(gateway, &cfg.bot_token, cfg.max_upload_bytes);

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
                _ = cancel.cancelled() => {}
            }
        }
    };
    let served = serve(cfg.listen_addr, app, shutdown).await;

    cancel.cancel();
    if let Some(handle) = poller {
        if let Err(e) = handle.await {
            warn!(error = %e, "update poller task failed");
        }
    }
    store.flush().context("failed to flush token store")?;

    info!("telepyth stopped");
    served
}
