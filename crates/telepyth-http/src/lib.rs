//! HTTP surface (axum).
//!
//! - `POST /api/notify/{token}`: token-authorized text or photo notification
//! - `GET /api/ping`: liveness probe
//! - `/api/webhook/{botToken}`: reserved for webhook delivery, currently a no-op

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    body::to_bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tracing::{debug, info, warn};

use telepyth_core::{
    chat::types::PhotoSource,
    gateway::{Notification, NotifyError, NotifyGateway},
};

pub const PONG: &str = "Pong.\n";

const CAPTION_FIELD: &str = "caption";
const FIGURE_FIELD: &str = "figure";
const DEFAULT_FIGURE_NAME: &str = "figure.png";

#[derive(Clone)]
struct HttpState {
    gateway: Arc<NotifyGateway>,
    bot_token: Arc<str>,
    max_upload_bytes: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PayloadKind {
    Text,
    Multipart,
}

/// Build the router (shared between production startup and tests).
pub fn build_app(gateway: Arc<NotifyGateway>, bot_token: &str, max_upload_bytes: usize) -> Router {
    let state = HttpState {
        gateway,
        bot_token: Arc::from(bot_token),
        max_upload_bytes,
    };

    Router::new()
        .route("/api/notify/:token", any(notify_handler))
        .route("/api/notify/", any(missing_token_handler))
        .route("/api/notify", any(missing_token_handler))
        .route("/api/ping", any(ping_handler))
        .route("/api/ping/", any(ping_handler))
        .route("/api/webhook/:bot_token", any(webhook_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Serve `app` on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "http listener started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("http listener stopped");
    Ok(())
}

async fn notify_handler(
    State(state): State<HttpState>,
    Path(token): Path<String>,
    req: Request,
) -> StatusCode {
    if req.method() != Method::POST {
        return StatusCode::BAD_REQUEST;
    }
    let Some(kind) = payload_kind(req.headers()) else {
        debug!("notify rejected: unsupported content type");
        return StatusCode::BAD_REQUEST;
    };
    if token.is_empty() {
        return StatusCode::BAD_REQUEST;
    }

    let user = match state.gateway.authorize(&token) {
        Ok(user) => user,
        Err(e) => return reject(&e),
    };

    let notification = match kind {
        PayloadKind::Text => read_text(req, state.max_upload_bytes).await,
        PayloadKind::Multipart => read_figure(req, &state).await,
    };
    let notification = match notification {
        Ok(n) => n,
        Err(status) => return status,
    };

    match state.gateway.deliver(&user, notification).await {
        Ok(()) => StatusCode::OK,
        Err(e) => reject(&e),
    }
}

async fn missing_token_handler() -> StatusCode {
    StatusCode::BAD_REQUEST
}

async fn ping_handler(method: Method) -> Response {
    if method != Method::GET {
        return StatusCode::BAD_REQUEST.into_response();
    }
    (StatusCode::OK, PONG).into_response()
}

async fn webhook_handler(
    State(state): State<HttpState>,
    Path(bot_token): Path<String>,
) -> StatusCode {
    if bot_token != *state.bot_token {
        return StatusCode::NOT_FOUND;
    }
    debug!("webhook request ignored: webhook delivery is not implemented");
    StatusCode::OK
}

fn payload_kind(headers: &HeaderMap) -> Option<PayloadKind> {
    let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let essence = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match essence.as_str() {
        // `plain/text` is what older Python clients send.
        "text/plain" | "plain/text" => Some(PayloadKind::Text),
        "multipart/form-data" => Some(PayloadKind::Multipart),
        _ => None,
    }
}

fn status_for(e: &NotifyError) -> StatusCode {
    match e {
        NotifyError::Revoked => StatusCode::UNAUTHORIZED,
        NotifyError::UnknownToken => StatusCode::NOT_FOUND,
        NotifyError::MissingFigure => StatusCode::BAD_REQUEST,
        NotifyError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        NotifyError::Delivery(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn reject(e: &NotifyError) -> StatusCode {
    let status = status_for(e);
    if status.is_server_error() {
        warn!(status = status.as_u16(), error = %e, "notify failed");
    } else {
        debug!(status = status.as_u16(), error = %e, "notify rejected");
    }
    status
}

async fn read_text(req: Request, limit: usize) -> Result<Notification, StatusCode> {
    let body = to_bytes(req.into_body(), limit).await.map_err(|e| {
        debug!(error = %e, "notify body unreadable");
        StatusCode::BAD_REQUEST
    })?;
    let text = String::from_utf8(body.to_vec()).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok(Notification::Text(text))
}

async fn read_figure(req: Request, state: &HttpState) -> Result<Notification, StatusCode> {
    let mut multipart = Multipart::from_request(req, state).await.map_err(|e| {
        debug!(error = %e, "multipart form rejected");
        StatusCode::BAD_REQUEST
    })?;

    let mut caption: Option<String> = None;
    let mut figure: Option<PhotoSource> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "multipart form unreadable");
                return Err(StatusCode::BAD_REQUEST);
            }
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(CAPTION_FIELD) if caption.is_none() => {
                caption = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            Some(FIGURE_FIELD) if figure.is_none() => {
                let file_name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or(DEFAULT_FIGURE_NAME)
                    .to_string();
                let bytes = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                figure = Some(PhotoSource::upload(file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let Some(photo) = figure else {
        return Err(reject(&NotifyError::MissingFigure));
    };

    Ok(Notification::Photo {
        photo,
        caption: caption.filter(|c| !c.is_empty()),
    })
}
