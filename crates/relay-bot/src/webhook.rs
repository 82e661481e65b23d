use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use tracing::warn;

use relay_types::telegram::Update;

use crate::handlers::Bot;

/// Header Telegram echoes the configured webhook secret in.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Routes for webhook mode: `POST /webhook` and `GET /health`.
pub fn router(bot: Bot, secret: Option<String>) -> Router {
    let secret: Option<Arc<str>> = secret.map(Into::into);

    let webhook = Router::new()
        .route("/webhook", post(receive_update))
        .layer(middleware::from_fn_with_state(secret, require_secret))
        .with_state(bot);

    Router::new().route("/health", get(health)).merge(webhook)
}

/// Reject webhook calls that do not carry the configured secret.
async fn require_secret(
    State(secret): State<Option<Arc<str>>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected) = secret {
        let given = req
            .headers()
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;
        if given != &*expected {
            warn!("Webhook call with a wrong secret token");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    Ok(next.run(req).await)
}

/// Acknowledge right away; Telegram retries updates that take too long.
async fn receive_update(State(bot): State<Bot>, Json(update): Json<Update>) -> StatusCode {
    tokio::spawn(async move { bot.handle_update(update).await });
    StatusCode::OK
}

async fn health() -> &'static str {
    "ok"
}
