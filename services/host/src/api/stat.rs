//! `GET /@api/stat/:name` (spec.md §6): status of a single app, 404 if
//! unknown. With an `Accept: text/event-stream` request, switches to an
//! SSE stream of the same status JSON pushed once a second instead.

use crate::manager::{AppManager, ManagerError};
use apphost_http::sse::SseEvent;
use apphost_http::Context;
use apphost_protocol::HttpErrorEnvelope;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

const STAT_STREAM_INTERVAL: Duration = Duration::from_secs(1);

pub async fn handle<S: AsyncRead + AsyncWrite + Unpin>(
    ctx: &mut Context<S>,
    manager: &Arc<AppManager>,
) -> apphost_http::HttpResult<()> {
    let name = ctx.param("name").unwrap_or_default().to_string();
    let wants_stream = ctx
        .header("accept")
        .is_some_and(|v| v.contains("text/event-stream"));

    let app = match manager.get(&name).await {
        Ok(app) => app,
        Err(ManagerError::NotFound(_)) => {
            ctx.status(404);
            return ctx
                .json_response(&HttpErrorEnvelope::new(format!("no app named {name}")))
                .await;
        }
        Err(other) => {
            ctx.status(500);
            return ctx
                .json_response(&HttpErrorEnvelope::with_full(
                    "failed to read app status",
                    other.to_string(),
                ))
                .await;
        }
    };

    if !wants_stream {
        return ctx.json_response(&app.status()).await;
    }

    ctx.start_sse().await?;
    let mut ticker = tokio::time::interval(STAT_STREAM_INTERVAL);
    loop {
        ticker.tick().await;
        let body = serde_json::to_string(&app.status()).expect("status serializes");
        let event = SseEvent::named("stat", body);
        if ctx.send_sse(&event).await.is_err() {
            break;
        }
    }
    Ok(())
}
