//! `GET /@api/logs/:name` (spec.md §6): an SSE stream of an app's log
//! console, starting with its current backlog then following new
//! messages as they're emitted.
//!
//! Open question (spec.md §9): how long does a subscription live if
//! nobody is listening? Decision: for the lifetime of the HTTP
//! connection only -- the listener is registered when the SSE stream
//! opens and removed as soon as writing to the connection fails (client
//! disconnect), never persisted or buffered beyond the bounded console
//! itself.

use crate::manager::AppManager;
use apphost_http::sse::SseEvent;
use apphost_http::Context;
use apphost_log::ConsoleEvent;
use apphost_protocol::HttpErrorEnvelope;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

pub async fn handle<S: AsyncRead + AsyncWrite + Unpin>(
    ctx: &mut Context<S>,
    manager: &Arc<AppManager>,
) -> apphost_http::HttpResult<()> {
    let name = ctx.param("name").unwrap_or_default().to_string();
    let app = match manager.get(&name).await {
        Ok(app) => app,
        Err(_) => {
            ctx.status(404);
            return ctx
                .json_response(&HttpErrorEnvelope::new(format!("no app named {name}")))
                .await;
        }
    };

    ctx.start_sse().await?;

    let backlog = app.console.backlog();
    let backlog_json = serde_json::to_string(&backlog).expect("backlog serializes");
    let backlog_event = SseEvent::named("log", backlog_json).with_id("0");
    ctx.send_sse(&backlog_event).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener_id = app.console.on("log", move |event| {
        if let ConsoleEvent::Log(message) = event {
            let _ = tx.send(message.clone());
        }
    });

    while let Some(message) = rx.recv().await {
        let event = SseEvent::named("log", serde_json::to_string(&message).expect("dto serializes"))
            .with_id(message.uuid.clone());
        if ctx.send_sse(&event).await.is_err() {
            break;
        }
    }

    app.console.off("log", listener_id);
    Ok(())
}
