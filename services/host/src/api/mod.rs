//! The REST + SSE API surface (spec.md §6).

mod control;
mod list;
mod logs;
mod stat;

use crate::manager::AppManager;
use apphost_http::router::Router;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

/// Builds the router wiring `/@api/*` to the handlers in this module. `S`
/// is the connection stream type the server accepts requests on.
pub fn build_router<S>(manager: Arc<AppManager>) -> Router<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut router = Router::new();

    let m = manager.clone();
    router.get(
        "/@api/list",
        Arc::new(move |mut ctx| {
            let m = m.clone();
            Box::pin(async move {
                if let Err(err) = list::handle(&mut ctx, &m).await {
                    warn!(%err, "failed writing /@api/list response");
                }
                ctx
            })
        }),
    );

    let m = manager.clone();
    router.get(
        "/@api/stat/:name",
        Arc::new(move |mut ctx| {
            let m = m.clone();
            Box::pin(async move {
                if let Err(err) = stat::handle(&mut ctx, &m).await {
                    warn!(%err, "failed writing /@api/stat response");
                }
                ctx
            })
        }),
    );

    let m = manager.clone();
    router.put(
        "/@api/control/:name",
        Arc::new(move |mut ctx| {
            let m = m.clone();
            Box::pin(async move {
                if let Err(err) = control::put(&mut ctx, &m).await {
                    warn!(%err, "failed writing /@api/control PUT response");
                }
                ctx
            })
        }),
    );

    let m = manager.clone();
    router.post(
        "/@api/control/:name",
        Arc::new(move |mut ctx| {
            let m = m.clone();
            Box::pin(async move {
                if let Err(err) = control::post(&mut ctx, &m).await {
                    warn!(%err, "failed writing /@api/control POST response");
                }
                ctx
            })
        }),
    );

    let m = manager.clone();
    router.delete(
        "/@api/control/:name",
        Arc::new(move |mut ctx| {
            let m = m.clone();
            Box::pin(async move {
                if let Err(err) = control::delete(&mut ctx, &m).await {
                    warn!(%err, "failed writing /@api/control DELETE response");
                }
                ctx
            })
        }),
    );

    let m = manager.clone();
    router.get(
        "/@api/logs/:name",
        Arc::new(move |mut ctx| {
            let m = m.clone();
            Box::pin(async move {
                if let Err(err) = logs::handle(&mut ctx, &m).await {
                    if !err.is_expected_disconnect() {
                        warn!(%err, "log stream ended with an error");
                    }
                }
                ctx
            })
        }),
    );

    router
}
