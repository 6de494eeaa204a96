//! The connection-accept loop: binds `config.bind_addr`, and for each
//! accepted connection drives the HTTP engine through as many
//! keep-alive requests as the client sends, dispatching each to the
//! router built in [`crate::api`].

use crate::manager::AppManager;
use apphost_http::context::{Context, Request};
use apphost_http::engine::{Engine, Role, StartLine};
use apphost_http::router::Router;
use apphost_http::static_files::{self, ServeOutcome, StaticFilesConfig};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub async fn run(
    bind_addr: std::net::SocketAddr,
    manager: Arc<AppManager>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    let static_config = Arc::new(StaticFilesConfig::new(manager.static_dir(), "/static"));
    let router: Arc<Router<TcpStream>> = Arc::new(crate::api::build_router(manager));
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "apphost listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let router = router.clone();
                let static_config = static_config.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, router, static_config).await {
                        if !err.is_expected_disconnect() {
                            warn!(%peer, %err, "connection ended with an error");
                        }
                    }
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("shutdown signal received, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }
}

/// Drives one TCP connection through as many requests as the client sends
/// on it, per `Engine::reuse`'s keep-alive contract. Stops at the first
/// request that doesn't permit reuse (HTTP/1.0 without `Connection:
/// keep-alive`, `Connection: close`, or an in-band upgrade to WebSocket or
/// SSE, which hands the connection to a long-lived stream instead).
async fn handle_connection(
    stream: TcpStream,
    router: Arc<Router<TcpStream>>,
    static_config: Arc<StaticFilesConfig>,
) -> apphost_http::HttpResult<()> {
    let mut engine = Engine::new(stream, Role::Server);
    if let Err(err) = engine.pipe_mut().set_options(true, true) {
        debug!(%err, "failed to set socket options on accepted connection");
    }

    loop {
        let (start, headers) = engine.start().await?;
        let path = match start {
            StartLine::Request(r) => r,
            StartLine::Status(_) => {
                return Err(apphost_http::HttpError::protocol(
                    "server connection received a status line",
                ))
            }
        };
        let (body, _trailers) = engine.read_body().await?;

        let request = Request {
            method: path.method,
            path: path.path,
            headers,
            body,
        };
        let mut ctx = Context::new(engine, request);
        // Static files are checked first, so a 404 from the route tree
        // always falls back to a file on disk before answering "no route".
        let ctx = match static_files::serve(&mut ctx, &static_config).await? {
            ServeOutcome::Served => ctx,
            ServeOutcome::Forbidden => {
                ctx.status(403);
                ctx.send_text("Forbidden").await?;
                ctx
            }
            ServeOutcome::NotFound => {
                ctx.status(404);
                ctx.send_text("Not Found").await?;
                ctx
            }
            ServeOutcome::NotHandled => router.handle(ctx).await,
        };
        engine = ctx.into_engine();

        if !engine.keep_alive() {
            debug!("connection not eligible for reuse, closing");
            return Ok(());
        }
        if matches!(engine.protocol, apphost_http::engine::Protocol::Http) {
            engine.reuse()?;
            continue;
        }
        // WebSocket/SSE upgrades took over the connection inside the
        // handler; nothing left to loop on.
        return Ok(());
    }
}
