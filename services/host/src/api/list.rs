//! `GET /@api/list` (spec.md §6): returns every registered app's status.

use crate::manager::AppManager;
use apphost_http::Context;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub async fn handle<S: AsyncRead + AsyncWrite + Unpin>(
    ctx: &mut Context<S>,
    manager: &Arc<AppManager>,
) -> apphost_http::HttpResult<()> {
    let statuses = manager.list().await;
    ctx.json_response(&statuses).await
}
