//! `/@api/control/:name` (spec.md §6):
//! - `PUT` registers a new app from a `PutAppRequest` body.
//! - `POST` sends a `ControlCommand` (`START`/`STOP`/`RESTART`/`RELOAD`).
//! - `DELETE` unregisters the app, stopping it first if running.

use crate::app::AppError;
use crate::manager::{AppManager, ManagerError};
use apphost_http::Context;
use apphost_protocol::{AppInfo, ControlCommand, HttpErrorEnvelope, PutAppRequest};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

async fn transition_error<S: AsyncRead + AsyncWrite + Unpin>(
    ctx: &mut Context<S>,
    err: ManagerError,
) -> apphost_http::HttpResult<()> {
    match err {
        ManagerError::NotFound(name) => {
            ctx.status(404);
            ctx.json_response(&HttpErrorEnvelope::new(format!("no app named {name}")))
                .await
        }
        ManagerError::AlreadyRegistered(name) => {
            ctx.status(409);
            ctx.json_response(&HttpErrorEnvelope::new(format!(
                "an app named {name} is already registered"
            )))
            .await
        }
        ManagerError::App(AppError::InvalidTransition { name, state, action }) => {
            ctx.status(500);
            ctx.json_response(&HttpErrorEnvelope::with_full(
                "transition error",
                format!("cannot {action} app {name} while in state {state}"),
            ))
            .await
        }
        other => {
            ctx.status(500);
            ctx.json_response(&HttpErrorEnvelope::with_full("transition error", other.to_string()))
                .await
        }
    }
}

pub async fn put<S: AsyncRead + AsyncWrite + Unpin>(
    ctx: &mut Context<S>,
    manager: &Arc<AppManager>,
) -> apphost_http::HttpResult<()> {
    let name = ctx.param("name").unwrap_or_default().to_string();
    let body: PutAppRequest = match ctx.json() {
        Ok(v) => match serde_json::from_value(v.clone()) {
            Ok(req) => req,
            Err(e) => {
                ctx.status(400);
                return ctx
                    .json_response(&HttpErrorEnvelope::with_full("invalid request body", e.to_string()))
                    .await;
            }
        },
        Err(e) => {
            ctx.status(400);
            return ctx
                .json_response(&HttpErrorEnvelope::with_full("invalid json body", e.to_string()))
                .await;
        }
    };

    if let Some(missing) = body.missing_field() {
        ctx.status(400);
        return ctx
            .json_response(&HttpErrorEnvelope::new(format!("missing required field: {missing}")))
            .await;
    }

    let mut info = AppInfo::new(name.clone(), crate::app::now_ms());
    info.version = body.version;
    info.description = body.description;
    info.env = body.env;

    let module_path = manager.module_path(&name, info.timestamp);
    if let Some(parent) = module_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            ctx.status(500);
            return ctx
                .json_response(&HttpErrorEnvelope::with_full(
                    "failed to persist module source",
                    e.to_string(),
                ))
                .await;
        }
    }
    if let Err(e) = std::fs::write(&module_path, body.code.as_bytes()) {
        ctx.status(500);
        return ctx
            .json_response(&HttpErrorEnvelope::with_full(
                "failed to persist module source",
                e.to_string(),
            ))
            .await;
    }

    match manager.init(info).await {
        Ok(()) => {
            ctx.status(201);
            ctx.json_response(&json!({"success": true})).await
        }
        Err(e) => transition_error(ctx, e).await,
    }
}

pub async fn post<S: AsyncRead + AsyncWrite + Unpin>(
    ctx: &mut Context<S>,
    manager: &Arc<AppManager>,
) -> apphost_http::HttpResult<()> {
    let name = ctx.param("name").unwrap_or_default().to_string();
    let command_text = match ctx.text() {
        Ok(t) => t.trim().to_string(),
        Err(_) => {
            ctx.status(400);
            return ctx
                .json_response(&HttpErrorEnvelope::new("control body must be utf-8"))
                .await;
        }
    };
    let command: ControlCommand = match command_text.parse() {
        Ok(c) => c,
        Err(e) => {
            ctx.status(400);
            return ctx.json_response(&HttpErrorEnvelope::new(e.to_string())).await;
        }
    };

    let result = match command {
        ControlCommand::Start => manager.start(&name).await,
        ControlCommand::Stop => manager.stop(&name).await,
        ControlCommand::Restart => manager.restart(&name).await,
        // RELOAD is re-init followed by a restart: pick up any code change
        // the loader would surface without requiring a full unregister.
        ControlCommand::Reload => match manager.get(&name).await {
            Ok(app) => app.restart().await.map_err(Into::into),
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => ctx.send(&[]).await,
        Err(e) => transition_error(ctx, e).await,
    }
}

pub async fn delete<S: AsyncRead + AsyncWrite + Unpin>(
    ctx: &mut Context<S>,
    manager: &Arc<AppManager>,
) -> apphost_http::HttpResult<()> {
    let name = ctx.param("name").unwrap_or_default().to_string();
    match manager.unregister(&name).await {
        Ok(()) => ctx.json_response(&json!({"success": true})).await,
        Err(e) => transition_error(ctx, e).await,
    }
}
