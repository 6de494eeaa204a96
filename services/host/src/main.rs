//! Process entry point: loads configuration, hydrates the app registry
//! from its on-disk manifest, starts the health-check loop and the HTTP
//! server, and watches for manifest edits made outside the API.

use anyhow::{Context as _, Result};
use apphost::config::Config;
use apphost::manager::AppManager;
use apphost::manifest::{watch_manifest, JsonFileManifest, ManifestStore};
use apphost::server;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to read configuration from environment")?;
    init_tracing(&config.log_level);

    let manifest_path = config.app_base_dir.join("manifest.json");
    if !manifest_path.exists() {
        std::fs::create_dir_all(&config.app_base_dir)
            .context("failed to create app base directory")?;
        JsonFileManifest::new(&manifest_path)
            .save(&[])
            .context("failed to seed an empty manifest")?;
    }
    let manifest = JsonFileManifest::new(&manifest_path);

    let manager = Arc::new(AppManager::new(config.clone()));
    for info in manifest.load().context("failed to load manifest")? {
        if let Err(err) = manager.register(info.clone()).await {
            warn!(app = %info.name, %err, "failed to register app from manifest");
        }
    }
    manager.start_all().await;

    let pause_flag = manifest.pause_flag();
    let watcher_manager = manager.clone();
    let watcher_manifest_path = manifest_path.clone();
    let _watcher = watch_manifest(&manifest_path, pause_flag, move || {
        let manager = watcher_manager.clone();
        let path = watcher_manifest_path.clone();
        tokio::spawn(async move {
            info!("manifest changed on disk, reloading registry");
            let manifest = JsonFileManifest::new(&path);
            match manifest.load() {
                Ok(infos) => {
                    for info in infos {
                        if manager.get(&info.name).await.is_err() {
                            let name = info.name.clone();
                            if let Err(err) = manager.init(info).await {
                                warn!(app = %name, %err, "failed to register/init app after manifest reload");
                                continue;
                            }
                            if let Err(err) = manager.start(&name).await {
                                warn!(app = %name, %err, "failed to start app after manifest reload");
                            }
                        }
                    }
                }
                Err(err) => warn!(%err, "failed to reload manifest after change notification"),
            }
        });
    })
    .context("failed to start manifest watcher")?;

    let health_check = tokio::spawn(manager.clone().run_health_check_loop());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let server_manager = manager.clone();
    let server_task = tokio::spawn(server::run(config.bind_addr, server_manager, shutdown_rx));

    wait_for_shutdown_signal().await;
    info!("shutdown requested, stopping apps and closing the listener");
    let _ = shutdown_tx.send(true);

    manager.stop_all().await;
    let infos = manager.list_infos().await;
    if let Err(err) = manifest.save(&infos) {
        error!(%err, "failed to persist manifest on shutdown");
    }

    health_check.abort();
    if let Err(err) = server_task.await {
        if !err.is_cancelled() {
            error!(%err, "server task panicked");
        }
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            warn!(%err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
