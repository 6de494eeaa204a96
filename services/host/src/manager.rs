//! The App Manager (spec.md §4.4): the app registry plus the periodic
//! health-check loop that restarts apps which stopped unexpectedly, up to
//! a configured attempt ceiling.

use crate::app::{App, AppError};
use crate::config::Config;
use crate::loader::{module_path, DylibLoader};
use crate::module::Loader;
use apphost_protocol::{AppInfo, AppState, AppStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("no app named {0}")]
    NotFound(String),
    #[error("an app named {0} is already registered")]
    AlreadyRegistered(String),
    #[error(transparent)]
    App(#[from] AppError),
    #[error(transparent)]
    Loader(#[from] crate::module::LoaderError),
}

pub struct AppManager {
    apps: RwLock<HashMap<String, Arc<App>>>,
    loader: Arc<dyn Loader>,
    config: Config,
    /// Counts consecutive unexpected stops per app since the last manual
    /// stop/restart, so `max_restart_attempts` bounds a crash loop instead
    /// of counting restarts over the app's whole lifetime.
    crash_streak: RwLock<HashMap<String, u32>>,
}

impl AppManager {
    pub fn new(config: Config) -> Self {
        Self {
            apps: RwLock::new(HashMap::new()),
            loader: Arc::new(DylibLoader::new()),
            config,
            crash_streak: RwLock::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn with_loader(config: Config, loader: Arc<dyn Loader>) -> Self {
        Self {
            apps: RwLock::new(HashMap::new()),
            loader,
            config,
            crash_streak: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, info: AppInfo) -> Result<Arc<App>, ManagerError> {
        let mut apps = self.apps.write().await;
        if apps.contains_key(&info.name) {
            return Err(ManagerError::AlreadyRegistered(info.name));
        }
        let path = self.module_path(&info.name, info.timestamp);
        let module = self.loader.load(&path)?;
        let app = Arc::new(App::new(info.name.clone(), info, module));
        apps.insert(app.name.clone(), Arc::clone(&app));
        Ok(app)
    }

    /// Where a module for `name`/`timestamp` is expected to live on disk.
    /// Exposed so API handlers can persist a module's source before
    /// `register` loads it back from that same path.
    pub fn module_path(&self, name: &str, timestamp: u64) -> std::path::PathBuf {
        module_path(&self.config.app_base_dir, name, timestamp)
    }

    pub fn static_dir(&self) -> std::path::PathBuf {
        self.config.static_dir.clone()
    }

    pub async fn unregister(&self, name: &str) -> Result<(), ManagerError> {
        let app = self.get(name).await?;
        if app.state() == AppState::Running {
            app.stop().await?;
        }
        self.apps.write().await.remove(name);
        self.crash_streak.write().await.remove(name);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Arc<App>, ManagerError> {
        self.apps
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))
    }

    pub async fn list(&self) -> Vec<AppStatus> {
        self.apps.read().await.values().map(|a| a.status()).collect()
    }

    /// The registered `AppInfo` records, suitable for writing back to the
    /// on-disk manifest.
    pub async fn list_infos(&self) -> Vec<apphost_protocol::AppInfo> {
        self.apps.read().await.values().map(|a| a.info.clone()).collect()
    }

    /// Creates-if-absent then initializes (spec.md §4.6): registers `info`
    /// when no app named `info.name` exists yet, then calls `App::init` on
    /// whichever app (freshly registered or already present) now owns that
    /// name.
    pub async fn init(&self, info: AppInfo) -> Result<(), ManagerError> {
        let app = match self.get(&info.name).await {
            Ok(app) => app,
            Err(ManagerError::NotFound(_)) => self.register(info).await?,
            Err(err) => return Err(err),
        };
        app.init().await.map_err(Into::into)
    }

    pub async fn start(&self, name: &str) -> Result<(), ManagerError> {
        self.crash_streak.write().await.insert(name.to_string(), 0);
        self.get(name).await?.start().await.map_err(Into::into)
    }

    pub async fn stop(&self, name: &str) -> Result<(), ManagerError> {
        self.get(name).await?.stop().await.map_err(Into::into)
    }

    pub async fn restart(&self, name: &str) -> Result<(), ManagerError> {
        self.crash_streak.write().await.insert(name.to_string(), 0);
        self.get(name).await?.restart().await.map_err(Into::into)
    }

    pub async fn start_all(&self) {
        let apps: Vec<_> = self.apps.read().await.values().cloned().collect();
        for app in apps {
            if app.state() == AppState::Uninitialized {
                if let Err(err) = app.init().await {
                    warn!(app = %app.name, %err, "failed to initialize app during start_all");
                    continue;
                }
            }
            if let Err(err) = app.start().await {
                warn!(app = %app.name, %err, "failed to start app during start_all");
            }
        }
    }

    pub async fn stop_all(&self) {
        let apps: Vec<_> = self.apps.read().await.values().cloned().collect();
        for app in apps {
            if app.state() == AppState::Running {
                if let Err(err) = app.stop().await {
                    warn!(app = %app.name, %err, "failed to stop app during stop_all");
                }
            }
        }
    }

    /// Runs forever, polling every app's state on `health_check_interval`
    /// and restarting any that stopped without being told to, up to
    /// `max_restart_attempts` consecutive times.
    pub async fn run_health_check_loop(self: Arc<Self>) {
        if !self.config.auto_restart {
            return;
        }
        let mut ticker = tokio::time::interval(self.config.health_check_interval);
        loop {
            ticker.tick().await;
            let apps: Vec<_> = self.apps.read().await.values().cloned().collect();
            for app in apps {
                if app.state() != AppState::Stopped {
                    continue;
                }
                let mut streak = self.crash_streak.write().await;
                let count = streak.entry(app.name.clone()).or_insert(0);
                if *count >= self.config.max_restart_attempts {
                    continue;
                }
                *count += 1;
                let attempt = *count;
                drop(streak);
                info!(app = %app.name, attempt, "auto-restarting app after unexpected stop");
                if let Err(err) = app.restart().await {
                    warn!(app = %app.name, %err, "auto-restart failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{BoxFuture, Module, ModuleContext, UserError};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModule {
        run_calls: Arc<AtomicUsize>,
    }

    impl Module for CountingModule {
        fn init<'a>(&'a mut self, _ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), UserError>> {
            Box::pin(async move { Ok(()) })
        }
        fn run<'a>(&'a mut self, _ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), UserError>> {
            self.run_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(()) })
        }
        fn stop<'a>(&'a mut self, _ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), UserError>> {
            Box::pin(async move { Ok(()) })
        }
    }

    struct StubLoader {
        run_calls: Arc<AtomicUsize>,
    }

    impl Loader for StubLoader {
        fn load(&self, _path: &Path) -> Result<Box<dyn Module>, crate::module::LoaderError> {
            Ok(Box::new(CountingModule {
                run_calls: self.run_calls.clone(),
            }))
        }
    }

    fn test_config() -> Config {
        Config {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            app_base_dir: PathBuf::from("/tmp/apphost-test"),
            static_dir: PathBuf::from("/tmp/apphost-test-static"),
            health_check_interval: Duration::from_millis(10),
            auto_restart: true,
            max_restart_attempts: 2,
            log_level: "info".to_string(),
        }
    }

    #[tokio::test]
    async fn register_init_start_stop_round_trip() {
        let run_calls = Arc::new(AtomicUsize::new(0));
        let manager = AppManager::with_loader(
            test_config(),
            Arc::new(StubLoader { run_calls: run_calls.clone() }),
        );
        manager.register(AppInfo::new("demo", 1)).await.unwrap();
        manager.init(AppInfo::new("demo", 1)).await.unwrap();
        manager.start("demo").await.unwrap();
        assert_eq!(run_calls.load(Ordering::SeqCst), 1);
        let statuses = manager.list().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].name, "demo");
    }

    #[tokio::test]
    async fn health_check_restarts_an_app_that_stopped_on_its_own() {
        let run_calls = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(AppManager::with_loader(
            test_config(),
            Arc::new(StubLoader { run_calls: run_calls.clone() }),
        ));
        manager.register(AppInfo::new("demo", 1)).await.unwrap();
        manager.init(AppInfo::new("demo", 1)).await.unwrap();
        manager.start("demo").await.unwrap();
        // CountingModule's run() returns immediately, so by the time
        // start() returns the app has already finished its run() and
        // transitioned back to STOPPED.
        let app = manager.get("demo").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(app.state(), AppState::Stopped);

        let health_loop = tokio::spawn(manager.clone().run_health_check_loop());
        tokio::time::sleep(Duration::from_millis(60)).await;
        health_loop.abort();

        assert!(run_calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn unregistering_an_unknown_app_fails() {
        let manager = AppManager::new(test_config());
        let err = manager.unregister("ghost").await.unwrap_err();
        assert!(matches!(err, ManagerError::NotFound(_)));
    }
}
