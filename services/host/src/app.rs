//! The App lifecycle state machine (spec.md §4.4):
//! `UNINITIALIZED -> INITIALIZED -> RUNNING -> STOPPING -> STOPPED`, driving
//! a loaded [`Module`] through `init`/`run`/`stop` and racing its `run()`
//! against both cancellation and a warmup window.

use crate::cancel::CancelToken;
use crate::module::{Module, ModuleContext, UserError};
use apphost_log::{Console, EventBus};
use apphost_protocol::{AppInfo, AppState, AppStatus};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

/// How long `start()` waits for `run()` to fail before declaring startup
/// successful (spec.md §9 open question: the race is intentional -- it
/// gives callers fast feedback on a module that fails immediately (bad
/// config, missing dependency) without blocking indefinitely on modules
/// that run forever. A module that crashes at 1.001s looks identical to
/// one that ran fine; the health-check loop, not `start()`, is what
/// catches that case).
const STARTUP_WARMUP: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("cannot {action} app {name} while in state {state}")]
    InvalidTransition {
        name: String,
        state: AppState,
        action: &'static str,
    },
    #[error("module error: {0}")]
    Module(#[from] UserError),
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    StateChanged { from: AppState, to: AppState },
    Error(String),
}

struct AppInner {
    state: AppState,
    start_time: Option<u64>,
    stop_time: Option<u64>,
    restart_count: u32,
    last_error: Option<String>,
    cancel: Option<CancelToken>,
}

/// One running (or stopped) instance of a module, plus its metadata,
/// private log console, and lifecycle event bus.
pub struct App {
    pub name: String,
    pub info: AppInfo,
    module: AsyncMutex<Box<dyn Module>>,
    inner: std::sync::Mutex<AppInner>,
    pub console: Arc<Console>,
    pub events: EventBus<AppEvent>,
    restart_counter: AtomicU32,
}

impl App {
    pub fn new(name: impl Into<String>, info: AppInfo, module: Box<dyn Module>) -> Self {
        Self {
            name: name.into(),
            info,
            module: AsyncMutex::new(module),
            inner: std::sync::Mutex::new(AppInner {
                state: AppState::Uninitialized,
                start_time: None,
                stop_time: None,
                restart_count: 0,
                last_error: None,
                cancel: None,
            }),
            console: Arc::new(Console::default()),
            events: EventBus::new(),
            restart_counter: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> AppState {
        self.inner.lock().expect("app mutex poisoned").state
    }

    fn transition(&self, to: AppState) {
        let from = {
            let mut inner = self.inner.lock().expect("app mutex poisoned");
            let from = inner.state;
            inner.state = to;
            from
        };
        self.events.emit("stateChange", &AppEvent::StateChanged { from, to });
    }

    fn require_state(&self, expected: &[AppState], action: &'static str) -> Result<(), AppError> {
        let state = self.state();
        if expected.contains(&state) {
            Ok(())
        } else {
            Err(AppError::InvalidTransition {
                name: self.name.clone(),
                state,
                action,
            })
        }
    }

    fn context(&self, cancel: CancelToken) -> ModuleContext {
        ModuleContext {
            info: self.info.clone(),
            console: self.console.clone(),
            cancel,
        }
    }

    /// Forbidden while RUNNING; otherwise calls [`Self::uninstall`] first so
    /// re-`init` from INITIALIZED/STOPPED/STOPPING always starts from a
    /// clean UNINITIALIZED slate (spec.md §4.4).
    pub async fn init(self: &Arc<Self>) -> Result<(), AppError> {
        if self.state() == AppState::Running {
            return Err(AppError::InvalidTransition {
                name: self.name.clone(),
                state: AppState::Running,
                action: "initialize",
            });
        }
        if self.state() != AppState::Uninitialized {
            self.uninstall().await?;
        }
        let cancel = CancelToken::new();
        let ctx = self.context(cancel);
        self.module.lock().await.init(&ctx).await?;
        self.transition(AppState::Initialized);
        Ok(())
    }

    /// `stop()` if running, clears lifecycle bookkeeping, and transitions to
    /// UNINITIALIZED (spec.md §4.4). The loaded module handle itself stays
    /// put here; it is released when [`crate::manager::AppManager`] drops
    /// this app's registry entry entirely (see DESIGN.md).
    pub async fn uninstall(self: &Arc<Self>) -> Result<(), AppError> {
        if matches!(self.state(), AppState::Running | AppState::Stopping) {
            self.stop().await?;
        }
        {
            let mut inner = self.inner.lock().expect("app mutex poisoned");
            inner.start_time = None;
            inner.stop_time = None;
            inner.last_error = None;
            inner.cancel = None;
        }
        self.transition(AppState::Uninitialized);
        Ok(())
    }

    /// Starts the module's `run()` loop in the background, racing its
    /// first `STARTUP_WARMUP` against cancellation-free completion. See
    /// the module doc comment for why that race exists.
    pub async fn start(self: &Arc<Self>) -> Result<(), AppError> {
        self.require_state(&[AppState::Initialized, AppState::Stopped], "start")?;

        let cancel = CancelToken::new();
        {
            let mut inner = self.inner.lock().expect("app mutex poisoned");
            inner.cancel = Some(cancel.clone());
            inner.start_time = Some(now_ms());
            inner.stop_time = None;
        }
        self.transition(AppState::Running);

        let (warmup_tx, warmup_rx) = oneshot::channel::<Result<(), UserError>>();
        let app = Arc::clone(self);
        let run_cancel = cancel.clone();

        tokio::spawn(async move {
            let ctx = app.context(run_cancel.clone());
            let result = {
                let mut module = app.module.lock().await;
                run_cancel.wrap(module.run(&ctx)).await
            };
            let outcome = match result {
                Ok(inner) => inner,
                Err(_cancelled) => Ok(()),
            };
            let _ = warmup_tx.send(outcome.clone());
            app.on_run_finished(outcome);
        });

        tokio::select! {
            sent = warmup_rx => {
                if let Ok(Err(err)) = sent {
                    return Err(AppError::Module(err));
                }
            }
            _ = tokio::time::sleep(STARTUP_WARMUP) => {}
        }
        Ok(())
    }

    fn on_run_finished(self: Arc<Self>, outcome: Result<(), UserError>) {
        if self.state() != AppState::Running {
            // Already transitioning via an explicit stop(); don't clobber.
            return;
        }
        if let Err(err) = &outcome {
            let mut inner = self.inner.lock().expect("app mutex poisoned");
            inner.last_error = Some(err.0.clone());
            drop(inner);
            self.events.emit("error", &AppEvent::Error(err.0.clone()));
        }
        {
            let mut inner = self.inner.lock().expect("app mutex poisoned");
            inner.stop_time = Some(now_ms());
        }
        self.transition(AppState::Stopped);
    }

    pub async fn stop(self: &Arc<Self>) -> Result<(), AppError> {
        self.require_state(&[AppState::Running, AppState::Stopping], "stop")?;
        self.transition(AppState::Stopping);

        let cancel = {
            let inner = self.inner.lock().expect("app mutex poisoned");
            inner.cancel.clone()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        let ctx = self.context(CancelToken::new());
        self.module.lock().await.stop(&ctx).await?;

        {
            let mut inner = self.inner.lock().expect("app mutex poisoned");
            inner.stop_time = Some(now_ms());
        }
        self.transition(AppState::Stopped);
        Ok(())
    }

    pub async fn restart(self: &Arc<Self>) -> Result<(), AppError> {
        if self.state() == AppState::Running {
            self.stop().await?;
        }
        self.restart_counter.fetch_add(1, Ordering::SeqCst);
        {
            let mut inner = self.inner.lock().expect("app mutex poisoned");
            inner.restart_count = self.restart_counter.load(Ordering::SeqCst);
        }
        self.start().await
    }

    pub fn status(&self) -> AppStatus {
        let inner = self.inner.lock().expect("app mutex poisoned");
        let uptime_ms = match (inner.start_time, inner.state) {
            (Some(start), AppState::Running) => now_ms().saturating_sub(start),
            (Some(start), _) => inner.stop_time.unwrap_or(start).saturating_sub(start),
            (None, _) => 0,
        };
        AppStatus {
            name: self.name.clone(),
            state: inner.state,
            version: self.info.version.clone(),
            description: self.info.description.clone(),
            timestamp: self.info.timestamp,
            start_time: inner.start_time,
            stop_time: inner.stop_time,
            uptime_ms,
            restart_count: inner.restart_count,
            last_error: inner.last_error.clone(),
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::BoxFuture;

    struct InstantModule {
        fail_init: bool,
    }

    impl Module for InstantModule {
        fn init<'a>(&'a mut self, _ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), UserError>> {
            Box::pin(async move {
                if self.fail_init {
                    Err(UserError::new("bad config"))
                } else {
                    Ok(())
                }
            })
        }
        fn run<'a>(&'a mut self, ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), UserError>> {
            Box::pin(async move {
                ctx.cancel.cancelled().await;
                Ok(())
            })
        }
        fn stop<'a>(&'a mut self, _ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), UserError>> {
            Box::pin(async move { Ok(()) })
        }
    }

    struct FailFastModule;

    impl Module for FailFastModule {
        fn init<'a>(&'a mut self, _ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), UserError>> {
            Box::pin(async move { Ok(()) })
        }
        fn run<'a>(&'a mut self, _ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), UserError>> {
            Box::pin(async move { Err(UserError::new("boom")) })
        }
        fn stop<'a>(&'a mut self, _ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), UserError>> {
            Box::pin(async move { Ok(()) })
        }
    }

    #[tokio::test]
    async fn lifecycle_goes_through_every_state_in_order() {
        let app = Arc::new(App::new(
            "demo",
            AppInfo::new("demo", 0),
            Box::new(InstantModule { fail_init: false }),
        ));
        assert_eq!(app.state(), AppState::Uninitialized);
        app.init().await.unwrap();
        assert_eq!(app.state(), AppState::Initialized);
        app.start().await.unwrap();
        assert_eq!(app.state(), AppState::Running);
        app.stop().await.unwrap();
        assert_eq!(app.state(), AppState::Stopped);
    }

    #[tokio::test]
    async fn init_failure_surfaces_module_error_and_stays_uninitialized() {
        let app = Arc::new(App::new(
            "demo",
            AppInfo::new("demo", 0),
            Box::new(InstantModule { fail_init: true }),
        ));
        let err = app.init().await.unwrap_err();
        assert!(matches!(err, AppError::Module(_)));
        assert_eq!(app.state(), AppState::Uninitialized);
    }

    #[tokio::test]
    async fn start_before_init_is_an_invalid_transition() {
        let app = Arc::new(App::new(
            "demo",
            AppInfo::new("demo", 0),
            Box::new(InstantModule { fail_init: false }),
        ));
        let err = app.start().await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn run_failing_fast_is_surfaced_by_start_within_the_warmup_window() {
        let app = Arc::new(App::new(
            "demo",
            AppInfo::new("demo", 0),
            Box::new(FailFastModule),
        ));
        app.init().await.unwrap();
        let err = app.start().await.unwrap_err();
        assert!(matches!(err, AppError::Module(_)));
    }

    #[tokio::test]
    async fn status_reports_uptime_while_running() {
        let app = Arc::new(App::new(
            "demo",
            AppInfo::new("demo", 0),
            Box::new(InstantModule { fail_init: false }),
        ));
        app.init().await.unwrap();
        app.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let status = app.status();
        assert_eq!(status.state, AppState::Running);
        app.stop().await.unwrap();
    }
}
