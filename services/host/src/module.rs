//! The module capability surface (spec.md §2/§9): everything the App core
//! needs from a loaded module, and the `Loader: path -> ModuleCtor`
//! capability it depends on. The on-disk compiler/sandbox that actually
//! turns a module's source into something implementing `Module` is out of
//! scope here -- this crate only consumes the result.

use crate::cancel::CancelToken;
use apphost_log::Console;
use apphost_protocol::AppInfo;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, thiserror::Error)]
#[error("module error: {0}")]
pub struct UserError(pub String);

impl UserError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Everything a module's lifecycle hooks need: its static info, the
/// per-app log console to write to, and the cancellation token `run()`
/// should race itself against.
pub struct ModuleContext {
    pub info: AppInfo,
    pub console: Arc<Console>,
    pub cancel: CancelToken,
}

/// The lifecycle hooks every loaded module implements (spec.md §4.4's App
/// states map directly onto these: `init` drives UNINITIALIZED ->
/// INITIALIZED, `run` drives INITIALIZED -> RUNNING, `stop` drives
/// RUNNING/STOPPING -> STOPPED).
pub trait Module: Send {
    fn init<'a>(&'a mut self, ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), UserError>>;

    /// Runs until completion, error, or cancellation. Long-running modules
    /// are expected to check `ctx.cancel` themselves or be raced against it
    /// by the caller via `CancelToken::wrap`.
    fn run<'a>(&'a mut self, ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), UserError>>;

    fn stop<'a>(&'a mut self, ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), UserError>>;
}

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("failed to load module at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: libloading::Error,
    },
    #[error("module at {path} is missing the constructor symbol: {source}")]
    MissingSymbol {
        path: String,
        #[source]
        source: libloading::Error,
    },
}

/// The capability the App Manager depends on: given a path, produce a
/// fresh `Module` instance. The manifest/compiler layer that decides
/// *which* path corresponds to a named app is out of scope; this trait is
/// the seam between that layer and the App core.
pub trait Loader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn Module>, LoaderError>;
}
