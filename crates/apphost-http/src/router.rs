//! Path-trie router (spec.md §4.3): static segments take precedence over
//! named parameters, which take precedence over a trailing wildcard.

use crate::context::Context;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Handlers hand the `Context` back when done so the connection it owns
/// can be reused for a kept-alive request's next cycle.
pub type HandlerResult<S> = Pin<Box<dyn Future<Output = Context<S>> + Send>>;
pub type Handler<S> = Arc<dyn Fn(Context<S>) -> HandlerResult<S> + Send + Sync>;
pub type Middleware<S> = Arc<dyn Fn(Context<S>, Handler<S>) -> HandlerResult<S> + Send + Sync>;

struct RouteNode<S: AsyncRead + AsyncWrite + Unpin> {
    static_children: HashMap<String, RouteNode<S>>,
    /// `(param name, child node)`.
    param_child: Option<(String, Box<RouteNode<S>>)>,
    wildcard_handler: Option<Handler<S>>,
    handlers: HashMap<String, Handler<S>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Default for RouteNode<S> {
    fn default() -> Self {
        Self {
            static_children: HashMap::new(),
            param_child: None,
            wildcard_handler: None,
            handlers: HashMap::new(),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> RouteNode<S> {
    fn insert(&mut self, segments: &[&str], method: &str, handler: Handler<S>) {
        let Some((head, rest)) = segments.split_first() else {
            self.handlers.insert(method.to_string(), handler);
            return;
        };
        if let Some(param) = head.strip_prefix(':') {
            let entry = self
                .param_child
                .get_or_insert_with(|| (param.to_string(), Box::new(RouteNode::default())));
            entry.1.insert(rest, method, handler);
            return;
        }
        if *head == "*" {
            self.wildcard_handler = Some(handler);
            return;
        }
        self.static_children
            .entry((*head).to_string())
            .or_default()
            .insert(rest, method, handler);
    }

    /// Attempts a match, collecting params along the way. Returns the
    /// handler and the accumulated params on success.
    fn find(
        &self,
        segments: &[&str],
        method: &str,
        params: &mut Vec<(String, String)>,
    ) -> Option<Handler<S>> {
        let Some((head, rest)) = segments.split_first() else {
            return self.handlers.get(method).cloned();
        };

        if let Some(child) = self.static_children.get(*head) {
            if let Some(h) = child.find(rest, method, params) {
                return Some(h);
            }
        }

        if let Some((name, child)) = &self.param_child {
            params.push((name.clone(), (*head).to_string()));
            if let Some(h) = child.find(rest, method, params) {
                return Some(h);
            }
            params.pop();
        }

        if let Some(h) = &self.wildcard_handler {
            return Some(h.clone());
        }

        None
    }
}

pub struct Router<S: AsyncRead + AsyncWrite + Unpin> {
    root: RouteNode<S>,
    middleware: Vec<Middleware<S>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Default for Router<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Router<S> {
    pub fn new() -> Self {
        Self {
            root: RouteNode::default(),
            middleware: Vec::new(),
        }
    }

    pub fn add_route(&mut self, method: &str, path: &str, handler: Handler<S>) {
        let segments: Vec<&str> = split_path(path);
        self.root.insert(&segments, &method.to_ascii_uppercase(), handler);
    }

    pub fn get(&mut self, path: &str, handler: Handler<S>) {
        self.add_route("GET", path, handler);
    }

    pub fn post(&mut self, path: &str, handler: Handler<S>) {
        self.add_route("POST", path, handler);
    }

    pub fn put(&mut self, path: &str, handler: Handler<S>) {
        self.add_route("PUT", path, handler);
    }

    pub fn delete(&mut self, path: &str, handler: Handler<S>) {
        self.add_route("DELETE", path, handler);
    }

    pub fn use_middleware(&mut self, mw: Middleware<S>) {
        self.middleware.push(mw);
    }

    /// Resolves `method`+`path` to a handler and the named params bound
    /// along the winning path. Static children are tried before the
    /// parameter child before the wildcard at every level, with
    /// backtracking if a deeper static/param branch dead-ends.
    pub fn resolve(&self, method: &str, path: &str) -> Option<(Handler<S>, Vec<(String, String)>)> {
        let segments = split_path(path);
        let mut params = Vec::new();
        let handler = self
            .root
            .find(&segments, &method.to_ascii_uppercase(), &mut params)?;
        Some((handler, params))
    }

    /// Runs middleware (in registration order) around the resolved handler,
    /// or writes a 404 if nothing matched, and returns the `Context` so its
    /// connection can be reused.
    pub async fn handle(&self, mut ctx: Context<S>) -> Context<S> {
        match self.resolve(ctx.method(), ctx.path()) {
            Some((handler, params)) => {
                ctx.set_params(params);
                let mut next = handler;
                for mw in self.middleware.iter().rev() {
                    let mw = mw.clone();
                    let inner = next;
                    next = Arc::new(move |c| mw(c, inner.clone()));
                }
                next(ctx).await
            }
            None => {
                ctx.status(404);
                let _ = ctx.send_text("No Route Matched").await;
                ctx
            }
        }
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let path = path.split('?').next().unwrap_or(path);
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn noop_handler() -> Handler<DuplexStream> {
        Arc::new(|ctx| Box::pin(async move { ctx }))
    }

    #[test]
    fn static_route_beats_param_route() {
        let mut router: Router<DuplexStream> = Router::new();
        router.get("/apps/:name", noop_handler());
        router.get("/apps/list", noop_handler());
        let (_, params) = router.resolve("GET", "/apps/list").unwrap();
        assert!(params.is_empty());
        let (_, params) = router.resolve("GET", "/apps/thing").unwrap();
        assert_eq!(params, vec![("name".to_string(), "thing".to_string())]);
    }

    #[test]
    fn param_route_beats_wildcard() {
        let mut router: Router<DuplexStream> = Router::new();
        router.get("/files/*", noop_handler());
        router.get("/files/:name", noop_handler());
        let (_, params) = router.resolve("GET", "/files/report.txt").unwrap();
        assert_eq!(params, vec![("name".to_string(), "report.txt".to_string())]);
    }

    #[test]
    fn backtracks_from_dead_end_static_branch_to_param_sibling() {
        let mut router: Router<DuplexStream> = Router::new();
        router.get("/apps/:name/stat", noop_handler());
        router.get("/apps/list", noop_handler());
        // "/apps/list" only has a handler for the bare path, not "/stat"
        // beneath it, so matching "/apps/list/stat" must backtrack off the
        // static "list" branch and retry via the param child.
        let (_, params) = router.resolve("GET", "/apps/list/stat").unwrap();
        assert_eq!(params, vec![("name".to_string(), "list".to_string())]);
    }

    #[test]
    fn missing_route_resolves_to_none() {
        let mut router: Router<DuplexStream> = Router::new();
        router.get("/known", noop_handler());
        assert!(router.resolve("GET", "/unknown").is_none());
    }

    #[test]
    fn method_mismatch_on_known_path_resolves_to_none() {
        let mut router: Router<DuplexStream> = Router::new();
        router.get("/apps/:name", noop_handler());
        assert!(router.resolve("DELETE", "/apps/x").is_none());
    }
}
