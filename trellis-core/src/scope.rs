// Mountable routing scopes.
//
// A `Scope` is the surface the composition engine mounts chains onto: shared
// middlewares, routes, nested child scopes, and scope-level error handlers
// appended after everything else. Scopes are built once at composition time
// and only read afterwards; per-request state lives on the request/response
// handles.

use crate::descriptor::ScopeOptions;
use crate::fallback::is_fallback;
use crate::synthesize::SynthesizedHandler;
use crate::{ErrorHandler, ErrorValue, Flow, HttpMethod, Middleware, Request, Response};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// One route as mounted: its pre-handler chain, the synthesized handler, and
/// the error handlers wrapping this route specifically.
pub(crate) struct MountedRoute {
    pub verb: HttpMethod,
    pub path: String,
    pub chain: Vec<Middleware>,
    pub handler: SynthesizedHandler,
    pub error_handlers: Vec<ErrorHandler>,
}

/// A routing scope: the unit sub-routers are composed into.
pub struct Scope {
    options: ScopeOptions,
    shared: Vec<Middleware>,
    routes: Vec<MountedRoute>,
    children: Vec<(String, Scope)>,
    error_handlers: Vec<ErrorHandler>,
}

impl Scope {
    pub fn new(options: ScopeOptions) -> Self {
        Self {
            options,
            shared: Vec::new(),
            routes: Vec::new(),
            children: Vec::new(),
            error_handlers: Vec::new(),
        }
    }

    /// Mount a middleware shared by every route and child of this scope.
    pub fn use_middleware(&mut self, middleware: Middleware) {
        self.shared.push(middleware);
    }

    /// The middlewares currently mounted on this scope, in mounting order.
    /// The engine reads this to seed deduplication, which also makes
    /// repeated registration naturally idempotent.
    pub fn mounted_middlewares(&self) -> &[Middleware] {
        &self.shared
    }

    pub(crate) fn mount(&mut self, route: MountedRoute) {
        self.routes.push(route);
    }

    /// Mount a child scope under a path prefix.
    pub fn mount_scope(&mut self, path: impl Into<String>, child: Scope) {
        self.children.push((path.into(), child));
    }

    /// Append an error handler at the end of this scope's chain. A real
    /// handler displaces the engine's fallback sentinel, if present.
    pub fn append_error_handler(&mut self, handler: ErrorHandler) {
        if !is_fallback(&handler) {
            self.error_handlers.retain(|h| !is_fallback(h));
        }
        self.error_handlers.push(handler);
    }

    /// Append the fallback sentinel unless one is already present.
    pub fn append_fallback(&mut self, handler: ErrorHandler) {
        if !self.error_handlers.iter().any(is_fallback) {
            self.error_handlers.push(handler);
        }
    }

    pub fn has_error_handler(&self) -> bool {
        self.error_handlers.iter().any(|h| !is_fallback(h))
    }

    /// Route a request through this scope.
    ///
    /// `Ok(true)` means some link produced (or owned) the response;
    /// `Ok(false)` means nothing here matched; `Err` is an error no handler
    /// in this scope claimed, left for the caller's error handlers.
    pub fn dispatch<'a>(
        &'a self,
        req: Request,
        res: Response,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ErrorValue>> + Send + 'a>> {
        Box::pin(async move {
            match self.dispatch_inner(req.clone(), res.clone(), path).await {
                Ok(handled) => Ok(handled),
                Err(err) => {
                    run_error_chain(&self.error_handlers, err, req, res)
                        .await
                        .map(|_| true)
                }
            }
        })
    }

    async fn dispatch_inner(
        &self,
        req: Request,
        res: Response,
        path: &str,
    ) -> Result<bool, ErrorValue> {
        for middleware in &self.shared {
            match middleware.call(req.clone(), res.clone()).await? {
                Flow::Continue => {}
                Flow::Halt => return Ok(true),
            }
        }

        let verb = HttpMethod::parse(&req.method());

        for route in &self.routes {
            if Some(route.verb) != verb {
                continue;
            }
            let Some(params) = match_path(&route.path, path, self.options.case_sensitive) else {
                continue;
            };
            {
                let mut parts = req.parts();
                if !self.options.merge_params {
                    parts.path_params.clear();
                }
                parts.path_params.extend(params);
            }
            self.run_route(route, req, res).await?;
            return Ok(true);
        }

        for (prefix, child) in &self.children {
            let Some((params, remaining)) = match_prefix(prefix, path, self.options.case_sensitive)
            else {
                continue;
            };
            if child.options.merge_params {
                req.parts().path_params.extend(params);
            }
            if child.dispatch(req.clone(), res.clone(), remaining).await? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn run_route(
        &self,
        route: &MountedRoute,
        req: Request,
        res: Response,
    ) -> Result<(), ErrorValue> {
        let outcome: Result<(), ErrorValue> = async {
            for middleware in &route.chain {
                match middleware.call(req.clone(), res.clone()).await? {
                    Flow::Continue => {}
                    Flow::Halt => return Ok(()),
                }
            }
            (route.handler)(req.clone(), res.clone()).await
        }
        .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => run_error_chain(&route.error_handlers, err, req, res).await,
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new(ScopeOptions::default())
    }
}

/// Run an error-handler list in order. The first handler returning `Ok`
/// claims the error; each `Err` carries the (possibly replaced) error to the
/// next handler.
pub(crate) async fn run_error_chain(
    handlers: &[ErrorHandler],
    mut err: ErrorValue,
    req: Request,
    res: Response,
) -> Result<(), ErrorValue> {
    for handler in handlers {
        match handler.call(err, req.clone(), res.clone()).await {
            Ok(()) => return Ok(()),
            Err(next) => err = next,
        }
    }
    Err(err)
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn segment_matches(pattern: &str, actual: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        pattern == actual
    } else {
        pattern.eq_ignore_ascii_case(actual)
    }
}

/// Match a full path against a route pattern. `:name` segments capture.
pub fn match_path(
    pattern: &str,
    path: &str,
    case_sensitive: bool,
) -> Option<HashMap<String, String>> {
    let pattern_segments: Vec<&str> = segments(pattern).collect();
    let path_segments: Vec<&str> = segments(path).collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (pat, actual) in pattern_segments.iter().zip(path_segments.iter()) {
        if let Some(name) = pat.strip_prefix(':') {
            params.insert(name.to_string(), (*actual).to_string());
        } else if !segment_matches(pat, actual, case_sensitive) {
            return None;
        }
    }
    Some(params)
}

/// Match a mount prefix against the front of a path, returning captured
/// params and the unconsumed remainder (always with a leading slash).
fn match_prefix<'a>(
    pattern: &str,
    path: &'a str,
    case_sensitive: bool,
) -> Option<(HashMap<String, String>, &'a str)> {
    let pattern_segments: Vec<&str> = segments(pattern).collect();

    let mut params = HashMap::new();
    let mut consumed = 0usize;
    let mut remaining = path;
    for pat in &pattern_segments {
        // Walk the raw string so the remainder can be borrowed.
        let trimmed = remaining.trim_start_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        let end = trimmed.find('/').unwrap_or(trimmed.len());
        let actual = &trimmed[..end];

        if let Some(name) = pat.strip_prefix(':') {
            params.insert(name.to_string(), actual.to_string());
        } else if !segment_matches(pat, actual, case_sensitive) {
            return None;
        }

        consumed += (remaining.len() - trimmed.len()) + end;
        remaining = &path[consumed..];
    }

    let remaining = if remaining.is_empty() { "/" } else { remaining };
    Some((params, remaining))
}
