// Middleware and error-handler primitives.
//
// A `Middleware` is a cheap-clone handle around one chain function. Handles
// carry an optional declared name: the dedup algorithm compares handles by
// function reference always, and by name only for dedupe-eligible
// requirements. Anonymous handles can therefore never be confused with one
// another, while two independently-constructed `json_parser()` handles can
// still be recognized as the same logical step.

use crate::{ErrorValue, Request, Response};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future type used throughout the chain machinery.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// What a middleware decided about the rest of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Pass control to the next link.
    Continue,
    /// The middleware completed the response; stop the chain.
    Halt,
}

type MiddlewareFn =
    dyn Fn(Request, Response) -> BoxFuture<Result<Flow, ErrorValue>> + Send + Sync;

/// A pre-processing step in a route chain.
#[derive(Clone)]
pub struct Middleware {
    name: Option<&'static str>,
    func: Arc<MiddlewareFn>,
}

impl Middleware {
    /// Create an anonymous middleware.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Request, Response) -> BoxFuture<Result<Flow, ErrorValue>> + Send + Sync + 'static,
    {
        Self {
            name: None,
            func: Arc::new(func),
        }
    }

    /// Create a named middleware. The name participates in dedup-by-name.
    pub fn named<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(Request, Response) -> BoxFuture<Result<Flow, ErrorValue>> + Send + Sync + 'static,
    {
        Self {
            name: Some(name),
            func: Arc::new(func),
        }
    }

    /// Wrap a trait-based handler into a middleware handle.
    pub fn from_handler<M: MiddlewareHandler + 'static>(handler: M) -> Self {
        let name = handler.name();
        let handler = Arc::new(handler);
        Self {
            name,
            func: Arc::new(move |req, res| {
                let handler = handler.clone();
                Box::pin(async move { handler.handle(req, res).await })
            }),
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    /// Identity comparison: do both handles wrap the exact same function?
    pub fn same_fn(&self, other: &Middleware) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }

    /// Name comparison: are both handles named and named identically?
    pub fn same_name(&self, other: &Middleware) -> bool {
        matches!((self.name, other.name), (Some(a), Some(b)) if a == b)
    }

    pub async fn call(&self, req: Request, res: Response) -> Result<Flow, ErrorValue> {
        (self.func)(req, res).await
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("name", &self.name)
            .finish()
    }
}

/// Trait form of a middleware, for stateful implementations.
#[async_trait]
pub trait MiddlewareHandler: Send + Sync {
    /// Declared name, used for dedup-by-name when present.
    fn name(&self) -> Option<&'static str> {
        None
    }

    async fn handle(&self, req: Request, res: Response) -> Result<Flow, ErrorValue>;
}

type ErrorHandlerFn =
    dyn Fn(ErrorValue, Request, Response) -> BoxFuture<Result<(), ErrorValue>> + Send + Sync;

/// An error-recovery step.
///
/// Returning `Ok(())` marks the error handled; returning `Err` forwards the
/// (possibly replaced) error to the next handler in precedence order.
#[derive(Clone)]
pub struct ErrorHandler {
    name: Option<&'static str>,
    func: Arc<ErrorHandlerFn>,
}

impl ErrorHandler {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(ErrorValue, Request, Response) -> BoxFuture<Result<(), ErrorValue>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: None,
            func: Arc::new(func),
        }
    }

    pub fn named<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(ErrorValue, Request, Response) -> BoxFuture<Result<(), ErrorValue>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: Some(name),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    pub fn same_fn(&self, other: &ErrorHandler) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }

    pub async fn call(
        &self,
        err: ErrorValue,
        req: Request,
        res: Response,
    ) -> Result<(), ErrorValue> {
        (self.func)(err, req, res).await
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("name", &self.name)
            .finish()
    }
}

// ========== Built-in body-decoding middleware ==========
//
// These are the canonical side-effecting steps the dedup algorithm exists
// for: on a stream-based transport a body may be consumed exactly once, so a
// chain must never schedule the same decoder twice.

/// JSON body decoder. Each call returns a fresh handle (distinct function
/// reference) sharing the declared name "json_parser".
pub fn json_parser() -> Middleware {
    Middleware::named("json_parser", |req, _res| {
        Box::pin(async move {
            let outcome = {
                let mut parts = req.parts();
                if parts.parsed_body.is_some() {
                    // Body already decoded upstream.
                    Ok(())
                } else {
                    let is_json = parts
                        .header("content-type")
                        .map(|ct| ct.contains("application/json"))
                        .unwrap_or(false);
                    if is_json && !parts.body.is_empty() {
                        match serde_json::from_slice::<Value>(&parts.body) {
                            Ok(value) => {
                                parts.parsed_body = Some(value);
                                Ok(())
                            }
                            Err(e) => Err(ErrorValue::with_status(
                                400,
                                format!("invalid JSON body: {}", e),
                            )),
                        }
                    } else {
                        Ok(())
                    }
                }
            };
            outcome.map(|_| Flow::Continue)
        })
    })
}

/// URL-encoded form body decoder. Decodes into a JSON object under the same
/// at-most-once rules as `json_parser`.
pub fn urlencoded_parser() -> Middleware {
    Middleware::named("urlencoded_parser", |req, _res| {
        Box::pin(async move {
            {
                let mut parts = req.parts();
                let is_form = parts
                    .header("content-type")
                    .map(|ct| ct.contains("application/x-www-form-urlencoded"))
                    .unwrap_or(false);
                if parts.parsed_body.is_none() && is_form && !parts.body.is_empty() {
                    let text = String::from_utf8_lossy(&parts.body).to_string();
                    let mut object = serde_json::Map::new();
                    for pair in text.split('&') {
                        let mut split = pair.splitn(2, '=');
                        let key = split.next().unwrap_or("");
                        if key.is_empty() {
                            continue;
                        }
                        let value = split.next().unwrap_or("");
                        object.insert(key.to_string(), Value::String(value.to_string()));
                    }
                    parts.parsed_body = Some(Value::Object(object));
                }
            }
            Ok(Flow::Continue)
        })
    })
}
