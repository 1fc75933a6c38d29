// Descriptor data model.
//
// Descriptors are plain records describing a controller's routes, mounting
// metadata, parameter injection, and response policy. They are attached
// through the `DescriptorStore` by ordinary function calls and compiled into
// chains by the composition engine; after composition they are never mutated.

use crate::synthesize::HandlerReturn;
use crate::{BoxFuture, ErrorValue, HttpMethod, HttpRequest, Middleware, Request, Response};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Identity of a registered controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId(pub(crate) TypeId);

impl ControllerId {
    pub fn of<C: 'static>() -> Self {
        ControllerId(TypeId::of::<C>())
    }
}

/// A type-erased controller instance, constructed once and reused.
pub type ControllerInstance = Arc<dyn Any + Send + Sync>;

/// Arguments a synthesized handler passes to the user method.
pub enum HandlerArgs {
    /// Extracted parameter values, positionally ordered by injector index.
    Injected(Vec<Value>),
    /// No injectors were declared: the raw transport handles are passed
    /// through unchanged. The continuation is the `Result` error path.
    Raw(Request, Response),
}

/// The user method behind one route, bound to its controller type.
pub type RouteFn = Arc<
    dyn Fn(ControllerInstance, HandlerArgs) -> BoxFuture<Result<HandlerReturn, ErrorValue>>
        + Send
        + Sync,
>;

/// Build a `RouteFn` for a concrete controller type, downcasting the shared
/// instance before each call.
pub fn route_fn<C, F>(f: F) -> RouteFn
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, HandlerArgs) -> BoxFuture<Result<HandlerReturn, ErrorValue>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(move |instance: ControllerInstance, args| match instance.downcast::<C>() {
        Ok(controller) => f(controller, args),
        Err(_) => Box::pin(async {
            Err(ErrorValue::internal(
                "controller instance does not match the declared handler type",
            ))
        }),
    })
}

/// One declared HTTP endpoint. Identity is (verb, path); declaration order
/// among routes is irrelevant.
#[derive(Clone)]
pub struct RouteDescriptor {
    pub verb: HttpMethod,
    pub path: String,
    pub member: &'static str,
    pub(crate) handler: RouteFn,
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("member", &self.member)
            .finish()
    }
}

/// Options for a mounted sub-scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeOptions {
    /// Match static path segments case-sensitively.
    pub case_sensitive: bool,
    /// Merge path params captured by ancestor scopes into child requests.
    pub merge_params: bool,
}

/// Mounting metadata for a controller: where its sub-scope lives and how it
/// matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterDescriptor {
    pub root: String,
    pub options: ScopeOptions,
}

type Extractor = Arc<dyn Fn(&HttpRequest, &Response) -> Result<Value, ErrorValue> + Send + Sync>;

/// How to produce one positional argument of a handler.
///
/// Extraction is synchronous and pure with respect to the transport objects;
/// side-effecting work (decoding a request body) belongs in the required
/// middlewares, which is what makes deduplication meaningful.
#[derive(Clone)]
pub struct ParamInjector {
    pub index: usize,
    pub dedupe_eligible: bool,
    pub(crate) required: Vec<Middleware>,
    extract: Extractor,
}

impl ParamInjector {
    pub fn new<F>(index: usize, extract: F) -> Self
    where
        F: Fn(&HttpRequest, &Response) -> Result<Value, ErrorValue> + Send + Sync + 'static,
    {
        Self {
            index,
            dedupe_eligible: false,
            required: Vec::new(),
            extract: Arc::new(extract),
        }
    }

    /// Declare a middleware this injector needs upstream.
    pub fn requires(mut self, middleware: Middleware) -> Self {
        self.required.push(middleware);
        self
    }

    /// Mark the required middlewares safe to dedupe by declared name.
    pub fn dedupe(mut self, eligible: bool) -> Self {
        self.dedupe_eligible = eligible;
        self
    }

    pub fn required_middlewares(&self) -> &[Middleware] {
        &self.required
    }

    pub fn extract(&self, req: &HttpRequest, res: &Response) -> Result<Value, ErrorValue> {
        (self.extract)(req, res)
    }

    // ----- common injector shapes -----

    /// Inject a path parameter as a string (JSON null when absent).
    pub fn path_param(index: usize, name: &'static str) -> Self {
        Self::new(index, move |req, _res| {
            Ok(req
                .param(name)
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null))
        })
    }

    /// Inject a query parameter as a string (JSON null when absent).
    pub fn query_param(index: usize, name: &'static str) -> Self {
        Self::new(index, move |req, _res| {
            Ok(req
                .query(name)
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null))
        })
    }

    /// Inject a request header (JSON null when absent).
    pub fn header(index: usize, name: &'static str) -> Self {
        Self::new(index, move |req, _res| {
            Ok(req
                .header(name)
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null))
        })
    }

    /// Inject the decoded request body. Requires the JSON decoder upstream
    /// and is dedupe-eligible, so independently-built decoder handles still
    /// collapse to one scheduled run.
    pub fn body(index: usize) -> Self {
        Self::new(index, |req, _res| {
            Ok(req.parsed_body.clone().unwrap_or(Value::Null))
        })
        .requires(crate::json_parser())
        .dedupe(true)
    }
}

impl fmt::Debug for ParamInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamInjector")
            .field("index", &self.index)
            .field("dedupe_eligible", &self.dedupe_eligible)
            .field("required", &self.required.len())
            .finish()
    }
}

/// How a handler's return value becomes a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendPolicy {
    /// Force JSON encoding even for strings and byte bodies.
    pub json: bool,
    /// Status applied to sent values when none of the special cases hit.
    pub status: Option<u16>,
    /// Status for a JSON-null return.
    pub null_status: Option<u16>,
    /// Status for a value-less return.
    pub undefined_status: Option<u16>,
}

impl SendPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn null_status(mut self, status: u16) -> Self {
        self.null_status = Some(status);
        self
    }

    pub fn undefined_status(mut self, status: u16) -> Self {
        self.undefined_status = Some(status);
        self
    }

    /// Method-level policy extends (not replaces) the class-level one.
    pub fn merge_over(&self, base: &SendPolicy) -> SendPolicy {
        SendPolicy {
            json: self.json || base.json,
            status: self.status.or(base.status),
            null_status: self.null_status.or(base.null_status),
            undefined_status: self.undefined_status.or(base.undefined_status),
        }
    }
}

/// A send-policy declaration: three-valued together with "not declared".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecl {
    Declared(SendPolicy),
    /// Explicit "don't send": suppresses auto-send entirely.
    Suppressed,
}

/// A controller as seen by the composition engine: identity, the
/// once-constructed instance, and its optional mounting metadata.
#[derive(Clone)]
pub struct ControllerDescriptor {
    pub id: ControllerId,
    pub name: &'static str,
    pub router: Option<RouterDescriptor>,
    pub(crate) instance: ControllerInstance,
}

impl fmt::Debug for ControllerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerDescriptor")
            .field("name", &self.name)
            .field("router", &self.router)
            .finish()
    }
}
