// Core library for the Trellis route composition engine
// Descriptors are attached to controllers through the store, compiled into
// ordered middleware/handler/error-handler chains by the engine, and mounted
// on the server's routing scopes.

pub mod dedup;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod negotiate;
pub mod resolve;
pub mod scope;
pub mod server;
pub mod store;
pub mod synthesize;

// Re-export commonly used types
pub use descriptor::{
    route_fn, ControllerDescriptor, ControllerId, ControllerInstance, HandlerArgs, ParamInjector,
    PolicyDecl, RouteDescriptor, RouteFn, RouterDescriptor, ScopeOptions, SendPolicy,
};
pub use engine::compose;
pub use error::{Error, ErrorValue};
pub use fallback::{fallback_error_handler, is_fallback, FALLBACK_HANDLER_NAME};
pub use http::{BodyStream, HttpMethod, HttpRequest, HttpResponse, Request, Response};
pub use logging::{request_logger, LogConfig, LogFormat, LogLevel};
pub use middleware::{
    json_parser, urlencoded_parser, BoxFuture, ErrorHandler, Flow, Middleware, MiddlewareHandler,
};
pub use negotiate::{Accept, MediaType};
pub use scope::{match_path, Scope};
pub use server::Server;
pub use store::DescriptorStore;
pub use synthesize::HandlerReturn;
