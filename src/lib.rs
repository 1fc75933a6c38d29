// Trellis - declarative route composition for HTTP controllers
//
// Controllers declare routes, middlewares, parameter injectors, and error
// handlers as plain descriptors; the composition engine compiles them into
// ordered chains at startup and mounts them on the server.

// Re-export core functionality
pub use trellis_core::*;

// Re-export the logging facade
pub use trellis_log;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        fallback_error_handler,
        json_parser,
        request_logger,
        route_fn,
        urlencoded_parser,
        ControllerId,
        DescriptorStore,
        Error,
        ErrorHandler,
        ErrorValue,
        Flow,
        HandlerArgs,
        HandlerReturn,
        HttpMethod,
        HttpRequest,
        HttpResponse,
        LogConfig,
        LogFormat,
        LogLevel,
        Middleware,
        MiddlewareHandler,
        ParamInjector,
        Request,
        Response,
        ScopeOptions,
        SendPolicy,
        Server,
    };
}
