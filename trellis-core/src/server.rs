// Server: the top-level registration surface and the HTTP serving loop.
//
// `register` composes controllers onto the root scope and appends the
// fallback error handler once per call; a caller-supplied terminal handler
// registered through `catch` displaces it. Serving runs on hyper, one task
// per connection.

use crate::descriptor::ControllerId;
use crate::engine::compose;
use crate::fallback::fallback_error_handler;
use crate::scope::Scope;
use crate::store::DescriptorStore;
use crate::{Error, ErrorHandler, HttpRequest, HttpResponse, Middleware, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming as IncomingBody;
use hyper::header::{HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct Server {
    root: Scope,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").finish_non_exhaustive()
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            root: Scope::default(),
        }
    }

    /// Mount a global middleware, shared by every registered route.
    pub fn use_global(&mut self, middleware: Middleware) {
        self.root.use_middleware(middleware);
    }

    /// Register a terminal error handler. Displaces the engine's fallback.
    pub fn catch(&mut self, handler: ErrorHandler) {
        self.root.append_error_handler(handler);
    }

    /// Compose and mount controllers.
    ///
    /// May be called repeatedly; each call reseeds middleware deduplication
    /// from the live global mount list and appends the fallback error
    /// handler only when no terminal handler is installed.
    pub fn register(
        &mut self,
        store: &DescriptorStore,
        controllers: &[ControllerId],
    ) -> Result<&mut Self, Error> {
        compose(store, &mut self.root, controllers)?;
        // A terminal handler installed through `catch` owns error rendering,
        // even when it was installed before the first `register` call.
        if !self.root.has_error_handler() {
            self.root.append_fallback(fallback_error_handler());
        }
        Ok(self)
    }

    /// Run one request through the composed chains.
    pub async fn handle(&self, mut raw: HttpRequest) -> HttpResponse {
        // Split the query string off before matching.
        let path = match raw.path.split_once('?') {
            Some((path, query)) => {
                raw.query_params = parse_query_string(query);
                let path = path.to_string();
                raw.path = path.clone();
                path
            }
            None => raw.path.clone(),
        };

        let method = raw.method.clone();
        let req = Request::new(raw);
        let res = Response::new();

        match self.root.dispatch(req, res.clone(), &path).await {
            Ok(true) => res.snapshot(),
            Ok(false) => {
                tracing::debug!(%method, %path, "no route matched");
                not_found(&method, &path)
            }
            Err(err) => {
                // Only reachable when the terminal handler forwarded the
                // error or the response was already sent.
                tracing::error!(%method, %path, error = %err, "unhandled error left the chain");
                if res.headers_sent() {
                    res.snapshot()
                } else {
                    let body = serde_json::json!({
                        "status": 500,
                        "message": err.to_string(),
                    });
                    let response = HttpResponse::internal_server_error();
                    response.with_json(&body).unwrap_or_else(|_| {
                        HttpResponse::internal_server_error()
                    })
                }
            }
        }
    }

    /// Start the HTTP server on the given port.
    pub async fn listen(self, port: u16) -> Result<(), Error> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "server listening");

        let server = Arc::new(self);
        loop {
            let (stream, peer) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = server.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: hyper::Request<IncomingBody>| {
                    let server = server.clone();
                    async move { serve_one(req, server).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::warn!(%peer, error = ?err, "connection error");
                }
            });
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(method: &str, path: &str) -> HttpResponse {
    let body = serde_json::json!({
        "status": 404,
        "message": format!("Cannot {} {}", method, path),
    });
    HttpResponse::not_found()
        .with_json(&body)
        .unwrap_or_else(|_| HttpResponse::not_found())
}

/// Parse a query string into key/value pairs.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|part| {
            let mut split = part.splitn(2, '=');
            let key = split.next()?;
            if key.is_empty() {
                return None;
            }
            let value = split.next().unwrap_or("");
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

async fn serve_one(
    req: hyper::Request<IncomingBody>,
    server: Arc<Server>,
) -> Result<hyper::Response<Full<bytes::Bytes>>, hyper::Error> {
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let mut request = HttpRequest::new(method, path);
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            request
                .headers
                .insert(name.to_string(), value.to_string());
        }
    }
    request.body = req.collect().await?.to_bytes().to_vec();

    let response = server.handle(request).await;

    let mut out = hyper::Response::new(Full::new(bytes::Bytes::from(response.body)));
    *out.status_mut() =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    for (key, value) in response.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            out.headers_mut().insert(name, value);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{route_fn, ScopeOptions, SendPolicy};
    use crate::synthesize::HandlerReturn;
    use crate::{ErrorValue, Flow, HttpMethod};

    struct Widgets;

    fn store_with_routes() -> (DescriptorStore, ControllerId) {
        let mut store = DescriptorStore::new();
        let id = store.controller("Widgets", || Widgets);
        store.router(id, "/widgets", ScopeOptions::default());
        store.route(
            id,
            HttpMethod::Get,
            "/",
            "list",
            route_fn::<Widgets, _>(|_c, _args| {
                Box::pin(async { Ok(HandlerReturn::Json(serde_json::json!([1, 2]))) })
            }),
        );
        store.send_policy(id, Some("list"), SendPolicy::new());
        (store, id)
    }

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("a=1&b=two&empty=&=skipped");
        assert_eq!(params.get("a"), Some(&"1".to_string()));
        assert_eq!(params.get("b"), Some(&"two".to_string()));
        assert_eq!(params.get("empty"), Some(&"".to_string()));
        assert_eq!(params.len(), 3);
    }

    #[tokio::test]
    async fn test_handle_routes_and_strips_query() {
        let (mut store, id) = store_with_routes();
        store.route(
            id,
            HttpMethod::Get,
            "/search",
            "search",
            route_fn::<Widgets, _>(|_c, args| {
                Box::pin(async move {
                    match args {
                        crate::descriptor::HandlerArgs::Raw(req, _res) => {
                            let q = req.query("q").unwrap_or_default();
                            Ok(HandlerReturn::Text(q))
                        }
                        _ => Err(ErrorValue::internal("expected raw")),
                    }
                })
            }),
        );
        store.send_policy(id, Some("search"), SendPolicy::new());

        let mut server = Server::new();
        server.register(&store, &[id]).unwrap();

        let response = server
            .handle(HttpRequest::new(
                "GET".to_string(),
                "/widgets/search?q=gears".to_string(),
            ))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"gears".to_vec());
    }

    #[tokio::test]
    async fn test_handle_unmatched_is_404() {
        let (store, id) = store_with_routes();
        let mut server = Server::new();
        server.register(&store, &[id]).unwrap();

        let response = server
            .handle(HttpRequest::new("GET".to_string(), "/nothing".to_string()))
            .await;
        assert_eq!(response.status, 404);
        let body = response.json_body().unwrap();
        assert_eq!(body["message"], "Cannot GET /nothing");
    }

    #[tokio::test]
    async fn test_fallback_renders_route_errors() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Widgets", || Widgets);
        store.route(
            id,
            HttpMethod::Get,
            "/boom",
            "boom",
            route_fn::<Widgets, _>(|_c, _args| {
                Box::pin(async { Err(ErrorValue::from("404 no widget here")) })
            }),
        );

        let mut server = Server::new();
        server.register(&store, &[id]).unwrap();

        let response = server
            .handle(HttpRequest::new("GET".to_string(), "/boom".to_string()))
            .await;
        assert_eq!(response.status, 404);
        assert_eq!(
            response.json_body(),
            Some(serde_json::json!({"status": 404, "message": "no widget here"}))
        );
    }

    #[tokio::test]
    async fn test_user_terminal_handler_displaces_fallback() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Widgets", || Widgets);
        store.route(
            id,
            HttpMethod::Get,
            "/boom",
            "boom",
            route_fn::<Widgets, _>(|_c, _args| {
                Box::pin(async { Err(ErrorValue::from("kaboom")) })
            }),
        );

        let mut server = Server::new();
        server.register(&store, &[id]).unwrap();
        server.catch(ErrorHandler::new(|_err, _req, res| {
            Box::pin(async move {
                res.set_status(503);
                res.send_text("custom");
                Ok(())
            })
        }));

        let response = server
            .handle(HttpRequest::new("GET".to_string(), "/boom".to_string()))
            .await;
        assert_eq!(response.status, 503);
        assert_eq!(response.body, b"custom".to_vec());
    }

    #[tokio::test]
    async fn test_catch_before_register_keeps_forwarded_errors_out_of_fallback() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Widgets", || Widgets);
        store.route(
            id,
            HttpMethod::Get,
            "/boom",
            "boom",
            route_fn::<Widgets, _>(|_c, _args| {
                Box::pin(async { Err(ErrorValue::from("404 deliberately forwarded")) })
            }),
        );

        let mut server = Server::new();
        server.catch(ErrorHandler::new(|err, _req, _res| {
            Box::pin(async move { Err(err) })
        }));
        server.register(&store, &[id]).unwrap();

        let response = server
            .handle(HttpRequest::new("GET".to_string(), "/boom".to_string()))
            .await;
        // The terminal handler forwarded on purpose; no fallback may sit
        // behind it and render the error as a 404.
        assert_eq!(response.status, 500);
        assert_eq!(
            response.json_body().map(|b| b["message"].clone()),
            Some(serde_json::json!("404 deliberately forwarded"))
        );
    }

    #[tokio::test]
    async fn test_repeated_register_is_idempotent_for_globals() {
        let (store, id) = store_with_routes();
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counting = {
            let calls = calls.clone();
            Middleware::new(move |_req, _res| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(Flow::Continue)
                })
            })
        };

        struct Second;
        let mut store2 = DescriptorStore::new();
        let id2 = store2.controller("Second", || Second);
        store2.router(id2, "/second", ScopeOptions::default());
        store2.route(
            id2,
            HttpMethod::Get,
            "/",
            "list",
            route_fn::<Second, _>(|_c, _args| {
                Box::pin(async { Ok(HandlerReturn::Undefined) })
            }),
        );

        let mut server = Server::new();
        server.use_global(counting);
        server.register(&store, &[id]).unwrap();
        server.register(&store2, &[id2]).unwrap();

        let response = server
            .handle(HttpRequest::new("GET".to_string(), "/widgets".to_string()))
            .await;
        assert_eq!(response.status, 200);
        // Mounted once; both register calls saw it only as a dedup seed.
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
