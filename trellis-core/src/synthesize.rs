// Handler synthesis.
//
// A synthesized handler adapts one user method to the chain signature:
// extract declared parameters, invoke the method on the controller instance,
// then apply the route's resolved send policy to whatever came back. Every
// failure (extraction, the method itself, encoding) is returned as an
// `ErrorValue` so the dispatcher can feed it to the error-handler chain;
// nothing escapes as a panic.

use crate::descriptor::{
    ControllerInstance, HandlerArgs, ParamInjector, RouteDescriptor, SendPolicy,
};
use crate::{BodyStream, BoxFuture, ErrorValue, Request, Response};
use serde_json::Value;
use std::sync::Arc;

/// What a user method produced.
pub enum HandlerReturn {
    /// No value at all.
    Undefined,
    /// An explicit JSON null.
    Null,
    /// A JSON value to encode.
    Json(Value),
    /// A plain string.
    Text(String),
    /// A raw byte body.
    Bytes(Vec<u8>),
    /// A byte stream to pipe into the response.
    Stream(BodyStream),
    /// The live response handle itself. Only legal when the response was
    /// already sent or is actively piping.
    Response,
}

impl std::fmt::Debug for HandlerReturn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerReturn::Undefined => write!(f, "Undefined"),
            HandlerReturn::Null => write!(f, "Null"),
            HandlerReturn::Json(v) => write!(f, "Json({})", v),
            HandlerReturn::Text(t) => write!(f, "Text({:?})", t),
            HandlerReturn::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            HandlerReturn::Stream(_) => write!(f, "Stream"),
            HandlerReturn::Response => write!(f, "Response"),
        }
    }
}

/// The chain-facing shape of a synthesized handler. `Ok(())` means the route
/// ran (whether or not it sent anything); `Err` enters the error chain.
pub(crate) type SynthesizedHandler =
    Arc<dyn Fn(Request, Response) -> BoxFuture<Result<(), ErrorValue>> + Send + Sync>;

/// Build the chain handler for one route.
pub(crate) fn synthesize(
    route: &RouteDescriptor,
    instance: ControllerInstance,
    injectors: Vec<ParamInjector>,
    policy: Option<SendPolicy>,
    controller_name: &'static str,
) -> SynthesizedHandler {
    let handler = route.handler.clone();
    let member = route.member;
    let injectors = Arc::new(injectors);

    Arc::new(move |req: Request, res: Response| {
        let handler = handler.clone();
        let instance = instance.clone();
        let injectors = injectors.clone();

        Box::pin(async move {
            // Extraction is synchronous and completes before the handler may
            // suspend; the lock is released before any await.
            let args = if injectors.is_empty() {
                HandlerArgs::Raw(req.clone(), res.clone())
            } else {
                let mut values = Vec::with_capacity(injectors.len());
                {
                    let parts = req.parts();
                    for injector in injectors.iter() {
                        values.push(injector.extract(&parts, &res)?);
                    }
                }
                HandlerArgs::Injected(values)
            };

            let returned = handler(instance, args).await?;

            apply_send_policy(returned, &res, policy, controller_name, member).await
        })
    })
}

/// Apply the resolved send policy to a handler's return value.
///
/// The "already sent" check happens here, after the handler resumed from any
/// await: a concurrent writer to the same response wins and the policy backs
/// off silently.
async fn apply_send_policy(
    returned: HandlerReturn,
    res: &Response,
    policy: Option<SendPolicy>,
    controller_name: &'static str,
    member: &'static str,
) -> Result<(), ErrorValue> {
    if let HandlerReturn::Response = returned {
        // Returning the live response is only meaningful when it already
        // carries data. Anything else is programmer error and fails loudly
        // instead of serializing the handle.
        if res.headers_sent() || res.is_piping() {
            return Ok(());
        }
        return Err(ErrorValue::internal(format!(
            "{}.{} returned the response handle without sending or piping",
            controller_name, member
        )));
    }

    if res.headers_sent() {
        return Ok(());
    }

    let Some(policy) = policy else {
        // No policy resolved: the handler is responsible for sending.
        return Ok(());
    };

    match returned {
        HandlerReturn::Undefined => {
            if let Some(status) = policy.undefined_status.or(policy.status) {
                res.set_status(status);
            }
            res.send_empty();
        }
        HandlerReturn::Null => {
            if let Some(status) = policy.null_status {
                res.set_status(status);
                res.send_empty();
            } else {
                if let Some(status) = policy.status {
                    res.set_status(status);
                }
                res.send_json(&Value::Null)?;
            }
        }
        HandlerReturn::Json(value) => {
            if let Some(status) = policy.status {
                res.set_status(status);
            }
            res.send_json(&value)?;
        }
        HandlerReturn::Text(text) => {
            if let Some(status) = policy.status {
                res.set_status(status);
            }
            if policy.json {
                res.send_json(&Value::String(text))?;
            } else {
                res.send_text(&text);
            }
        }
        HandlerReturn::Bytes(bytes) => {
            if let Some(status) = policy.status {
                res.set_status(status);
            }
            res.send_bytes(bytes);
        }
        HandlerReturn::Stream(stream) => {
            if let Some(status) = policy.status {
                res.set_status(status);
            }
            res.pipe(stream).await?;
        }
        HandlerReturn::Response => unreachable!(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::route_fn;
    use crate::{HttpMethod, HttpRequest};
    use bytes::Bytes;

    struct Widgets;

    fn request() -> Request {
        Request::new(HttpRequest::new("GET".to_string(), "/widgets".to_string()))
    }

    fn route_returning<F>(f: F) -> RouteDescriptor
    where
        F: Fn() -> HandlerReturn + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        RouteDescriptor {
            verb: HttpMethod::Get,
            path: "/".to_string(),
            member: "list",
            handler: route_fn::<Widgets, _>(move |_c, _args| {
                let f = f.clone();
                Box::pin(async move { Ok(f()) })
            }),
        }
    }

    fn synthesized<F>(f: F, policy: Option<SendPolicy>) -> SynthesizedHandler
    where
        F: Fn() -> HandlerReturn + Send + Sync + 'static,
    {
        synthesize(
            &route_returning(f),
            Arc::new(Widgets),
            Vec::new(),
            policy,
            "Widgets",
        )
    }

    #[tokio::test]
    async fn test_null_status_applied() {
        let policy = SendPolicy::new().null_status(204).undefined_status(404);
        let handler = synthesized(|| HandlerReturn::Null, Some(policy));
        let res = Response::new();
        handler(request(), res.clone()).await.unwrap();
        let snap = res.snapshot();
        assert_eq!(snap.status, 204);
        assert!(snap.body.is_empty());
    }

    #[tokio::test]
    async fn test_undefined_status_applied() {
        let policy = SendPolicy::new().null_status(204).undefined_status(404);
        let handler = synthesized(|| HandlerReturn::Undefined, Some(policy));
        let res = Response::new();
        handler(request(), res.clone()).await.unwrap();
        let snap = res.snapshot();
        assert_eq!(snap.status, 404);
        assert!(snap.body.is_empty());
    }

    #[tokio::test]
    async fn test_json_value_with_default_status() {
        let policy = SendPolicy::new().status(201);
        let handler = synthesized(
            || HandlerReturn::Json(serde_json::json!({"foo": 1})),
            Some(policy),
        );
        let res = Response::new();
        handler(request(), res.clone()).await.unwrap();
        let snap = res.snapshot();
        assert_eq!(snap.status, 201);
        assert_eq!(snap.json_body(), Some(serde_json::json!({"foo": 1})));
    }

    #[tokio::test]
    async fn test_json_value_without_status_keeps_200() {
        let handler = synthesized(
            || HandlerReturn::Json(serde_json::json!({"foo": 1})),
            Some(SendPolicy::new()),
        );
        let res = Response::new();
        handler(request(), res.clone()).await.unwrap();
        assert_eq!(res.snapshot().status, 200);
    }

    #[tokio::test]
    async fn test_text_forced_json() {
        let handler = synthesized(
            || HandlerReturn::Text("plain".to_string()),
            Some(SendPolicy::new().json()),
        );
        let res = Response::new();
        handler(request(), res.clone()).await.unwrap();
        let snap = res.snapshot();
        assert_eq!(
            snap.headers.get("Content-Type"),
            Some(&"application/json".to_string())
        );
        assert_eq!(snap.body, b"\"plain\"".to_vec());
    }

    #[tokio::test]
    async fn test_text_sent_as_is_without_force() {
        let handler = synthesized(
            || HandlerReturn::Text("plain".to_string()),
            Some(SendPolicy::new()),
        );
        let res = Response::new();
        handler(request(), res.clone()).await.unwrap();
        assert_eq!(res.snapshot().body, b"plain".to_vec());
    }

    #[tokio::test]
    async fn test_no_policy_means_no_send() {
        let handler = synthesized(
            || HandlerReturn::Json(serde_json::json!({"foo": 1})),
            None,
        );
        let res = Response::new();
        handler(request(), res.clone()).await.unwrap();
        assert!(!res.headers_sent());
    }

    #[tokio::test]
    async fn test_already_sent_bypass() {
        let handler = synthesized(
            || HandlerReturn::Json(serde_json::json!({"late": true})),
            Some(SendPolicy::new().status(201)),
        );
        let res = Response::new();
        res.send_text("mine");
        handler(request(), res.clone()).await.unwrap();
        let snap = res.snapshot();
        assert_eq!(snap.status, 200);
        assert_eq!(snap.body, b"mine".to_vec());
    }

    #[tokio::test]
    async fn test_stream_return_pipes() {
        let handler = synthesized(
            || {
                let chunks: Vec<Result<Bytes, std::io::Error>> =
                    vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
                HandlerReturn::Stream(Box::pin(tokio_stream::iter(chunks)))
            },
            Some(SendPolicy::new()),
        );
        let res = Response::new();
        handler(request(), res.clone()).await.unwrap();
        assert_eq!(res.snapshot().body, b"abcd".to_vec());
    }

    #[tokio::test]
    async fn test_live_response_return_without_send_fails() {
        let handler = synthesized(|| HandlerReturn::Response, Some(SendPolicy::new()));
        let res = Response::new();
        let err = handler(request(), res).await.unwrap_err();
        match err {
            ErrorValue::Internal(m) => assert!(m.contains("Widgets.list")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_live_response_return_after_send_is_fine() {
        let handler = synthesized(|| HandlerReturn::Response, Some(SendPolicy::new()));
        let res = Response::new();
        res.send_text("sent by handler");
        handler(request(), res.clone()).await.unwrap();
        assert_eq!(res.snapshot().body, b"sent by handler".to_vec());
    }

    #[tokio::test]
    async fn test_injected_values_in_index_order() {
        let route = RouteDescriptor {
            verb: HttpMethod::Get,
            path: "/:id".to_string(),
            member: "show",
            handler: route_fn::<Widgets, _>(|_c, args| {
                Box::pin(async move {
                    match args {
                        HandlerArgs::Injected(values) => {
                            Ok(HandlerReturn::Json(Value::Array(values)))
                        }
                        HandlerArgs::Raw(..) => Err(ErrorValue::internal("expected injection")),
                    }
                })
            }),
        };
        let injectors = vec![
            ParamInjector::path_param(0, "id"),
            ParamInjector::query_param(1, "page"),
        ];
        let handler = synthesize(
            &route,
            Arc::new(Widgets),
            injectors,
            Some(SendPolicy::new()),
            "Widgets",
        );

        let req = request();
        {
            let mut parts = req.parts();
            parts.path_params.insert("id".to_string(), "7".to_string());
            parts.query_params.insert("page".to_string(), "2".to_string());
        }
        let res = Response::new();
        handler(req, res.clone()).await.unwrap();
        assert_eq!(
            res.snapshot().json_body(),
            Some(serde_json::json!(["7", "2"]))
        );
    }

    #[tokio::test]
    async fn test_extraction_failure_enters_error_path() {
        let route = route_returning(|| HandlerReturn::Undefined);
        let injectors = vec![ParamInjector::new(0, |_req, _res| {
            Err(ErrorValue::with_status(422, "bad input"))
        })];
        let handler = synthesize(&route, Arc::new(Widgets), injectors, None, "Widgets");
        let err = handler(request(), Response::new()).await.unwrap_err();
        assert_eq!(err.explicit_status(), Some(422));
    }

    #[tokio::test]
    async fn test_raw_args_passed_through() {
        let route = RouteDescriptor {
            verb: HttpMethod::Post,
            path: "/".to_string(),
            member: "create",
            handler: route_fn::<Widgets, _>(|_c, args| {
                Box::pin(async move {
                    match args {
                        HandlerArgs::Raw(_req, res) => {
                            res.set_status(202);
                            res.send_text("accepted");
                            Ok(HandlerReturn::Undefined)
                        }
                        HandlerArgs::Injected(_) => Err(ErrorValue::internal("expected raw")),
                    }
                })
            }),
        };
        let handler = synthesize(&route, Arc::new(Widgets), Vec::new(), None, "Widgets");
        let res = Response::new();
        handler(request(), res.clone()).await.unwrap();
        assert_eq!(res.snapshot().status, 202);
    }
}
