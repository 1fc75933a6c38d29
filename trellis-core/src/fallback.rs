// Global fallback error handler.
//
// Appended once per `register` call, after every controller is mounted, so
// an error that no method-level or class-level handler claims still produces
// a response. The handle carries a stable sentinel name: when the caller
// later registers a terminal error handler of their own, the engine finds
// the fallback by that name in the mounted chain and drops it, instead of
// intercepting the mounting calls themselves.

use crate::negotiate::Accept;
use crate::{ErrorHandler, ErrorValue, Request, Response};
use serde_json::{json, Value};

/// Sentinel name identifying the engine-supplied fallback handler.
pub const FALLBACK_HANDLER_NAME: &str = "trellis_fallback";

/// Whether a mounted error handler is the engine's fallback.
pub fn is_fallback(handler: &ErrorHandler) -> bool {
    handler.name() == Some(FALLBACK_HANDLER_NAME)
}

/// Build the fallback handler.
pub fn fallback_error_handler() -> ErrorHandler {
    ErrorHandler::named(FALLBACK_HANDLER_NAME, |err, req, res| {
        Box::pin(async move {
            if res.headers_sent() {
                // Too late to render anything; hand the error back to the
                // transport's own default handling.
                return Err(err);
            }

            let (status, message, payload) = normalize(&err, &res);
            tracing::error!(status, error = %err, "unhandled request error");

            res.set_status(status);
            if render_as_json(&req, &res) {
                let body = payload.unwrap_or_else(|| {
                    json!({ "status": status, "message": message })
                });
                res.send_json(&body)?;
            } else {
                res.send_text(&format!("{} {}", status, message));
            }
            Ok(())
        })
    })
}

/// Normalize a heterogeneous error value into status, message, and (for
/// structured payloads) the JSON body to render verbatim.
///
/// Status priority: explicit status carried by the value, then a leading
/// numeric token in a string message, then the response's current status if
/// it already sits in the error range, then 500.
fn normalize(err: &ErrorValue, res: &Response) -> (u16, String, Option<Value>) {
    match err {
        ErrorValue::Status(status) => (*status, reason_phrase(*status).to_string(), None),
        ErrorValue::StatusMessage { status, message } => (*status, message.clone(), None),
        ErrorValue::Message(message) => match leading_status_token(message) {
            Some((status, rest)) => {
                let message = if rest.is_empty() {
                    reason_phrase(status).to_string()
                } else {
                    rest.to_string()
                };
                (status, message, None)
            }
            None => (ambient_status(res), message.clone(), None),
        },
        ErrorValue::Payload(value) => {
            let status = err.explicit_status().unwrap_or_else(|| ambient_status(res));
            let message = value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("error")
                .to_string();
            (status, message, Some(value.clone()))
        }
        ErrorValue::Internal(message) => (ambient_status(res), message.clone(), None),
    }
}

/// The response's own status when it already signals an error, else 500.
fn ambient_status(res: &Response) -> u16 {
    let current = res.status();
    if (400..=599).contains(&current) {
        current
    } else {
        500
    }
}

/// Parse a status code from the front of a message ("404 no such widget"),
/// returning the code and the remainder with the token stripped.
fn leading_status_token(message: &str) -> Option<(u16, &str)> {
    let trimmed = message.trim_start();
    let digits: &str = trimmed
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or("");
    if digits.len() != 3 {
        return None;
    }
    let status: u16 = digits.parse().ok()?;
    if !(100..=599).contains(&status) {
        return None;
    }
    Some((status, trimmed[digits.len()..].trim_start()))
}

/// Canonical reason phrase for common statuses; errors carrying only a bare
/// number still render a readable message.
fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        418 => "I'm a teapot",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

fn render_as_json(req: &Request, res: &Response) -> bool {
    // The response's declared content type wins over the request's wishes.
    if let Some(content_type) = res.header("Content-Type") {
        return content_type.contains("application/json");
    }
    match req.header("accept") {
        Some(header) => Accept::parse(&header).prefers_json(),
        None => Accept::permissive().prefers_json(),
    }
}
