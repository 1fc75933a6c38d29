// HTTP request and response types, plus the shared per-request handles
// passed through composed chains.

use crate::ErrorValue;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

/// HTTP verb for route declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Parse a verb from its wire form (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "DELETE" => Some(HttpMethod::Delete),
            "PATCH" => Some(HttpMethod::Patch),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            _ => None,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP request data.
///
/// Header names are stored lowercase, matching what the serving layer
/// produces. `parsed_body` is the slot body-decoding middleware writes into;
/// it starts empty and is filled at most once per request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub path_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub parsed_body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn new(method: String, path: String) -> Self {
        Self {
            method,
            path,
            headers: HashMap::new(),
            body: Vec::new(),
            path_params: HashMap::new(),
            query_params: HashMap::new(),
            parsed_body: None,
        }
    }

    /// Parse the raw request body as JSON.
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ErrorValue> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ErrorValue::with_status(400, format!("invalid JSON body: {}", e)))
    }

    /// Get a path parameter by name.
    pub fn param(&self, name: &str) -> Option<&String> {
        self.path_params.get(name)
    }

    /// Get a query parameter by name.
    pub fn query(&self, name: &str) -> Option<&String> {
        self.query_params.get(name)
    }

    /// Get a header by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&String> {
        self.headers.get(&name.to_ascii_lowercase())
    }
}

/// Shared request handle.
///
/// Middleware mutates the request (decoded bodies, injected params), so the
/// chain passes a cheap-clone handle; the data lives on this one request and
/// never on composition-time structures.
#[derive(Clone)]
pub struct Request {
    inner: Arc<Mutex<HttpRequest>>,
}

impl Request {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            inner: Arc::new(Mutex::new(request)),
        }
    }

    /// Lock the underlying request data.
    ///
    /// The guard must not be held across an await point.
    pub fn parts(&self) -> MutexGuard<'_, HttpRequest> {
        self.inner.lock()
    }

    pub fn method(&self) -> String {
        self.parts().method.clone()
    }

    pub fn path(&self) -> String {
        self.parts().path.clone()
    }

    pub fn param(&self, name: &str) -> Option<String> {
        self.parts().path_params.get(name).cloned()
    }

    pub fn query(&self, name: &str) -> Option<String> {
        self.parts().query_params.get(name).cloned()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.parts().header(name).cloned()
    }

    pub fn parsed_body(&self) -> Option<serde_json::Value> {
        self.parts().parsed_body.clone()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.parts();
        f.debug_struct("Request")
            .field("method", &parts.method)
            .field("path", &parts.path)
            .finish()
    }
}

/// A readable byte stream a handler can return to have it piped to the
/// response instead of buffered by the send policy.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

#[derive(Debug)]
struct ResponseState {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    sent: bool,
    piping: bool,
}

/// Shared response handle.
///
/// Many chain links (middleware, the synthesized handler, error handlers) and
/// possibly user code racing a slow handler all observe the same response, so
/// the state sits behind a mutex and `headers_sent` is checked before every
/// send.
#[derive(Clone)]
pub struct Response {
    inner: Arc<Mutex<ResponseState>>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ResponseState {
                status: 200,
                headers: HashMap::new(),
                body: Vec::new(),
                sent: false,
                piping: false,
            })),
        }
    }

    pub fn status(&self) -> u16 {
        self.inner.lock().status
    }

    pub fn set_status(&self, status: u16) {
        self.inner.lock().status = status;
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.inner.lock().headers.get(name).cloned()
    }

    pub fn set_header(&self, name: &str, value: &str) {
        self.inner
            .lock()
            .headers
            .insert(name.to_string(), value.to_string());
    }

    /// Whether the response has been sent.
    pub fn headers_sent(&self) -> bool {
        self.inner.lock().sent
    }

    /// Whether a stream is actively piping into the response.
    pub fn is_piping(&self) -> bool {
        self.inner.lock().piping
    }

    /// Send a raw body. Returns false (and leaves the response untouched)
    /// when it was already sent.
    pub fn send_bytes(&self, body: Vec<u8>) -> bool {
        let mut state = self.inner.lock();
        if state.sent {
            return false;
        }
        state
            .headers
            .entry("Content-Type".to_string())
            .or_insert_with(|| "application/octet-stream".to_string());
        state.body = body;
        state.sent = true;
        true
    }

    /// Send a text body.
    pub fn send_text(&self, body: &str) -> bool {
        let mut state = self.inner.lock();
        if state.sent {
            return false;
        }
        state
            .headers
            .entry("Content-Type".to_string())
            .or_insert_with(|| "text/plain; charset=utf-8".to_string());
        state.body = body.as_bytes().to_vec();
        state.sent = true;
        true
    }

    /// Send a JSON body.
    pub fn send_json(&self, value: &serde_json::Value) -> Result<bool, ErrorValue> {
        let encoded = serde_json::to_vec(value)
            .map_err(|e| ErrorValue::internal(format!("JSON encoding failed: {}", e)))?;
        let mut state = self.inner.lock();
        if state.sent {
            return Ok(false);
        }
        state
            .headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        state.body = encoded;
        state.sent = true;
        Ok(true)
    }

    /// Send with an empty body, keeping the current status.
    pub fn send_empty(&self) -> bool {
        let mut state = self.inner.lock();
        if state.sent {
            return false;
        }
        state.body = Vec::new();
        state.sent = true;
        true
    }

    /// Pipe a byte stream into the response.
    ///
    /// While the stream is draining, `is_piping()` reports true; once it
    /// completes the response is marked sent.
    pub async fn pipe(&self, mut stream: BodyStream) -> Result<(), ErrorValue> {
        {
            let mut state = self.inner.lock();
            if state.sent {
                return Ok(());
            }
            state.piping = true;
        }
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    self.inner.lock().body.extend_from_slice(&bytes);
                }
                Err(e) => {
                    let mut state = self.inner.lock();
                    state.piping = false;
                    return Err(ErrorValue::internal(format!("stream error: {}", e)));
                }
            }
        }
        let mut state = self.inner.lock();
        state.piping = false;
        state.sent = true;
        Ok(())
    }

    /// Materialize the response for the serving layer.
    pub fn snapshot(&self) -> HttpResponse {
        let state = self.inner.lock();
        HttpResponse {
            status: state.status,
            headers: state.headers.clone(),
            body: state.body.clone(),
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Response")
            .field("status", &state.status)
            .field("sent", &state.sent)
            .field("piping", &state.piping)
            .finish()
    }
}

/// Materialized HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn internal_server_error() -> Self {
        Self::new(500)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, ErrorValue> {
        self.body = serde_json::to_vec(value)
            .map_err(|e| ErrorValue::internal(format!("JSON encoding failed: {}", e)))?;
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Parse the body as JSON, for assertions and client glue.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}
