//! Transport layer for the comparison service
//!
//! Abstracts HTTP for testability:
//! - [`Transport`]: request/response interface the client talks to
//! - [`HttpTransport`]: blocking HTTP via `reqwest`
//! - [`MockTransport`]: scripted in-process responses for tests

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::MockTransport;

/// Header carrying the API key on every request
pub const API_KEY_HEADER: &str = "X-Tally-API-Key";

/// Header selecting synchronous or asynchronous submission processing
pub const SUBMISSION_MODE_HEADER: &str = "X-Tally-Submission-Mode";

/// HTTP method subset used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A request relative to the configured API root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Path beginning with `/`
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            headers: Vec::new(),
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(path)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and raw body of a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A `204 No Content` reply
    pub fn no_content() -> Self {
        Self::new(204, Vec::new())
    }

    /// A `200 OK` reply carrying `json`
    pub fn json(json: &serde_json::Value) -> Self {
        Self::new(200, json.to_string())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Transport trait for talking to the comparison service
pub trait Transport: Send + Sync {
    /// Execute a request and return the reply, whatever its status
    fn execute(&self, request: &Request) -> Result<Response, TransportError>;
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let request = Request::post("/client/submit")
            .with_header(SUBMISSION_MODE_HEADER, "sync")
            .with_body("application/octet-stream", vec![1, 2, 3]);
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/client/submit");
        assert_eq!(request.header("x-tally-submission-mode"), Some("sync"));
        assert_eq!(
            request.content_type.as_deref(),
            Some("application/octet-stream")
        );
        assert_eq!(request.body, vec![1, 2, 3]);
        assert_eq!(Request::get("/x").method.as_str(), "GET");
    }

    #[test]
    fn test_response_helpers() {
        let response = Response::json(&serde_json::json!({"a": 1}));
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), r#"{"a":1}"#);
        assert_eq!(Response::no_content().status, 204);
    }
}
