//! Blocking HTTP transport

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use super::{Method, Request, Response, Transport, TransportError, API_KEY_HEADER};

/// HTTP transport rooted at the configured API URL.
///
/// Requests carry no timeout of their own. The blocking client's 30 second
/// default is switched off; callers needing a limit wrap the call externally.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("tally/", env!("CARGO_PKG_VERSION")))
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<String, TransportError> {
        if !path.starts_with('/') {
            return Err(TransportError::InvalidRequest(format!(
                "path must be absolute: {path}"
            )));
        }
        Ok(format!("{}{}", self.base_url, path))
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: &Request) -> Result<Response, TransportError> {
        let url = self.url(&request.path)?;
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        }
        .header(API_KEY_HEADER, &self.api_key);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        tracing::debug!(method = request.method.as_str(), %url, "sending request");
        let response = builder.send().map_err(|e| {
            if e.is_connect() {
                TransportError::ConnectionFailed(e.to_string())
            } else {
                TransportError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        let body = response.bytes()?.to_vec();
        tracing::debug!(status, bytes = body.len(), "received response");
        Ok(Response { status, body })
    }
}
