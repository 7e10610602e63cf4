use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode, header};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

impl RemoteRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, None)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path, Some(body))
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path, Some(body))
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path, None)
    }

    fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            authorization: None,
            body,
        }
    }

    pub fn with_authorization(mut self, authorization: Option<String>) -> Self {
        self.authorization = authorization;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: StatusCode,
    pub body: Value,
}

#[derive(Debug)]
pub enum TransportError {
    Timeout,
    Http(reqwest::Error),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "remote request timed out"),
            TransportError::Http(err) => write!(f, "remote HTTP error: {}", err),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Http(value)
        }
    }
}

/// Outbound request seam between the stores and the remote API.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: String, timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(TransportError::Http)?;

        Ok(Self { base_url, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError> {
        let mut builder = self.http.request(request.method, self.url(&request.path));
        if let Some(authorization) = request.authorization {
            builder = builder.header(header::AUTHORIZATION, authorization);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        // Proxies in front of the API answer some failures with HTML.
        let body = serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::Null);

        Ok(RemoteResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path_without_double_slash() {
        let transport = HttpTransport::new("http://api.local/".to_string(), None)
            .expect("transport should build");
        assert_eq!(transport.url("/drinks"), "http://api.local/drinks");
    }

    #[test]
    fn builders_set_method_and_body() {
        let req = RemoteRequest::patch("/baristas/u1", serde_json::json!({"toFireBarista": false}))
            .with_authorization(Some("Bearer t".to_string()));
        assert_eq!(req.method, Method::PATCH);
        assert_eq!(req.authorization.as_deref(), Some("Bearer t"));
        assert!(req.body.is_some());

        let req = RemoteRequest::delete("/drinks/3");
        assert_eq!(req.method, Method::DELETE);
        assert!(req.body.is_none());
    }
}
