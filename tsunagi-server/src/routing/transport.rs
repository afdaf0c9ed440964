//! Outbound HTTP to FHIR servers

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, Method};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::error::RouteError;

/// Inbound headers forwarded to upstream servers; everything else is dropped
pub const PROXY_HEADERS: [HeaderName; 3] = [
    header::AUTHORIZATION,
    header::CACHE_CONTROL,
    header::CONTENT_TYPE,
];

/// Keep only the headers in [`PROXY_HEADERS`]
pub fn proxy_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for name in PROXY_HEADERS {
        for value in headers.get_all(&name) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// One call to an upstream server
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Absolute URL, query included
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// Status and decoded JSON body of an upstream answer
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Failed(String),

    #[error("response body is not JSON: {0}")]
    Decode(String),
}

impl TransportError {
    /// Attach the name of the source that was being called
    pub fn into_route_error(self, source_name: &str) -> RouteError {
        match self {
            TransportError::Timeout => RouteError::Timeout {
                source_name: source_name.to_string(),
            },
            TransportError::Failed(detail) | TransportError::Decode(detail) => {
                RouteError::Transport {
                    source_name: source_name.to_string(),
                    detail,
                }
            }
        }
    }
}

/// Performs outbound calls; one call per `send`, no retries
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, TransportError>;
}

/// `reqwest`-backed transport with a per-call timeout
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        Ok(Self { client })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Failed(e.to_string())
    }
}

/// Upstream bodies are decoded only when they declare a JSON media type
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("json"))
        .unwrap_or(false)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let json = is_json(response.headers());
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;

        let body = if json && !bytes.is_empty() {
            Some(
                serde_json::from_slice(&bytes)
                    .map_err(|e| TransportError::Decode(e.to_string()))?,
            )
        } else {
            None
        };

        tracing::debug!(url = %request.url, status, "Upstream responded");
        Ok(UpstreamResponse { status, body })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Canned responses keyed by URL prefix; records every call
    #[derive(Default)]
    pub struct FakeTransport {
        routes: Vec<(String, Result<UpstreamResponse, fn() -> TransportError>)>,
        calls: Mutex<Vec<OutboundRequest>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer calls whose URL starts with `prefix`; first match wins
        pub fn respond(mut self, prefix: &str, status: u16, body: Option<Value>) -> Self {
            self.routes
                .push((prefix.to_string(), Ok(UpstreamResponse { status, body })));
            self
        }

        pub fn fail(mut self, prefix: &str, error: fn() -> TransportError) -> Self {
            self.routes.push((prefix.to_string(), Err(error)));
            self
        }

        pub fn calls(&self) -> Vec<OutboundRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub fn urls(&self) -> Vec<String> {
            self.calls().into_iter().map(|c| c.url).collect()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(
            &self,
            request: OutboundRequest,
        ) -> Result<UpstreamResponse, TransportError> {
            self.calls.lock().unwrap().push(request.clone());
            let route = self
                .routes
                .iter()
                .find(|(prefix, _)| request.url.starts_with(prefix.as_str()));
            match route {
                Some((_, Ok(response))) => Ok(response.clone()),
                Some((_, Err(error))) => Err(error()),
                None => Ok(UpstreamResponse {
                    status: 404,
                    body: None,
                }),
            }
        }
    }
}
