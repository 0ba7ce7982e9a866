use std::{fmt, future::Future};

use bytes::Bytes;
use reqwest::{
    header::{self, HeaderMap},
    Method,
};

use crate::{CancellationToken, DispositionMode, TransportError};

/// What the caller wants done with a binary response.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResponseExpectation {
    /// Pass binary media types through as bytes instead of parsing them.
    pub stream_binary: bool,
    /// Identifier the suggested download filename is derived from.
    pub resource_id: Option<String>,
    pub disposition: DispositionMode,
}

impl ResponseExpectation {
    pub fn binary(resource_id: impl Into<String>) -> Self {
        Self {
            stream_binary: true,
            resource_id: Some(resource_id.into()),
            disposition: DispositionMode::Attachment,
        }
    }
}

/// A request handed to a [`Transport`].
#[derive(Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    /// Forwarded verbatim as the `Authorization` header.
    pub authorization: Option<String>,
    pub body: Option<Bytes>,
    pub expectation: ResponseExpectation,
}

impl fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "<redacted>"),
            )
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("expectation", &self.expectation)
            .finish()
    }
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            authorization: None,
            body: None,
            expectation: ResponseExpectation::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a JSON body and the matching content type.
    pub fn with_json(mut self, value: &serde_json::Value) -> Self {
        self.headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        self.body = Some(Bytes::from(value.to_string()));
        self
    }

    pub fn with_expectation(mut self, expectation: ResponseExpectation) -> Self {
        self.expectation = expectation;
        self
    }
}

/// A completed response as returned by the transport.
#[derive(Clone, Debug, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        if let Ok(value) = header::HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

/// Outbound call transport.
///
/// Implementations should stop work once `cancel` is cancelled, but the
/// caller never relies on it: a result produced after cancellation is
/// discarded.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &OutboundRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &OutboundRequest,
        cancel: CancellationToken,
    ) -> Result<RawResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if let Some(authorization) = &request.authorization {
            builder = builder.header(header::AUTHORIZATION, authorization);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, TransportError>(RawResponse {
                status,
                headers,
                body,
            })
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = exchange => result,
        }
    }
}
