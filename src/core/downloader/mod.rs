use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::LOCATION;
use serde::Serialize;
use url::Url;

use crate::core::cancellation::CancellationToken;
use crate::core::config::NetworkTuning;
use crate::core::error::TransportError;

#[cfg(test)]
pub(crate) mod testing;

/// How many redirects a download may follow before it is refused.
pub const MAX_REDIRECT_DEPTH: u32 = 3;

/// Receives `(bytes_received, total)` while a body streams in; `total` is zero
/// when the server sent no length. Returning `false` aborts the transfer.
pub type ProgressCallback<'a> = &'a (dyn Fn(u64, u64) -> bool + Send + Sync);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json<T: Serialize>(url: impl Into<String>, body: &T) -> Result<Self, TransportError> {
        Ok(Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(serde_json::to_vec(body)?),
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// Zero means the request never produced an HTTP response.
    pub status: u16,
    pub location: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            location: None,
            body: body.into(),
        }
    }

    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self {
            status,
            location: Some(location.into()),
            body: Vec::new(),
        }
    }

    pub fn transport_failure() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        request: HttpRequest,
        progress: Option<ProgressCallback<'_>>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError>;
}

/// Transport over a shared `reqwest` client. Redirects are never followed
/// here; callers that want them use [`fetch_following_redirects`].
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(tuning: &NetworkTuning) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(tuning.connect_timeout_secs))
            .timeout(Duration::from_secs(tuning.request_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("halley-launcher/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: HttpRequest,
        progress: Option<ProgressCallback<'_>>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = match method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            response = builder.send() => response?,
        };

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let total = response.content_length().unwrap_or(0);

        let mut received = Vec::new();
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            received.extend_from_slice(&chunk?);
            if let Some(progress) = progress {
                if !progress(received.len() as u64, total) {
                    tracing::debug!(url = %url, "download aborted by progress receiver");
                    return Err(TransportError::Aborted);
                }
            }
        }

        Ok(HttpResponse {
            status,
            location,
            body: received,
        })
    }
}

/// Issues a GET and re-issues it against each redirect target, up to
/// `max_depth` redirects. A redirect received at `max_depth` is refused.
/// Non-redirect responses are returned as they are, whatever their status.
pub async fn fetch_following_redirects(
    transport: &dyn HttpTransport,
    url: &str,
    max_depth: u32,
    progress: Option<ProgressCallback<'_>>,
    cancel: &CancellationToken,
) -> Result<HttpResponse, TransportError> {
    let mut current = url.to_string();
    let mut depth = 0;
    loop {
        let response = transport
            .send(HttpRequest::get(current.clone()), progress, cancel)
            .await?;
        if !response.is_redirect() {
            return Ok(response);
        }
        if depth >= max_depth {
            return Err(TransportError::TooManyRedirects {
                url: url.to_string(),
                limit: max_depth,
            });
        }

        let location = response
            .location
            .as_deref()
            .ok_or_else(|| TransportError::MissingLocation {
                url: current.clone(),
            })?;
        let next = resolve_location(&current, location)?;
        tracing::debug!(from = %current, to = %next, depth, "following redirect");
        current = next;
        depth += 1;
    }
}

fn resolve_location(current: &str, location: &str) -> Result<String, TransportError> {
    let base = Url::parse(current).map_err(|source| TransportError::InvalidUrl {
        url: current.to_string(),
        source,
    })?;
    base.join(location)
        .map(String::from)
        .map_err(|source| TransportError::InvalidUrl {
            url: location.to_string(),
            source,
        })
}
