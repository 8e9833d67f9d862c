//! Outbound forwarding to resolved backends.

use std::time::{Duration, Instant};

use actix_web::HttpResponse;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH};
use reqwest::{Method, StatusCode};

use crate::error::GatewayError;
use crate::metrics::{PROXY_LATENCY, PROXY_REQUESTS_TOTAL};
use crate::pipeline::ProxyContext;
use crate::routing::ResolvedTarget;

mod race;

pub use race::race;

/// Request headers never copied to the backend. Content-Length is
/// recomputed from the buffered body.
const HEADERS_TO_STRIP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
    "transfer-encoding",
    "content-length",
];

/// Upstream response headers not relayed to the client. The gateway's own
/// CORS layer is the only source of CORS headers.
const RESPONSE_HEADERS_TO_DROP: &[&str] = &[
    "connection",
    "keep-alive",
    "trailer",
    "upgrade",
    "transfer-encoding",
    "content-length",
    "access-control-allow-origin",
    "access-control-allow-methods",
    "access-control-allow-headers",
    "access-control-allow-credentials",
    "access-control-expose-headers",
    "access-control-max-age",
];

/// Fully buffered backend response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    /// Relay the backend status, end-to-end headers and body.
    pub fn into_http_response(self) -> HttpResponse {
        let status = actix_web::http::StatusCode::from_u16(self.status.as_u16())
            .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
        let mut builder = HttpResponse::build(status);

        for (name, value) in self.headers.iter() {
            if RESPONSE_HEADERS_TO_DROP.contains(&name.as_str()) {
                continue;
            }
            if let Ok(value) = actix_web::http::header::HeaderValue::from_bytes(value.as_bytes()) {
                builder.append_header((name.as_str(), value));
            }
        }

        builder.body(self.body)
    }
}

/// Build the outbound request: original method, filtered headers, buffered
/// body.
pub(crate) fn build_request(
    client: &reqwest::Client,
    ctx: &ProxyContext,
    url: &str,
    timeout: Option<Duration>,
) -> reqwest::RequestBuilder {
    let mut headers = HeaderMap::with_capacity(ctx.headers.len());
    for (name, value) in ctx.headers.iter() {
        if !HEADERS_TO_STRIP.contains(&name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    // An empty body sends no length on its own; keep an explicit zero when
    // the caller declared one or the method carries a body.
    if ctx.body.is_empty()
        && (ctx.headers.contains_key(CONTENT_LENGTH) || declares_body(&ctx.method))
    {
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    }

    let mut builder = client.request(ctx.method.clone(), url).headers(headers);
    if !ctx.body.is_empty() {
        builder = builder.body(ctx.body.clone());
    }
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
}

fn declares_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Send one request and buffer the whole response.
pub(crate) async fn execute(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<UpstreamResponse, GatewayError> {
    let response = request.send().await.map_err(|e| classify(url, e))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(|e| classify(url, e))?;

    Ok(UpstreamResponse {
        status,
        headers,
        body,
    })
}

fn classify(url: &str, e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::UpstreamTimeout(format!("{url}: {e}"))
    } else {
        GatewayError::UpstreamUnavailable(format!("{url}: {e}"))
    }
}

/// Forward the request to a single resolved target. One attempt, no retry.
pub async fn forward(
    client: &reqwest::Client,
    ctx: &ProxyContext,
    target: &ResolvedTarget,
    timeout: Option<Duration>,
) -> Result<UpstreamResponse, GatewayError> {
    let url = target.outbound_url(ctx.query.as_deref());
    tracing::info!(method = %ctx.method, url = %url, "forwarding request");

    PROXY_REQUESTS_TOTAL.inc();
    let started = Instant::now();
    let request = build_request(client, ctx, &url, timeout);
    let result = execute(request, &url).await;
    PROXY_LATENCY.observe(started.elapsed().as_secs_f64());

    let response = result?;
    tracing::info!(url = %url, status = %response.status, "backend responded");
    Ok(response)
}
