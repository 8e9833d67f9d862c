//! Per-request handler chain.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s followed by a terminal
//! [`Forwarder`]. Stages run in order on the way in and in reverse order on
//! the upstream response. All per-request data, including the resolved
//! target, travels in [`ProxyContext`].

use std::sync::Arc;
use std::time::Duration;

use actix_web::HttpRequest;
use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;

use crate::cipher::{self, KeyMaterial};
use crate::config::{ConfigError, ForwardingMode, GatewayConfig};
use crate::error::GatewayError;
use crate::metrics::AUTH_FAILURES_TOTAL;
use crate::proxy::{self, UpstreamResponse};
use crate::routing::{ResolvedTarget, RoutingTable};
use crate::tenant::{Tenant, TenantResolver};

pub const TOKEN_HEADER: &str = "token";
pub const COMPANY_HEADER: &str = "companyid";
pub const USER_ID_HEADER: &str = "userid";

/// Header names only the gateway may set. Client-supplied copies are
/// discarded when the context is built.
const INTERNAL_HEADERS: &[&str] = &[USER_ID_HEADER, "targeturl"];

/// Everything a stage may read or rewrite for one request.
#[derive(Debug, Clone)]
pub struct ProxyContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub tenant: Option<Tenant>,
    pub user_id: Option<u64>,
    pub target: Option<ResolvedTarget>,
}

impl ProxyContext {
    pub fn from_request(req: &HttpRequest, body: Bytes) -> Result<Self, GatewayError> {
        let method = Method::from_bytes(req.method().as_str().as_bytes())
            .map_err(|e| GatewayError::Internal(format!("unsupported method: {e}")))?;

        let mut headers = HeaderMap::with_capacity(req.headers().len());
        for (name, value) in req.headers() {
            if INTERNAL_HEADERS.contains(&name.as_str()) {
                continue;
            }
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) else {
                continue;
            };
            headers.append(name, value);
        }

        Ok(Self {
            method,
            path: req.path().to_string(),
            query: Some(req.query_string())
                .filter(|q| !q.is_empty())
                .map(String::from),
            headers,
            body,
            tenant: None,
            user_id: None,
            target: None,
        })
    }

    /// Header value as text, empty when absent or not valid UTF-8.
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

/// One step of the request pipeline.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle<'a>(&'a self, ctx: &'a mut ProxyContext) -> BoxFuture<'a, Result<(), GatewayError>>;

    /// Called with the upstream response, in reverse stage order.
    fn on_response(&self, _response: &mut UpstreamResponse) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Logs method, path and origin of every request.
pub struct LogRequest;

impl Stage for LogRequest {
    fn name(&self) -> &'static str {
        "log_request"
    }

    fn handle<'a>(&'a self, ctx: &'a mut ProxyContext) -> BoxFuture<'a, Result<(), GatewayError>> {
        tracing::info!(
            method = %ctx.method,
            path = %ctx.path,
            origin = %ctx.header("origin"),
            "received request"
        );
        future::ready(Ok(())).boxed()
    }
}

/// Replaces an encrypted `{"data": ...}` body with its JSON plaintext.
pub struct DecryptEnvelope {
    keys: Arc<KeyMaterial>,
}

impl DecryptEnvelope {
    pub fn new(keys: Arc<KeyMaterial>) -> Self {
        Self { keys }
    }
}

impl Stage for DecryptEnvelope {
    fn name(&self) -> &'static str {
        "decrypt_envelope"
    }

    fn handle<'a>(&'a self, ctx: &'a mut ProxyContext) -> BoxFuture<'a, Result<(), GatewayError>> {
        let result = if ctx.body.is_empty() {
            Ok(())
        } else {
            cipher::open_envelope(&ctx.body, &self.keys).map(|plaintext| {
                ctx.body = Bytes::from(plaintext);
                ctx.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            })
        };
        future::ready(result).boxed()
    }
}

/// Wraps the upstream response body into an encrypted envelope.
pub struct EncryptEnvelope {
    keys: Arc<KeyMaterial>,
}

impl EncryptEnvelope {
    pub fn new(keys: Arc<KeyMaterial>) -> Self {
        Self { keys }
    }
}

impl Stage for EncryptEnvelope {
    fn name(&self) -> &'static str {
        "encrypt_envelope"
    }

    fn handle<'a>(&'a self, _ctx: &'a mut ProxyContext) -> BoxFuture<'a, Result<(), GatewayError>> {
        future::ready(Ok(())).boxed()
    }

    fn on_response(&self, response: &mut UpstreamResponse) -> Result<(), GatewayError> {
        response.body = Bytes::from(cipher::seal_envelope(&response.body, &self.keys));
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.headers.remove(reqwest::header::CONTENT_ENCODING);
        Ok(())
    }
}

/// Validates `token`/`companyid` unless the path is excluded, then swaps
/// the token for the resolved `userid`.
pub struct Authenticate {
    resolver: TenantResolver,
    excluded_paths: Vec<String>,
}

impl Authenticate {
    pub fn new(resolver: TenantResolver, excluded_paths: Vec<String>) -> Self {
        Self {
            resolver,
            excluded_paths,
        }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths.iter().any(|p| path.starts_with(p.as_str()))
    }
}

impl Stage for Authenticate {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    fn handle<'a>(&'a self, ctx: &'a mut ProxyContext) -> BoxFuture<'a, Result<(), GatewayError>> {
        async move {
            if self.is_excluded(&ctx.path) {
                tracing::debug!(path = %ctx.path, "excluded path, skipping token validation");
                return Ok(());
            }

            let token = ctx.header(TOKEN_HEADER).to_string();
            let company_id = ctx.header(COMPANY_HEADER).to_string();
            if token.is_empty() || company_id.is_empty() {
                AUTH_FAILURES_TOTAL.inc();
                return Err(GatewayError::Unauthorized(format!(
                    "missing token or companyid header for {}",
                    ctx.path
                )));
            }

            let result = self
                .resolver
                .validate(&token, &company_id)
                .await
                .map_err(|e| {
                    AUTH_FAILURES_TOTAL.inc();
                    GatewayError::Unauthorized(format!("{} ({})", e, ctx.path))
                })?;

            let user_id = result.user_id.ok_or_else(|| {
                GatewayError::Unauthorized("validation result without user id".to_string())
            })?;

            ctx.headers.remove(TOKEN_HEADER);
            ctx.headers
                .insert(HeaderName::from_static(USER_ID_HEADER), HeaderValue::from(user_id));
            ctx.user_id = Some(user_id);
            ctx.tenant = result.tenant;

            tracing::info!(user_id, company_id = %company_id, "token validated");
            Ok(())
        }
        .boxed()
    }
}

/// Resolves the single backend target for the request.
pub struct ResolveRoute {
    table: Arc<RoutingTable>,
}

impl ResolveRoute {
    pub fn new(table: Arc<RoutingTable>) -> Self {
        Self { table }
    }
}

impl Stage for ResolveRoute {
    fn name(&self) -> &'static str {
        "resolve_route"
    }

    fn handle<'a>(&'a self, ctx: &'a mut ProxyContext) -> BoxFuture<'a, Result<(), GatewayError>> {
        let result = self
            .table
            .resolve(ctx.tenant.as_ref(), &ctx.path)
            .map(|target| {
                tracing::debug!(path = %ctx.path, target = %target, "route resolved");
                ctx.target = Some(target);
            });
        future::ready(result).boxed()
    }
}

/// Terminal step of the pipeline.
pub enum Forwarder {
    /// Forward to `ctx.target`, set by [`ResolveRoute`]
    Single { timeout: Option<Duration> },
    /// Race every static service whose prefix occurs in the path
    Fanout {
        table: Arc<RoutingTable>,
        deadline: Duration,
    },
}

pub struct Pipeline {
    client: reqwest::Client,
    table: Arc<RoutingTable>,
    stages: Vec<Box<dyn Stage>>,
    forwarder: Forwarder,
}

impl Pipeline {
    pub fn new(
        client: reqwest::Client,
        table: Arc<RoutingTable>,
        stages: Vec<Box<dyn Stage>>,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            client,
            table,
            stages,
            forwarder,
        }
    }

    /// Assemble the stage list described by the config.
    pub fn from_config(config: &GatewayConfig, client: reqwest::Client) -> Result<Self, ConfigError> {
        let table = Arc::new(RoutingTable::new(&config.services));
        let keys = match &config.key_file {
            Some(path) if config.envelope.enabled() => Some(Arc::new(KeyMaterial::load(path)?)),
            _ => None,
        };

        let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(LogRequest)];

        if let Some(keys) = &keys {
            if config.envelope.decrypt_requests {
                stages.push(Box::new(DecryptEnvelope::new(Arc::clone(keys))));
            }
            if config.envelope.encrypt_responses {
                stages.push(Box::new(EncryptEnvelope::new(Arc::clone(keys))));
            }
        }

        let resolver = TenantResolver::new(
            client.clone(),
            config.validation_url.clone(),
            config.validation_timeout,
        );
        stages.push(Box::new(Authenticate::new(
            resolver,
            config.excluded_paths.clone(),
        )));

        let forwarder = match config.forwarding {
            ForwardingMode::Single => {
                stages.push(Box::new(ResolveRoute::new(Arc::clone(&table))));
                Forwarder::Single {
                    timeout: config.upstream_timeout,
                }
            }
            ForwardingMode::Fanout => Forwarder::Fanout {
                table: Arc::clone(&table),
                deadline: config.fanout_timeout,
            },
        };

        Ok(Self::new(client, table, stages, forwarder))
    }

    /// Bounded metric label for a request path.
    pub fn route_label(&self, path: &str) -> &str {
        self.table.route_label(path)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, mut ctx: ProxyContext) -> Result<UpstreamResponse, GatewayError> {
        for stage in &self.stages {
            stage.handle(&mut ctx).await?;
        }

        let mut response = match &self.forwarder {
            Forwarder::Single { timeout } => {
                let target = ctx
                    .target
                    .as_ref()
                    .ok_or_else(|| GatewayError::RouteNotFound(ctx.path.clone()))?;
                proxy::forward(&self.client, &ctx, target, *timeout).await?
            }
            Forwarder::Fanout { table, deadline } => {
                let candidates = table.fanout_candidates(&ctx.path);
                proxy::race(&self.client, &ctx, candidates, *deadline).await?
            }
        };

        for stage in self.stages.iter().rev() {
            stage.on_response(&mut response)?;
        }
        Ok(response)
    }
}
