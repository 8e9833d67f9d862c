use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const CONFIG_PATH_VAR: &str = "SG_GATEWAY_CONFIG";
const DEFAULT_PORT: u16 = 45080;
const DEFAULT_FANOUT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 5;

/// How the terminal pipeline stage reaches the backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardingMode {
    /// Resolve exactly one target and forward once
    #[default]
    Single,
    /// Race every service whose prefix occurs in the path
    Fanout,
}

/// Legacy encrypted-envelope switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvelopeConfig {
    pub decrypt_requests: bool,
    pub encrypt_responses: bool,
}

impl EnvelopeConfig {
    pub fn enabled(&self) -> bool {
        self.decrypt_requests || self.encrypt_responses
    }
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    gateway: GatewaySection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewaySection {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    excluded_paths: Vec<String>,
    #[serde(rename = "sgPortalURL")]
    sg_portal_url: String,
    #[serde(default)]
    key_file: Option<PathBuf>,
    #[serde(default)]
    services: BTreeMap<String, String>,
    #[serde(default)]
    forwarding: ForwardingMode,
    #[serde(default)]
    fanout_timeout_ms: Option<u64>,
    #[serde(default)]
    upstream_timeout_secs: Option<u64>,
    #[serde(default)]
    validation_timeout_secs: Option<u64>,
    #[serde(default)]
    envelope: EnvelopeConfig,
}

/// Immutable gateway configuration, built once before the server starts.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Listen port
    pub port: u16,
    /// Path prefixes that skip token validation
    pub excluded_paths: Vec<String>,
    /// Token/tenant validation endpoint
    pub validation_url: String,
    /// Key file for the legacy envelope cipher
    pub key_file: Option<PathBuf>,
    /// Static path prefix -> backend base URL
    pub services: BTreeMap<String, String>,
    pub forwarding: ForwardingMode,
    /// Aggregate deadline for a fan-out race
    pub fanout_timeout: Duration,
    /// Per-call timeout for forwarded requests (None = no timeout)
    pub upstream_timeout: Option<Duration>,
    pub validation_timeout: Duration,
    pub envelope: EnvelopeConfig,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("excluded_paths", &self.excluded_paths)
            .field("validation_url", &self.validation_url)
            .field("key_file", &self.key_file)
            .field("services", &self.services)
            .field("forwarding", &self.forwarding)
            .field("fanout_timeout", &self.fanout_timeout)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("validation_timeout", &self.validation_timeout)
            .field("envelope", &self.envelope)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl GatewayConfig {
    /// Load the YAML file named by `SG_GATEWAY_CONFIG`, then apply the
    /// `PORT` and `METRICS_TOKEN` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_VAR)
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingRequired(CONFIG_PATH_VAR))?;

        let mut config = Self::from_file(&path)?;

        if let Some(port) = env::var("PORT").ok().and_then(|s| s.parse().ok()) {
            config.port = port;
        }

        config.metrics_token = env::var("METRICS_TOKEN").ok().filter(|s| !s.is_empty());
        if config.metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set, /metrics is publicly accessible");
        }

        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let doc: ConfigDocument =
            serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let section = doc.gateway;

        let config = Self {
            port: section.port.unwrap_or(DEFAULT_PORT),
            excluded_paths: section.excluded_paths,
            validation_url: section.sg_portal_url,
            key_file: section.key_file,
            services: section.services,
            forwarding: section.forwarding,
            fanout_timeout: Duration::from_millis(
                section.fanout_timeout_ms.unwrap_or(DEFAULT_FANOUT_TIMEOUT_MS),
            ),
            upstream_timeout: section.upstream_timeout_secs.map(Duration::from_secs),
            validation_timeout: Duration::from_secs(
                section
                    .validation_timeout_secs
                    .unwrap_or(DEFAULT_VALIDATION_TIMEOUT_SECS),
            ),
            envelope: section.envelope,
            metrics_token: None,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.validation_url)
            .map_err(|_| ConfigError::InvalidUrl(self.validation_url.clone()))?;

        for (prefix, base) in &self.services {
            if !prefix.starts_with('/') {
                return Err(ConfigError::InvalidPrefix(prefix.clone()));
            }
            Url::parse(base).map_err(|_| ConfigError::InvalidUrl(base.clone()))?;
        }

        if self.envelope.enabled() && self.key_file.is_none() {
            return Err(ConfigError::MissingRequired("gateway.keyFile"));
        }

        if self.forwarding == ForwardingMode::Fanout && self.services.is_empty() {
            tracing::warn!("fan-out forwarding enabled with no services configured");
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    MissingRequired(&'static str),

    #[error("failed to read config: {0}")]
    Read(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("service prefix must start with '/': {0}")]
    InvalidPrefix(String),

    #[error("invalid key file: {0}")]
    KeyFile(String),
}
