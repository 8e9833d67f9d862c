use crate::config::{ConfigError, GatewayConfig};
use crate::pipeline::Pipeline;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    /// Owns the outbound HTTP client used for validation and forwarding
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Build the HTTP client and the request pipeline. Fails when the key
    /// file required by the envelope cipher cannot be loaded.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ConfigError::Parse(format!("failed to create HTTP client: {e}")))?;

        let pipeline = Pipeline::from_config(&config, http_client)?;
        tracing::info!(stages = ?pipeline.stage_names(), "pipeline assembled");

        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_builds_pipeline_from_config() {
        let config = GatewayConfig::from_yaml_str(
            "gateway:\n  sgPortalURL: http://auth.internal/validate\n  services:\n    /api/portal: http://portal.internal\n",
        )
        .unwrap();
        let state = AppState::new(config).unwrap();

        assert_eq!(
            state.pipeline.stage_names(),
            vec!["log_request", "authenticate", "resolve_route"]
        );
        assert_eq!(state.pipeline.route_label("/api/portal/x"), "/api/portal");
    }

    #[test]
    fn test_new_fails_on_missing_key_file() {
        let config = GatewayConfig::from_yaml_str(
            "gateway:\n  sgPortalURL: http://auth.internal/validate\n  keyFile: /nonexistent/keys.json\n  envelope:\n    decryptRequests: true\n",
        )
        .unwrap();
        assert!(matches!(AppState::new(config), Err(ConfigError::KeyFile(_))));
    }
}
