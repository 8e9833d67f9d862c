//! Token and tenant resolution against the external validation service.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A customer organization and its per-service port assignments.
///
/// The validation service serializes Go-style PascalCase names; both those
/// and camelCase are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    #[serde(alias = "ID", alias = "Id")]
    pub id: u64,
    #[serde(default, alias = "CompanyGuid")]
    pub company_guid: String,
    #[serde(default, alias = "CompanyName")]
    pub company_name: String,
    #[serde(alias = "Host")]
    pub host: String,
    #[serde(default, alias = "BmrmPort")]
    pub bmrm_port: u32,
    #[serde(default, alias = "SgBizPort", alias = "sgBizPort")]
    pub biz_port: u32,
    #[serde(default, alias = "TallySyncPort", alias = "tallySyncPort")]
    pub tally_port: u32,
    #[serde(default, alias = "CreatedAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "UpdatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Body returned by the validation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenValidationResult {
    #[serde(default, alias = "TenantInfo", alias = "tenantInfo")]
    pub tenant: Option<Tenant>,
    #[serde(default, alias = "UserId", alias = "userID")]
    pub user_id: Option<u64>,
    #[serde(default, alias = "Success")]
    pub success: bool,
    #[serde(default, alias = "Message")]
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("token or company id is empty")]
    MissingCredentials,

    #[error("validation request failed: {0}")]
    Transport(String),

    #[error("validation service returned status {0}")]
    Status(u16),

    #[error("invalid validation response: {0}")]
    Decode(String),

    #[error("token rejected: {0}")]
    Rejected(String),
}

/// Calls the validation endpoint once per request, no retries.
#[derive(Clone)]
pub struct TenantResolver {
    client: reqwest::Client,
    validation_url: String,
    timeout: Duration,
}

impl TenantResolver {
    pub fn new(client: reqwest::Client, validation_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            validation_url: validation_url.into(),
            timeout,
        }
    }

    /// Validate `token` for `company_id`.
    ///
    /// A successful result always carries `success == true`, a tenant and a
    /// user id.
    pub async fn validate(
        &self,
        token: &str,
        company_id: &str,
    ) -> Result<TokenValidationResult, ValidationError> {
        if token.is_empty() || company_id.is_empty() {
            return Err(ValidationError::MissingCredentials);
        }

        let response = self
            .client
            .get(&self.validation_url)
            .header("token", token)
            .header("companyid", company_id)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ValidationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ValidationError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ValidationError::Transport(e.to_string()))?;

        let result: TokenValidationResult =
            serde_json::from_slice(&body).map_err(|e| ValidationError::Decode(e.to_string()))?;

        if !result.success {
            return Err(ValidationError::Rejected(result.message));
        }
        if result.tenant.is_none() || result.user_id.is_none() {
            return Err(ValidationError::Decode(
                "response is missing tenant or user id".to_string(),
            ));
        }

        Ok(result)
    }
}
