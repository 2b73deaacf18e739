//! Platform service access
//!
//! A thin authenticated HTTP client for the monitored data platform, plus
//! the catalog of operations the model may invoke against it. Every
//! operation is a stateless parameterized call; the interesting state
//! (approval, retries, folding) lives upstream in the executor and agent.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use opsmate_registry::OperationError;

pub mod audiences;
pub mod batches;
pub mod catalog;
pub mod datasets;
pub mod flows;
pub mod governance;
pub mod queries;

pub use catalog::build_catalog;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Authenticated client for platform service calls
pub struct PlatformClient {
    http: reqwest::Client,
    api_base: String,
    access_token: String,
    org_id: Option<String>,
    sandbox: Option<String>,
}

impl PlatformClient {
    pub fn new(api_base: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            org_id: None,
            sandbox: None,
        }
    }

    pub fn from_config(config: &opsmate_config::PlatformConfig) -> Self {
        let mut client = Self::new(&config.api_base, &config.access_token);
        client.org_id = config.org_id.clone();
        client.sandbox = config.sandbox.clone();
        client
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn with_sandbox(mut self, sandbox: impl Into<String>) -> Self {
        self.sandbox = Some(sandbox.into());
        self
    }

    /// GET a platform resource
    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, OperationError> {
        debug!("platform GET {}", path);
        let request = self
            .http
            .get(format!("{}{}", self.api_base, path))
            .query(query);
        self.send(path, request).await
    }

    /// POST to a platform endpoint
    pub async fn post(&self, path: &str, body: Value) -> Result<Value, OperationError> {
        debug!("platform POST {}", path);
        let request = self
            .http
            .post(format!("{}{}", self.api_base, path))
            .json(&body);
        self.send(path, request).await
    }

    async fn send(
        &self,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, OperationError> {
        let mut request = request
            .header("Authorization", format!("Bearer {}", self.access_token))
            .timeout(REQUEST_TIMEOUT);

        if let Some(org_id) = &self.org_id {
            request = request.header("x-org-id", org_id);
        }
        if let Some(sandbox) = &self.sandbox {
            request = request.header("x-sandbox-name", sandbox);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OperationError::Upstream(e.into()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(OperationError::NotFound(path.to_string()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| OperationError::Upstream(e.into()))?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .or_else(|| body["title"].as_str())
                .unwrap_or("platform call failed");
            warn!("platform {} returned {}: {}", path, status, message);
            return Err(OperationError::upstream(format!(
                "{} ({})",
                message, status
            )));
        }

        Ok(body)
    }
}

/// Deserialize handler arguments, reporting mismatches as validation
/// failures rather than opaque errors
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, OperationError> {
    serde_json::from_value(args).map_err(|e| OperationError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, Debug)]
    struct SampleArgs {
        batch_id: String,
        limit: Option<u32>,
    }

    #[test]
    fn test_parse_args_ok() {
        let args: SampleArgs = parse_args(json!({"batch_id": "b-1", "limit": 5})).unwrap();
        assert_eq!(args.batch_id, "b-1");
        assert_eq!(args.limit, Some(5));
    }

    #[test]
    fn test_parse_args_missing_field_is_validation() {
        let err = parse_args::<SampleArgs>(json!({"limit": 5})).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = PlatformClient::new("https://platform.example.com/", "token");
        assert_eq!(client.api_base, "https://platform.example.com");
    }
}
