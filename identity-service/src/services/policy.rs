//! External policy engine (Open Policy Agent) integration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::PolicyConfig;

#[derive(Debug, Clone, Serialize)]
pub struct PolicyUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub permissions: Vec<String>,
}

/// The `input` document submitted for a decision.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyInput {
    pub user: PolicyUser,
    pub action: String,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicyDecision {
    pub allow: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// An engine verdict is authoritative; an `Err` means "no verdict".
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn evaluate(&self, input: &PolicyInput) -> Result<PolicyDecision, anyhow::Error>;
}

#[derive(Serialize)]
struct OpaRequest<'a> {
    input: &'a PolicyInput,
}

#[derive(Deserialize)]
struct OpaResponse {
    result: PolicyDecision,
}

/// Queries `POST {url}/v1/data/{policy_path}` on an OPA server.
#[derive(Clone)]
pub struct OpaPolicyEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl OpaPolicyEngine {
    pub fn new(config: &PolicyConfig) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build OPA client: {}", e))?;

        let endpoint = format!(
            "{}/v1/data/{}",
            config.url.trim_end_matches('/'),
            config.policy_path.trim_matches('/')
        );

        tracing::info!(endpoint = %endpoint, "OPA policy engine configured");

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl PolicyEngine for OpaPolicyEngine {
    async fn evaluate(&self, input: &PolicyInput) -> Result<PolicyDecision, anyhow::Error> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&OpaRequest { input })
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("OPA request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OPA returned status {}: {}", status, body);
        }

        let decoded: OpaResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to decode OPA response: {}", e))?;

        Ok(decoded.result)
    }
}
