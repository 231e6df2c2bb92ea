use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use vertex_types::{Capabilities, OperationSpec, TestOutcome};

use crate::subsystems::integrations::connector::{
    require_param, response_to_value, Connector, ConnectorContext,
};
use crate::subsystems::integrations::error::ConnectorError;

/// Connector for REST code-hosting APIs (GitHub-shaped routes).
pub struct CodeHostConnector {
    api_base: String,
    owner: String,
    credential: String,
    http: reqwest::Client,
}

impl CodeHostConnector {
    pub fn from_context(ctx: ConnectorContext) -> Result<Self, ConnectorError> {
        let api_base = ctx.require_config("api_base")?;
        let owner = ctx.require_config("owner")?;
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            owner,
            credential: ctx.credential,
            http: ctx.http,
        })
    }

    async fn get_json(&self, path: String) -> Result<Value, ConnectorError> {
        let response = self
            .http
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.credential)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(ConnectorError::from_reqwest)?;
        response_to_value(response).await
    }
}

#[async_trait]
impl Connector for CodeHostConnector {
    async fn test(&self) -> TestOutcome {
        let started = Instant::now();
        let result = self
            .http
            .get(format!("{}/users/{}", self.api_base, self.owner))
            .bearer_auth(&self.credential)
            .send()
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(response) if response.status().is_success() => TestOutcome {
                ok: true,
                latency_ms,
                diagnostics: vec![],
            },
            Ok(response) => TestOutcome {
                ok: false,
                latency_ms,
                diagnostics: vec![format!("user probe returned {}", response.status())],
            },
            Err(err) => TestOutcome {
                ok: false,
                latency_ms,
                diagnostics: vec![format!("user probe failed: {}", err)],
            },
        }
    }

    fn capabilities(&self) -> Capabilities {
        [
            (
                "list_repos".to_string(),
                OperationSpec {
                    description: "List repositories for the configured owner".to_string(),
                    required_params: vec![],
                },
            ),
            (
                "get_repo".to_string(),
                OperationSpec {
                    description: "Fetch a single repository".to_string(),
                    required_params: vec!["repo".to_string()],
                },
            ),
            (
                "list_branches".to_string(),
                OperationSpec {
                    description: "List branches of a repository".to_string(),
                    required_params: vec!["repo".to_string()],
                },
            ),
        ]
        .into_iter()
        .collect()
    }

    async fn execute(&self, operation: &str, params: &Value) -> Result<Value, ConnectorError> {
        match operation {
            "list_repos" => self.get_json(format!("/users/{}/repos", self.owner)).await,
            "get_repo" => {
                let repo = require_param(params, "repo")?;
                self.get_json(format!("/repos/{}/{}", self.owner, repo)).await
            }
            "list_branches" => {
                let repo = require_param(params, "repo")?;
                self.get_json(format!("/repos/{}/{}/branches", self.owner, repo))
                    .await
            }
            other => Err(ConnectorError::UnsupportedOperation(other.to_string())),
        }
    }
}
