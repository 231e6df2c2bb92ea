use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use vertex_types::{Capabilities, OperationSpec, TestOutcome};

use crate::subsystems::integrations::connector::{
    optional_param, require_param, response_to_value, Connector, ConnectorContext,
};
use crate::subsystems::integrations::error::ConnectorError;

/// Connector for REST issue trackers scoped to a single project.
pub struct IssueTrackerConnector {
    api_base: String,
    project: String,
    credential: String,
    http: reqwest::Client,
}

impl IssueTrackerConnector {
    pub fn from_context(ctx: ConnectorContext) -> Result<Self, ConnectorError> {
        let api_base = ctx.require_config("api_base")?;
        let project = ctx.require_config("project")?;
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            project,
            credential: ctx.credential,
            http: ctx.http,
        })
    }
}

#[async_trait]
impl Connector for IssueTrackerConnector {
    async fn test(&self) -> TestOutcome {
        let started = Instant::now();
        let result = self
            .http
            .get(format!("{}/projects/{}", self.api_base, self.project))
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
                diagnostics: vec![format!("project probe returned {}", response.status())],
            },
            Err(err) => TestOutcome {
                ok: false,
                latency_ms,
                diagnostics: vec![format!("project probe failed: {}", err)],
            },
        }
    }

    fn capabilities(&self) -> Capabilities {
        [
            (
                "create_issue".to_string(),
                OperationSpec {
                    description: "Open a new issue in the configured project".to_string(),
                    required_params: vec!["title".to_string()],
                },
            ),
            (
                "get_issue".to_string(),
                OperationSpec {
                    description: "Fetch one issue by key".to_string(),
                    required_params: vec!["key".to_string()],
                },
            ),
            (
                "search_issues".to_string(),
                OperationSpec {
                    description: "Search issues in the configured project".to_string(),
                    required_params: vec!["query".to_string()],
                },
            ),
        ]
        .into_iter()
        .collect()
    }

    async fn execute(&self, operation: &str, params: &Value) -> Result<Value, ConnectorError> {
        match operation {
            "create_issue" => {
                let title = require_param(params, "title")?;
                let body = optional_param(params, "body").unwrap_or_default();

                let response = self
                    .http
                    .post(format!("{}/projects/{}/issues", self.api_base, self.project))
                    .bearer_auth(&self.credential)
                    .json(&json!({"title": title, "body": body}))
                    .send()
                    .await
                    .map_err(ConnectorError::from_reqwest)?;
                response_to_value(response).await
            }
            "get_issue" => {
                let key = require_param(params, "key")?;
                let response = self
                    .http
                    .get(format!(
                        "{}/projects/{}/issues/{}",
                        self.api_base, self.project, key
                    ))
                    .bearer_auth(&self.credential)
                    .send()
                    .await
                    .map_err(ConnectorError::from_reqwest)?;
                response_to_value(response).await
            }
            "search_issues" => {
                let query = require_param(params, "query")?;
                let response = self
                    .http
                    .get(format!("{}/projects/{}/issues", self.api_base, self.project))
                    .query(&[("q", query)])
                    .bearer_auth(&self.credential)
                    .send()
                    .await
                    .map_err(ConnectorError::from_reqwest)?;
                response_to_value(response).await
            }
            other => Err(ConnectorError::UnsupportedOperation(other.to_string())),
        }
    }
}
