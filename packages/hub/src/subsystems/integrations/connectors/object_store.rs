use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use vertex_types::{Capabilities, OperationSpec, TestOutcome};

use crate::subsystems::integrations::connector::{
    optional_param, require_param, response_to_value, Connector, ConnectorContext,
};
use crate::subsystems::integrations::error::ConnectorError;

/// Connector for S3-style object storage gateways. Operations address
/// `{endpoint}/{bucket}/{key}`; the resolved credential rides along as a
/// bearer token.
pub struct ObjectStoreConnector {
    endpoint: String,
    bucket: String,
    credential: String,
    http: reqwest::Client,
}

impl ObjectStoreConnector {
    pub fn from_context(ctx: ConnectorContext) -> Result<Self, ConnectorError> {
        let endpoint = ctx.require_config("endpoint")?;
        let bucket = ctx.require_config("bucket")?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket,
            credential: ctx.credential,
            http: ctx.http,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

#[async_trait]
impl Connector for ObjectStoreConnector {
    async fn test(&self) -> TestOutcome {
        let started = Instant::now();
        let result = self
            .http
            .head(format!("{}/{}", self.endpoint, self.bucket))
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
                diagnostics: vec![format!("bucket probe returned {}", response.status())],
            },
            Err(err) => TestOutcome {
                ok: false,
                latency_ms,
                diagnostics: vec![format!("bucket probe failed: {}", err)],
            },
        }
    }

    fn capabilities(&self) -> Capabilities {
        [
            (
                "list_objects".to_string(),
                OperationSpec {
                    description: "List objects in the bucket, optionally under a prefix".to_string(),
                    required_params: vec![],
                },
            ),
            (
                "get_object".to_string(),
                OperationSpec {
                    description: "Fetch an object's content".to_string(),
                    required_params: vec!["key".to_string()],
                },
            ),
            (
                "put_object".to_string(),
                OperationSpec {
                    description: "Write an object".to_string(),
                    required_params: vec!["key".to_string(), "content".to_string()],
                },
            ),
            (
                "delete_object".to_string(),
                OperationSpec {
                    description: "Delete an object".to_string(),
                    required_params: vec!["key".to_string()],
                },
            ),
        ]
        .into_iter()
        .collect()
    }

    async fn execute(&self, operation: &str, params: &Value) -> Result<Value, ConnectorError> {
        match operation {
            "list_objects" => {
                let mut request = self
                    .http
                    .get(format!("{}/{}", self.endpoint, self.bucket))
                    .bearer_auth(&self.credential);
                if let Some(prefix) = optional_param(params, "prefix") {
                    request = request.query(&[("prefix", prefix)]);
                }
                let response = request.send().await.map_err(ConnectorError::from_reqwest)?;
                response_to_value(response).await
            }
            "get_object" => {
                let key = require_param(params, "key")?;
                let response = self
                    .http
                    .get(self.object_url(key))
                    .bearer_auth(&self.credential)
                    .send()
                    .await
                    .map_err(ConnectorError::from_reqwest)?;
                response_to_value(response).await
            }
            "put_object" => {
                let key = require_param(params, "key")?;
                let content = require_param(params, "content")?;
                let response = self
                    .http
                    .put(self.object_url(key))
                    .bearer_auth(&self.credential)
                    .body(content.to_string())
                    .send()
                    .await
                    .map_err(ConnectorError::from_reqwest)?;
                response_to_value(response).await?;
                Ok(json!({"key": key, "bytes": content.len()}))
            }
            "delete_object" => {
                let key = require_param(params, "key")?;
                let response = self
                    .http
                    .delete(self.object_url(key))
                    .bearer_auth(&self.credential)
                    .send()
                    .await
                    .map_err(ConnectorError::from_reqwest)?;
                response_to_value(response).await?;
                Ok(json!({"deleted": key}))
            }
            other => Err(ConnectorError::UnsupportedOperation(other.to_string())),
        }
    }
}
