use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use vertex_types::{Capabilities, OperationSpec, TestOutcome};

use crate::subsystems::integrations::connector::{
    optional_param, require_param, Connector, ConnectorContext,
};
use crate::subsystems::integrations::error::ConnectorError;

/// Connector for incoming-webhook style chat integrations. Messages are
/// wrapped in the attachment shape most chat products accept.
pub struct ChatConnector {
    webhook_url: String,
    http: reqwest::Client,
}

impl ChatConnector {
    pub fn from_context(ctx: ConnectorContext) -> Result<Self, ConnectorError> {
        let webhook_url = ctx.require_config("webhook_url")?;
        Ok(Self {
            webhook_url,
            http: ctx.http,
        })
    }
}

#[async_trait]
impl Connector for ChatConnector {
    async fn test(&self) -> TestOutcome {
        // incoming webhooks reject GETs, but any HTTP response at all
        // proves the endpoint is reachable
        let started = Instant::now();
        let result = self.http.get(&self.webhook_url).send().await;

        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(response) if response.status().is_server_error() => TestOutcome {
                ok: false,
                latency_ms,
                diagnostics: vec![format!("webhook endpoint returned {}", response.status())],
            },
            Ok(_) => TestOutcome {
                ok: true,
                latency_ms,
                diagnostics: vec![],
            },
            Err(err) => TestOutcome {
                ok: false,
                latency_ms,
                diagnostics: vec![format!("webhook endpoint unreachable: {}", err)],
            },
        }
    }

    fn capabilities(&self) -> Capabilities {
        [(
            "post_message".to_string(),
            OperationSpec {
                description: "Post a message to the configured channel webhook".to_string(),
                required_params: vec!["text".to_string()],
            },
        )]
        .into_iter()
        .collect()
    }

    async fn execute(&self, operation: &str, params: &Value) -> Result<Value, ConnectorError> {
        match operation {
            "post_message" => {
                let text = require_param(params, "text")?;

                let mut payload = json!({"text": text});
                if let Some(title) = optional_param(params, "title") {
                    payload = json!({
                        "attachments": [{
                            "title": title,
                            "text": text,
                        }]
                    });
                }

                let response = self
                    .http
                    .post(&self.webhook_url)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(ConnectorError::from_reqwest)?;

                let status = response.status();
                if status.is_server_error() {
                    return Err(ConnectorError::Transient(format!(
                        "chat webhook returned {}",
                        status
                    )));
                }
                if status.is_client_error() {
                    return Err(ConnectorError::Permanent(format!(
                        "chat webhook returned {}",
                        status
                    )));
                }

                Ok(json!({"posted": true}))
            }
            other => Err(ConnectorError::UnsupportedOperation(other.to_string())),
        }
    }
}
