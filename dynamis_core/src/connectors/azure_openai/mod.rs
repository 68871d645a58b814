use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::envelope::{ok, req_array, req_str, req_value, ActionOutput, Params};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient};
use crate::Connector;

const ACTIONS: &[&str] = &[
    "openai_chat_completion",
    "openai_completion",
    "openai_get_embedding",
    "openai_list_models",
];

/// Optional sampling/limit knobs forwarded verbatim when present.
const PASSTHROUGH_KEYS: &[&str] = &[
    "temperature",
    "max_tokens",
    "top_p",
    "frequency_penalty",
    "presence_penalty",
    "stop",
    "n",
    "user",
    "seed",
    "response_format",
];

pub struct AzureOpenAiConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl AzureOpenAiConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn endpoint_and_scope(&self) -> Result<(String, String), ConnectorError> {
        let endpoint = self
            .settings
            .azure_openai_endpoint
            .clone()
            .ok_or_else(|| {
                ConnectorError::Authentication(
                    "AZURE_OPENAI_RESOURCE_ENDPOINT is not configured".to_string(),
                )
            })?;
        let scope = self.settings.azure_openai_scope().ok_or_else(|| {
            ConnectorError::Authentication(
                "Azure OpenAI scope could not be derived from the endpoint".to_string(),
            )
        })?;
        Ok((endpoint, scope))
    }

    fn deployment_url(
        &self,
        endpoint: &str,
        deployment_id: &str,
        operation: &str,
    ) -> String {
        format!(
            "{}/openai/deployments/{}/{}",
            endpoint, deployment_id, operation
        )
    }

    fn passthrough(params: &Params, payload: &mut Value) {
        for key in PASSTHROUGH_KEYS {
            if let Some(value) = params.get(*key) {
                if !value.is_null() {
                    payload[*key] = value.clone();
                }
            }
        }
    }

    async fn post(
        &self,
        url: &str,
        scope: &str,
        payload: &Value,
    ) -> Result<ActionOutput, ConnectorError> {
        let api_version = vec![q("api-version", self.settings.azure_openai_api_version.clone())];
        let resp = self
            .client
            .send(
                reqwest::Method::POST,
                url,
                scope,
                Some(&api_version),
                Some(payload),
                None,
                &[],
            )
            .await?;
        let data = resp
            .json::<Value>()
            .await
            .map_err(ConnectorError::HttpRequest)?;
        Ok(ok(data))
    }
}

#[async_trait]
impl Connector for AzureOpenAiConnector {
    fn name(&self) -> &'static str {
        "azure_openai"
    }

    fn description(&self) -> &'static str {
        "Azure OpenAI deployments: chat/completions, embeddings, model listing."
    }

    fn actions(&self) -> &'static [&'static str] {
        ACTIONS
    }

    async fn execute(
        &self,
        action: &str,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let (endpoint, scope) = self.endpoint_and_scope()?;
        match action {
            "openai_chat_completion" => {
                let deployment_id = req_str(params, "deployment_id")?;
                let messages = req_array(params, "messages")?;
                let mut payload = json!({ "messages": messages });
                Self::passthrough(params, &mut payload);
                let url = self.deployment_url(&endpoint, deployment_id, "chat/completions");
                self.post(&url, &scope, &payload).await
            }
            "openai_completion" => {
                let deployment_id = req_str(params, "deployment_id")?;
                let prompt = req_value(params, "prompt")?;
                let mut payload = json!({ "prompt": prompt });
                Self::passthrough(params, &mut payload);
                let url = self.deployment_url(&endpoint, deployment_id, "completions");
                self.post(&url, &scope, &payload).await
            }
            "openai_get_embedding" => {
                let deployment_id = req_str(params, "deployment_id")?;
                let input = req_value(params, "input")?;
                let mut payload = json!({ "input": input });
                if let Some(user) = params.get("user").filter(|v| !v.is_null()) {
                    payload["user"] = user.clone();
                }
                let url = self.deployment_url(&endpoint, deployment_id, "embeddings");
                self.post(&url, &scope, &payload).await
            }
            "openai_list_models" => {
                let url = format!("{}/openai/models", endpoint);
                let api_version =
                    vec![q("api-version", self.settings.azure_openai_api_version.clone())];
                let data = self.client.get_json(&url, &scope, Some(&api_version)).await?;
                Ok(ok(data))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}
