use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::envelope::{ok, opt_str, req_str, ActionOutput, Params};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::Connector;

const LOGIC_APPS_API_VERSION: &str = "2019-05-01";

const ACTIONS: &[&str] = &[
    "pa_listar_flows",
    "pa_obtener_flow",
    "pa_ejecutar_flow",
    "pa_obtener_estado_ejecucion_flow",
];

/// Power Automate flows surfaced through their Logic Apps (ARM) backing.
pub struct PowerAutomateConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl PowerAutomateConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn scope(&self) -> &str {
        &self.settings.mgmt_scope
    }

    fn workflows_base(&self, subscription: &str, resource_group: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Logic/workflows",
            self.settings.mgmt_base_url, subscription, resource_group
        )
    }

    fn subscription<'a>(&'a self, params: &'a Params) -> Result<&'a str, ConnectorError> {
        opt_str(params, "suscripcion_id")
            .or(self.settings.azure_subscription_id.as_deref())
            .ok_or_else(|| {
                ConnectorError::InvalidParams(
                    "'suscripcion_id' is required (param or AZURE_SUBSCRIPTION_ID)".to_string(),
                )
            })
    }

    fn resource_group<'a>(&'a self, params: &'a Params) -> Result<&'a str, ConnectorError> {
        opt_str(params, "grupo_recurso")
            .or(self.settings.azure_resource_group.as_deref())
            .ok_or_else(|| {
                ConnectorError::InvalidParams(
                    "'grupo_recurso' is required (param or AZURE_RESOURCE_GROUP)".to_string(),
                )
            })
    }
}

#[async_trait]
impl Connector for PowerAutomateConnector {
    fn name(&self) -> &'static str {
        "power_automate"
    }

    fn description(&self) -> &'static str {
        "Power Automate flows via their Logic Apps ARM surface: list, inspect, trigger, run state."
    }

    fn actions(&self) -> &'static [&'static str] {
        ACTIONS
    }

    async fn execute(
        &self,
        action: &str,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let api_version: Query = vec![q("api-version", LOGIC_APPS_API_VERSION)];
        match action {
            "pa_listar_flows" => {
                let subscription = self.subscription(params)?;
                let resource_group = self.resource_group(params)?;
                let url = self.workflows_base(subscription, resource_group);
                let data = self
                    .client
                    .get_json(&url, self.scope(), Some(&api_version))
                    .await?;
                Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
            }
            "pa_obtener_flow" => {
                let subscription = self.subscription(params)?;
                let resource_group = self.resource_group(params)?;
                let flow = req_str(params, "nombre_flow")?;
                let url = format!(
                    "{}/{}",
                    self.workflows_base(subscription, resource_group),
                    flow
                );
                Ok(ok(self
                    .client
                    .get_json(&url, self.scope(), Some(&api_version))
                    .await?))
            }
            "pa_ejecutar_flow" => {
                let subscription = self.subscription(params)?;
                let resource_group = self.resource_group(params)?;
                let flow = req_str(params, "nombre_flow")?;
                let trigger = opt_str(params, "nombre_trigger").unwrap_or("manual");
                let callback_url = format!(
                    "{}/{}/triggers/{}/listCallbackUrl",
                    self.workflows_base(subscription, resource_group),
                    flow,
                    trigger
                );
                let callback_url = format!("{}?api-version={}", callback_url, LOGIC_APPS_API_VERSION);
                let callback = self
                    .client
                    .post_json(&callback_url, self.scope(), &json!({}))
                    .await?;
                let target = callback
                    .get("value")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ConnectorError::InternalError(format!(
                            "listCallbackUrl for flow '{}' returned no value",
                            flow
                        ))
                    })?;

                // the callback URL is pre-signed: no bearer token
                let mut req = self.client.raw().post(target);
                if let Some(payload) = params.get("payload") {
                    req = req.json(payload);
                }
                let resp = req.send().await.map_err(ConnectorError::HttpRequest)?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(crate::http::upstream_error(
                        status,
                        resp.text().await.unwrap_or_default(),
                    ));
                }
                let code = status.as_u16();
                let bytes = resp.bytes().await.map_err(ConnectorError::HttpRequest)?;
                let body: Value = if bytes.is_empty() {
                    json!({})
                } else {
                    serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                        json!({ "raw": String::from_utf8_lossy(&bytes).to_string() })
                    })
                };
                Ok(ActionOutput::Json(json!({
                    "status": if code == 202 { "pending" } else { "success" },
                    "http_status": code,
                    "data": body,
                    "message": format!("Flow '{}' triggered.", flow),
                })))
            }
            "pa_obtener_estado_ejecucion_flow" => {
                let subscription = self.subscription(params)?;
                let resource_group = self.resource_group(params)?;
                let flow = req_str(params, "nombre_flow")?;
                let run_id = req_str(params, "run_id")?;
                let url = format!(
                    "{}/{}/runs/{}",
                    self.workflows_base(subscription, resource_group),
                    flow,
                    run_id
                );
                Ok(ok(self
                    .client
                    .get_json(&url, self.scope(), Some(&api_version))
                    .await?))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}
