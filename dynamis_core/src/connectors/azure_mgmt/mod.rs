use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::envelope::{
    ok, ok_message, ok_paged_collection, opt_str, opt_u32, opt_usize, req_str, ActionOutput,
    Params,
};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::paging::PageSpec;
use crate::Connector;

const ARM_API_VERSION: &str = "2021-04-01";
const WEB_SITES_API_VERSION: &str = "2022-03-01";
pub(crate) const LOGIC_APPS_API_VERSION: &str = "2019-05-01";

const ACTIONS: &[&str] = &[
    "azure_list_resource_groups",
    "azure_list_resources_in_rg",
    "azure_get_resource",
    "azure_create_deployment",
    "azure_list_functions",
    "azure_get_function_status",
    "azure_restart_function_app",
    "azure_list_logic_apps",
    "azure_trigger_logic_app",
    "azure_get_logic_app_run_history",
];

pub struct AzureMgmtConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl AzureMgmtConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn scope(&self) -> &str {
        &self.settings.mgmt_scope
    }

    fn base(&self) -> &str {
        &self.settings.mgmt_base_url
    }

    fn subscription<'a>(&'a self, params: &'a Params) -> Result<&'a str, ConnectorError> {
        opt_str(params, "subscription_id")
            .or(self.settings.azure_subscription_id.as_deref())
            .ok_or_else(|| {
                ConnectorError::InvalidParams(
                    "'subscription_id' is required (param or AZURE_SUBSCRIPTION_ID)".to_string(),
                )
            })
    }

    fn resource_group<'a>(&'a self, params: &'a Params) -> Result<&'a str, ConnectorError> {
        opt_str(params, "resource_group")
            .or(self.settings.azure_resource_group.as_deref())
            .ok_or_else(|| {
                ConnectorError::InvalidParams(
                    "'resource_group' is required (param or AZURE_RESOURCE_GROUP)".to_string(),
                )
            })
    }

    async fn paged_arm(
        &self,
        url: String,
        api_version: &str,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let mut query: Query = vec![q("api-version", api_version)];
        if let Some(top) = opt_u32(params, "top") {
            query.push(q("$top", top.to_string()));
        }
        let spec = PageSpec::new(
            self.settings.default_page_size,
            opt_usize(params, "max_items_total"),
            self.settings.max_paging_pages,
        );
        let outcome = self
            .client
            .paged_get(&url, self.scope(), &query, &spec, &[])
            .await?;
        Ok(ok_paged_collection(outcome))
    }

    async fn logic_app_callback_url(
        &self,
        subscription: &str,
        resource_group: &str,
        workflow: &str,
        trigger: &str,
    ) -> Result<String, ConnectorError> {
        let url = format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Logic/workflows/{}/triggers/{}/listCallbackUrl?api-version={}",
            self.base(),
            subscription,
            resource_group,
            workflow,
            trigger,
            LOGIC_APPS_API_VERSION
        );
        let data = self.client.post_json(&url, self.scope(), &json!({})).await?;
        data.get("value")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ConnectorError::InternalError(format!(
                    "listCallbackUrl for workflow '{}' returned no value",
                    workflow
                ))
            })
    }

    /// The callback URL from `listCallbackUrl` is pre-signed; fire it
    /// without a bearer token.
    pub(crate) async fn invoke_callback(
        &self,
        callback_url: &str,
        payload: Option<&Value>,
    ) -> Result<(u16, Value), ConnectorError> {
        let mut req = self.client.raw().post(callback_url);
        if let Some(payload) = payload {
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
        let body = if bytes.is_empty() {
            json!({})
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                json!({ "raw": String::from_utf8_lossy(&bytes).to_string() })
            })
        };
        Ok((code, body))
    }

    pub(crate) async fn run_trigger(
        &self,
        subscription: &str,
        resource_group: &str,
        workflow: &str,
        trigger: &str,
        payload: Option<&Value>,
    ) -> Result<ActionOutput, ConnectorError> {
        let callback = self
            .logic_app_callback_url(subscription, resource_group, workflow, trigger)
            .await?;
        let (status, body) = self.invoke_callback(&callback, payload).await?;
        Ok(ActionOutput::Json(json!({
            "status": if status == 202 { "pending" } else { "success" },
            "http_status": status,
            "data": body,
            "message": format!("Workflow '{}' triggered.", workflow),
        })))
    }
}

#[async_trait]
impl Connector for AzureMgmtConnector {
    fn name(&self) -> &'static str {
        "azure_mgmt"
    }

    fn description(&self) -> &'static str {
        "Azure Resource Manager: resource groups, resources, Function Apps, Logic Apps."
    }

    fn actions(&self) -> &'static [&'static str] {
        ACTIONS
    }

    async fn execute(
        &self,
        action: &str,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        match action {
            "azure_list_resource_groups" => {
                let subscription = self.subscription(params)?;
                let api_version = opt_str(params, "api_version").unwrap_or(ARM_API_VERSION);
                let url = format!(
                    "{}/subscriptions/{}/resourcegroups",
                    self.base(),
                    subscription
                );
                self.paged_arm(url, api_version, params).await
            }
            "azure_list_resources_in_rg" => {
                let subscription = self.subscription(params)?;
                let resource_group = self.resource_group(params)?;
                let api_version = opt_str(params, "api_version").unwrap_or(ARM_API_VERSION);
                let url = format!(
                    "{}/subscriptions/{}/resourceGroups/{}/resources",
                    self.base(),
                    subscription,
                    resource_group
                );
                self.paged_arm(url, api_version, params).await
            }
            "azure_get_resource" => {
                // the api-version depends on the resource provider, so the
                // caller must supply it
                let resource_id = req_str(params, "resource_id")?;
                let api_version = req_str(params, "api_version")?;
                let url = format!("{}{}", self.base(), resource_id);
                let query = vec![q("api-version", api_version)];
                Ok(ok(self.client.get_json(&url, self.scope(), Some(&query)).await?))
            }
            "azure_create_deployment" => Err(ConnectorError::NotSupported(
                "ARM template deployments are not exposed by this gateway".to_string(),
            )),
            "azure_list_functions" => {
                let subscription = self.subscription(params)?;
                let resource_group = self.resource_group(params)?;
                let app = req_str(params, "function_app_name")?;
                let api_version = opt_str(params, "api_version").unwrap_or(WEB_SITES_API_VERSION);
                let url = format!(
                    "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Web/sites/{}/functions",
                    self.base(),
                    subscription,
                    resource_group,
                    app
                );
                self.paged_arm(url, api_version, params).await
            }
            "azure_get_function_status" => {
                let subscription = self.subscription(params)?;
                let resource_group = self.resource_group(params)?;
                let app = req_str(params, "function_app_name")?;
                let function = req_str(params, "function_name")?;
                let api_version = opt_str(params, "api_version").unwrap_or(WEB_SITES_API_VERSION);
                let url = format!(
                    "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Web/sites/{}/functions/{}",
                    self.base(),
                    subscription,
                    resource_group,
                    app,
                    function
                );
                let query = vec![q("api-version", api_version)];
                Ok(ok(self.client.get_json(&url, self.scope(), Some(&query)).await?))
            }
            "azure_restart_function_app" => {
                let subscription = self.subscription(params)?;
                let resource_group = self.resource_group(params)?;
                let app = req_str(params, "function_app_name")?;
                let api_version = opt_str(params, "api_version").unwrap_or(WEB_SITES_API_VERSION);
                let url = format!(
                    "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Web/sites/{}/restart?api-version={}",
                    self.base(),
                    subscription,
                    resource_group,
                    app,
                    api_version
                );
                let resp = self
                    .client
                    .post_for_response(&url, self.scope(), &json!({}))
                    .await?;
                Ok(ok_message(
                    format!("Function app '{}' restart requested.", app),
                    resp.status().as_u16(),
                ))
            }
            "azure_list_logic_apps" => {
                let subscription = self.subscription(params)?;
                let api_version = opt_str(params, "api_version").unwrap_or(LOGIC_APPS_API_VERSION);
                let url = match opt_str(params, "resource_group")
                    .or(self.settings.azure_resource_group.as_deref())
                {
                    Some(rg) => format!(
                        "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Logic/workflows",
                        self.base(),
                        subscription,
                        rg
                    ),
                    None => format!(
                        "{}/subscriptions/{}/providers/Microsoft.Logic/workflows",
                        self.base(),
                        subscription
                    ),
                };
                self.paged_arm(url, api_version, params).await
            }
            "azure_trigger_logic_app" => {
                let subscription = self.subscription(params)?;
                let resource_group = self.resource_group(params)?;
                let workflow = req_str(params, "workflow_name")?;
                let trigger = opt_str(params, "trigger_name").unwrap_or("manual");
                self.run_trigger(
                    subscription,
                    resource_group,
                    workflow,
                    trigger,
                    params.get("payload"),
                )
                .await
            }
            "azure_get_logic_app_run_history" => {
                let subscription = self.subscription(params)?;
                let resource_group = self.resource_group(params)?;
                let workflow = req_str(params, "workflow_name")?;
                let url = format!(
                    "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Logic/workflows/{}/runs",
                    self.base(),
                    subscription,
                    resource_group,
                    workflow
                );
                self.paged_arm(url, LOGIC_APPS_API_VERSION, params).await
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}
