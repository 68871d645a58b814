use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::Settings;
use crate::envelope::{ok, opt_str, opt_u32, req_str, ActionOutput, Params};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::Connector;

const ACTIONS: &[&str] = &[
    "powerbi_list_reports",
    "powerbi_export_report",
    "powerbi_list_dashboards",
    "powerbi_list_datasets",
    "powerbi_refresh_dataset",
    "powerbi_listar_workspaces",
    "powerbi_obtener_estado_refresco_dataset",
];

/// Power BI REST API (`myorg` surface). Uses its own app registration when
/// `PBI_*` credentials are configured.
pub struct PowerBiConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl PowerBiConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn scope(&self) -> &str {
        &self.settings.powerbi_scope
    }

    /// `/groups/{workspace}/...` when a workspace is given, `myorg`-level
    /// otherwise.
    fn scoped_url(&self, params: &Params, suffix: &str) -> String {
        match opt_str(params, "workspace_id") {
            Some(workspace) => format!(
                "{}/groups/{}/{}",
                self.settings.powerbi_base_url, workspace, suffix
            ),
            None => format!("{}/{}", self.settings.powerbi_base_url, suffix),
        }
    }

    async fn collection(&self, url: String) -> Result<ActionOutput, ConnectorError> {
        let data = self.client.get_json(&url, self.scope(), None).await?;
        Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
    }
}

#[async_trait]
impl Connector for PowerBiConnector {
    fn name(&self) -> &'static str {
        "power_bi"
    }

    fn description(&self) -> &'static str {
        "Power BI REST API: workspaces, reports, dashboards, datasets, refreshes, exports."
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
            "powerbi_list_reports" => self.collection(self.scoped_url(params, "reports")).await,
            "powerbi_list_dashboards" => {
                self.collection(self.scoped_url(params, "dashboards")).await
            }
            "powerbi_list_datasets" => self.collection(self.scoped_url(params, "datasets")).await,
            "powerbi_listar_workspaces" => {
                self.collection(format!("{}/groups", self.settings.powerbi_base_url))
                    .await
            }
            "powerbi_export_report" => {
                let report_id = req_str(params, "report_id")?;
                let export_format = opt_str(params, "format").unwrap_or("PDF").to_uppercase();
                let url = self.scoped_url(params, &format!("reports/{}/ExportToFile", report_id));
                let payload = json!({ "format": export_format });
                let resp = self
                    .client
                    .post_for_response(&url, self.scope(), &payload)
                    .await?;
                let status = resp.status().as_u16();
                let job = resp
                    .json::<serde_json::Value>()
                    .await
                    .unwrap_or_else(|_| json!({}));
                if status == 202 {
                    // the export is asynchronous; the caller polls the job id
                    return Ok(crate::envelope::pending(
                        format!("Export of report '{}' accepted.", report_id),
                        None,
                        job,
                    ));
                }
                Ok(ok(job))
            }
            "powerbi_refresh_dataset" => {
                let dataset_id = req_str(params, "dataset_id")?;
                let url = self.scoped_url(params, &format!("datasets/{}/refreshes", dataset_id));
                let mut payload = json!({});
                if let Some(notify) = opt_str(params, "notify_option") {
                    payload["notifyOption"] = json!(notify);
                }
                let resp = self
                    .client
                    .post_for_response(&url, self.scope(), &payload)
                    .await?;
                Ok(crate::envelope::pending(
                    format!("Refresh of dataset '{}' requested.", dataset_id),
                    resp.headers()
                        .get("Location")
                        .and_then(|h| h.to_str().ok())
                        .map(|s| s.to_string()),
                    json!({ "http_status": resp.status().as_u16() }),
                ))
            }
            "powerbi_obtener_estado_refresco_dataset" => {
                let dataset_id = req_str(params, "dataset_id")?;
                let top = opt_u32(params, "top").unwrap_or(5).clamp(1, 100);
                let url = self.scoped_url(params, &format!("datasets/{}/refreshes", dataset_id));
                let query: Query = vec![q("$top", top.to_string())];
                let data = self.client.get_json(&url, self.scope(), Some(&query)).await?;
                Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    #[test]
    fn workspace_scoping() {
        let c = PowerBiConnector::new(
            AuthedClient::new(
                reqwest::Client::new(),
                Arc::new(StaticToken("t".to_string())),
            ),
            Arc::new(Settings::from_env().unwrap()),
        );
        let params = Params::new();
        assert_eq!(
            c.scoped_url(&params, "reports"),
            "https://api.powerbi.com/v1.0/myorg/reports"
        );
        let mut params = Params::new();
        params.insert("workspace_id".to_string(), json!("ws1"));
        assert_eq!(
            c.scoped_url(&params, "reports"),
            "https://api.powerbi.com/v1.0/myorg/groups/ws1/reports"
        );
    }
}
