use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::Settings;
use crate::envelope::{ok, opt_str, ActionOutput, Params};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::Connector;

const ACTIONS: &[&str] = &["viva_get_my_analytics", "viva_get_focus_plan"];

pub struct VivaConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl VivaConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl Connector for VivaConnector {
    fn name(&self) -> &'static str {
        "viva"
    }

    fn description(&self) -> &'static str {
        "Viva Insights activity statistics for the signed-in user."
    }

    fn actions(&self) -> &'static [&'static str] {
        ACTIONS
    }

    async fn execute(
        &self,
        action: &str,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let url = format!(
            "{}/me/analytics/activityStatistics",
            self.settings.graph_base_url
        );
        match action {
            "viva_get_my_analytics" => {
                let query: Query = match opt_str(params, "filter_query") {
                    Some(filter) => vec![q("$filter", filter)],
                    None => Vec::new(),
                };
                let data = self
                    .client
                    .get_json(
                        &url,
                        &self.settings.graph_scope,
                        if query.is_empty() { None } else { Some(&query) },
                    )
                    .await?;
                Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
            }
            "viva_get_focus_plan" => {
                let query = vec![q("$filter", "activity eq 'focus'")];
                let data = self
                    .client
                    .get_json(&url, &self.settings.graph_scope, Some(&query))
                    .await?;
                Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}
