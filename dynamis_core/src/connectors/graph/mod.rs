use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{Settings, GRAPH_API_BETA_BASE_URL};
use crate::envelope::{ok, opt_str, req_str, ActionOutput, Params};
use crate::error::ConnectorError;
use crate::http::{AuthedClient, Query};
use crate::Connector;

const ACTIONS: &[&str] = &["graph_generic_get", "graph_generic_post"];

/// Escape hatch for Graph endpoints without a dedicated action: the caller
/// supplies the relative path (and optionally the beta surface or a custom
/// scope) and gets the raw payload back.
pub struct GraphConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl GraphConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn resolve(&self, params: &Params) -> Result<(String, String), ConnectorError> {
        let path = req_str(params, "graph_path")?;
        let base = match opt_str(params, "api_version") {
            Some("beta") => GRAPH_API_BETA_BASE_URL,
            _ => self.settings.graph_base_url.as_str(),
        };
        let url = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let scope = opt_str(params, "custom_scope")
            .unwrap_or(&self.settings.graph_scope)
            .to_string();
        Ok((url, scope))
    }

    fn odata_query(params: &Params) -> Query {
        let mut query = Query::new();
        if let Some(odata) = params.get("query_params").and_then(|v| v.as_object()) {
            for (key, value) in odata {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                query.push((key.clone(), rendered));
            }
        }
        query
    }
}

#[async_trait]
impl Connector for GraphConnector {
    fn name(&self) -> &'static str {
        "graph"
    }

    fn description(&self) -> &'static str {
        "Generic Microsoft Graph GET/POST against caller-supplied paths."
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
            "graph_generic_get" => {
                let (url, scope) = self.resolve(params)?;
                let query = Self::odata_query(params);
                let data = self
                    .client
                    .get_json(&url, &scope, if query.is_empty() { None } else { Some(&query) })
                    .await?;
                Ok(ok(data))
            }
            "graph_generic_post" => {
                let (url, scope) = self.resolve(params)?;
                let payload = params.get("payload").cloned().unwrap_or(Value::Null);
                Ok(ok(self.client.post_json(&url, &scope, &payload).await?))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use serde_json::json;

    fn connector() -> GraphConnector {
        GraphConnector::new(
            AuthedClient::new(
                reqwest::Client::new(),
                Arc::new(StaticToken("t".to_string())),
            ),
            Arc::new(Settings::from_env().unwrap()),
        )
    }

    #[test]
    fn beta_switch_and_path_join() {
        let c = connector();
        let mut params = Params::new();
        params.insert("graph_path".to_string(), json!("/me/messages"));
        let (url, scope) = c.resolve(&params).unwrap();
        assert_eq!(url, "https://graph.microsoft.com/v1.0/me/messages");
        assert_eq!(scope, "https://graph.microsoft.com/.default");

        params.insert("api_version".to_string(), json!("beta"));
        let (url, _) = c.resolve(&params).unwrap();
        assert_eq!(url, "https://graph.microsoft.com/beta/me/messages");
    }
}
