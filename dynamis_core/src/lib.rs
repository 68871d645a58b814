// src/lib.rs
pub mod auth;
pub mod config;
pub mod connectors;
pub mod envelope;
pub mod error;
pub mod http;
pub mod ident;
pub mod paging;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

pub use crate::config::Settings;
pub use crate::envelope::{ActionOutput, Params};
pub use crate::error::ConnectorError;

use crate::auth::{ClientCredentials, MissingCredentials, TokenProvider};
use crate::http::AuthedClient;

/// A connector owns a family of wire actions against one upstream service.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Unique connector name, e.g. `sharepoint`.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// The wire action keys this connector serves. Keys are globally unique
    /// across the registry.
    fn actions(&self) -> &'static [&'static str];

    /// Run one action with its JSON parameter bag.
    async fn execute(&self, action: &str, params: &Params)
        -> Result<ActionOutput, ConnectorError>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConnectorInfo {
    pub name: String,
    pub description: String,
    pub actions: Vec<String>,
}

/// Routes action names to the connector that owns them.
pub struct ActionRegistry {
    connectors: Vec<Arc<dyn Connector>>,
    index: HashMap<&'static str, usize>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        ActionRegistry {
            connectors: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) -> Result<(), ConnectorError> {
        let slot = self.connectors.len();
        for action in connector.actions() {
            if self.index.contains_key(action) {
                return Err(ConnectorError::InternalError(format!(
                    "duplicate action key '{}' while registering connector '{}'",
                    action,
                    connector.name()
                )));
            }
            self.index.insert(action, slot);
        }
        self.connectors.push(connector);
        Ok(())
    }

    pub fn find(&self, action: &str) -> Option<&Arc<dyn Connector>> {
        self.index.get(action).map(|slot| &self.connectors[*slot])
    }

    pub fn action_count(&self) -> usize {
        self.index.len()
    }

    pub fn list_connectors(&self) -> Vec<ConnectorInfo> {
        self.connectors
            .iter()
            .map(|c| ConnectorInfo {
                name: c.name().to_string(),
                description: c.description().to_string(),
                actions: c.actions().iter().map(|a| a.to_string()).collect(),
            })
            .collect()
    }

    pub async fn dispatch(
        &self,
        action: &str,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let connector = self
            .find(action)
            .ok_or_else(|| ConnectorError::ActionNotFound(action.to_string()))?;
        tracing::info!(action, connector = connector.name(), "dispatching action");
        connector.execute(action, params).await
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire up every connector the build enables. Connectors whose credentials
/// are absent still register and report the missing configuration at call
/// time, matching the dispatch contract (an action key is either known or
/// a 400; credential problems are the action's own error envelope).
pub fn build_registry(settings: Arc<Settings>) -> Result<ActionRegistry, ConnectorError> {
    let http = reqwest::Client::builder()
        .user_agent(settings.user_agent())
        .timeout(settings.default_timeout)
        .build()
        .map_err(ConnectorError::HttpRequest)?;

    let entra_tokens: Arc<dyn TokenProvider> = match settings.entra.clone() {
        Some(creds) => Arc::new(ClientCredentials::new(http.clone(), creds)),
        None => Arc::new(MissingCredentials("AZURE_TENANT_ID/CLIENT_ID/CLIENT_SECRET")),
    };
    let powerbi_tokens: Arc<dyn TokenProvider> =
        match settings.powerbi_entra.clone().or_else(|| settings.entra.clone()) {
            Some(creds) => Arc::new(ClientCredentials::new(http.clone(), creds)),
            None => Arc::new(MissingCredentials("PBI_TENANT_ID/CLIENT_ID/CLIENT_SECRET")),
        };

    let graph = AuthedClient::new(http.clone(), entra_tokens);
    let powerbi = AuthedClient::new(http.clone(), powerbi_tokens);

    let mut registry = ActionRegistry::new();

    registry.register(Arc::new(connectors::mail::MailConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::calendar::CalendarConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::teams::TeamsConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::sharepoint::SharePointConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::onedrive::OneDriveConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::planner::PlannerConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::todo::TodoConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::bookings::BookingsConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::forms::FormsConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::stream::StreamConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::office::OfficeConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::profile::ProfileConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::users::UsersConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::viva::VivaConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::graph::GraphConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(connectors::azure_mgmt::AzureMgmtConnector::new(
        graph.clone(),
        settings.clone(),
    )))?;
    registry.register(Arc::new(
        connectors::power_automate::PowerAutomateConnector::new(graph.clone(), settings.clone()),
    ))?;
    registry.register(Arc::new(connectors::power_bi::PowerBiConnector::new(
        powerbi,
        settings.clone(),
    )))?;
    registry.register(Arc::new(
        connectors::azure_openai::AzureOpenAiConnector::new(graph.clone(), settings.clone()),
    ))?;

    #[cfg(feature = "github")]
    registry.register(Arc::new(connectors::github::GitHubConnector::new(
        settings.clone(),
    )))?;

    #[cfg(feature = "google-ads")]
    registry.register(Arc::new(connectors::google_ads::GoogleAdsConnector::new(
        http.clone(),
        settings.clone(),
    )))?;

    #[cfg(feature = "meta-ads")]
    registry.register(Arc::new(connectors::meta_ads::MetaAdsConnector::new(
        http,
        settings,
    )))?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ActionRegistry {
        build_registry(Arc::new(Settings::from_env().unwrap())).unwrap()
    }

    #[test]
    fn every_action_is_owned_by_exactly_one_connector() {
        let registry = registry();
        let listed: usize = registry
            .list_connectors()
            .iter()
            .map(|c| c.actions.len())
            .sum();
        // duplicate keys would have failed registration
        assert_eq!(listed, registry.action_count());
        assert!(registry.action_count() >= 170);
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let registry = registry();
        let err = registry
            .dispatch("no_such_action", &Params::new())
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "action_not_found");
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn param_validation_runs_before_any_network_io() {
        let registry = registry();
        // email_get_message requires message_id; must fail fast as
        // invalid_params, not as an auth/transport error.
        let err = registry
            .dispatch("email_get_message", &Params::new())
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "invalid_params");
        let err = registry
            .dispatch("sp_get_list", &Params::new())
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "invalid_params");
        let err = registry
            .dispatch(
                "googleads_search_stream",
                json!({"customer_id": "123-456-7890"})
                    .as_object()
                    .unwrap(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "invalid_params");
    }
}
