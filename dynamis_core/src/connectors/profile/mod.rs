use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::Settings;
use crate::envelope::{ok, ok_message, opt_str, req_object, ActionOutput, Params};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::Connector;

const ACTIONS: &[&str] = &[
    "profile_get_my_profile",
    "profile_get_my_manager",
    "profile_get_my_direct_reports",
    "profile_get_my_photo",
    "profile_update_my_profile",
];

const PROFILE_SELECT: &str = "id,displayName,userPrincipalName,mail,jobTitle,department,officeLocation,mobilePhone,businessPhones";

pub struct ProfileConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl ProfileConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl Connector for ProfileConnector {
    fn name(&self) -> &'static str {
        "profile"
    }

    fn description(&self) -> &'static str {
        "The signed-in user's profile over Graph: identity, manager, reports, photo."
    }

    fn actions(&self) -> &'static [&'static str] {
        ACTIONS
    }

    async fn execute(
        &self,
        action: &str,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let base = &self.settings.graph_base_url;
        let scope = &self.settings.graph_scope;
        match action {
            "profile_get_my_profile" => {
                let url = format!("{}/me", base);
                let query: Query = vec![q(
                    "$select",
                    opt_str(params, "select").unwrap_or(PROFILE_SELECT),
                )];
                Ok(ok(self.client.get_json(&url, scope, Some(&query)).await?))
            }
            "profile_get_my_manager" => {
                let url = format!("{}/me/manager", base);
                match self.client.get_json(&url, scope, None).await {
                    Ok(data) => Ok(ok(data)),
                    // not having a manager is a normal state, not an error
                    Err(ConnectorError::Upstream { status: 404, .. }) => {
                        Ok(ActionOutput::Json(json!({
                            "status": "success",
                            "data": null,
                            "message": "No manager assigned.",
                        })))
                    }
                    Err(e) => Err(e),
                }
            }
            "profile_get_my_direct_reports" => {
                let url = format!("{}/me/directReports", base);
                let data = self.client.get_json(&url, scope, None).await?;
                Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
            }
            "profile_get_my_photo" => {
                let url = format!("{}/me/photo/$value", base);
                match self.client.get_bytes(&url, scope, None).await {
                    Ok(bytes) => Ok(ActionOutput::bytes_with_type(bytes, "image/jpeg")),
                    Err(ConnectorError::Upstream { status: 404, .. }) => {
                        Ok(ActionOutput::Json(json!({
                            "status": "success",
                            "data": null,
                            "message": "No profile photo available.",
                        })))
                    }
                    Err(e) => Err(e),
                }
            }
            "profile_update_my_profile" => {
                let payload = req_object(params, "update_payload")?;
                let url = format!("{}/me", base);
                let data = self
                    .client
                    .patch_json(&url, scope, &serde_json::Value::Object(payload.clone()), &[])
                    .await?;
                if data.as_object().map(|o| o.is_empty()).unwrap_or(false) {
                    return Ok(ok_message("Profile updated.", 204));
                }
                Ok(ok(data))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}
