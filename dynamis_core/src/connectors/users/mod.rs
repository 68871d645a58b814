use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::Settings;
use crate::envelope::{
    ok, ok_message, ok_paged_collection, opt_str, opt_u32, opt_usize, req_object, req_str,
    ActionOutput, Params,
};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::paging::PageSpec;
use crate::Connector;

const ACTIONS: &[&str] = &[
    "user_list_users",
    "user_get_user",
    "user_create_user",
    "user_update_user",
    "user_delete_user",
    "user_list_groups",
    "user_get_group",
    "user_list_group_members",
    "user_add_group_member",
    "user_remove_group_member",
    "user_check_group_membership",
];

const USER_SELECT: &str =
    "id,displayName,userPrincipalName,mail,jobTitle,department,accountEnabled";
const GROUP_SELECT: &str = "id,displayName,description,mail,groupTypes,visibility";

/// Entra ID directory: users, groups, membership.
pub struct UsersConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl UsersConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    async fn paged_directory(
        &self,
        url: String,
        params: &Params,
        default_select: &str,
    ) -> Result<ActionOutput, ConnectorError> {
        let per_page = opt_u32(params, "top_per_page").unwrap_or(25).clamp(1, 100);
        let mut query: Query = vec![
            q("$top", per_page.to_string()),
            q("$select", opt_str(params, "select").unwrap_or(default_select)),
        ];
        if let Some(filter) = opt_str(params, "filter_query") {
            query.push(q("$filter", filter));
        }
        let spec = PageSpec::new(
            per_page,
            opt_usize(params, "max_items_total"),
            self.settings.max_paging_pages,
        );
        let outcome = self
            .client
            .paged_get(&url, &self.settings.graph_scope, &query, &spec, &[])
            .await?;
        Ok(ok_paged_collection(outcome))
    }
}

#[async_trait]
impl Connector for UsersConnector {
    fn name(&self) -> &'static str {
        "users"
    }

    fn description(&self) -> &'static str {
        "Entra ID directory over Graph: users, groups, membership."
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
            "user_list_users" => {
                self.paged_directory(format!("{}/users", base), params, USER_SELECT)
                    .await
            }
            "user_get_user" => {
                let user_id = req_str(params, "user_id")?;
                let url = format!("{}/users/{}", base, user_id);
                let query: Query = vec![q(
                    "$select",
                    opt_str(params, "select").unwrap_or(USER_SELECT),
                )];
                Ok(ok(self.client.get_json(&url, scope, Some(&query)).await?))
            }
            "user_create_user" => {
                let payload = req_object(params, "user_payload")?;
                for field in [
                    "accountEnabled",
                    "displayName",
                    "mailNickname",
                    "userPrincipalName",
                    "passwordProfile",
                ] {
                    if !payload.contains_key(field) {
                        return Err(ConnectorError::InvalidParams(format!(
                            "'user_payload' is missing required field '{}'",
                            field
                        )));
                    }
                }
                let url = format!("{}/users", base);
                Ok(ok(self
                    .client
                    .post_json(&url, scope, &serde_json::Value::Object(payload.clone()))
                    .await?))
            }
            "user_update_user" => {
                let user_id = req_str(params, "user_id")?;
                let payload = req_object(params, "update_payload")?;
                let url = format!("{}/users/{}", base, user_id);
                let data = self
                    .client
                    .patch_json(&url, scope, &serde_json::Value::Object(payload.clone()), &[])
                    .await?;
                if data.as_object().map(|o| o.is_empty()).unwrap_or(false) {
                    return Ok(ok_message(format!("User '{}' updated.", user_id), 204));
                }
                Ok(ok(data))
            }
            "user_delete_user" => {
                let user_id = req_str(params, "user_id")?;
                let url = format!("{}/users/{}", base, user_id);
                let status = self.client.delete(&url, scope, &[]).await?;
                Ok(ok_message(format!("User '{}' deleted.", user_id), status))
            }
            "user_list_groups" => {
                self.paged_directory(format!("{}/groups", base), params, GROUP_SELECT)
                    .await
            }
            "user_get_group" => {
                let group_id = req_str(params, "group_id")?;
                let url = format!("{}/groups/{}", base, group_id);
                let query: Query = vec![q(
                    "$select",
                    opt_str(params, "select").unwrap_or(GROUP_SELECT),
                )];
                Ok(ok(self.client.get_json(&url, scope, Some(&query)).await?))
            }
            "user_list_group_members" => {
                let group_id = req_str(params, "group_id")?;
                self.paged_directory(
                    format!("{}/groups/{}/members", base, group_id),
                    params,
                    USER_SELECT,
                )
                .await
            }
            "user_add_group_member" => {
                let group_id = req_str(params, "group_id")?;
                let user_id = req_str(params, "user_id")?;
                let url = format!("{}/groups/{}/members/$ref", base, group_id);
                let payload = json!({
                    "@odata.id": format!("{}/directoryObjects/{}", base, user_id)
                });
                let resp = self.client.post_for_response(&url, scope, &payload).await?;
                Ok(ok_message(
                    format!("User '{}' added to group '{}'.", user_id, group_id),
                    resp.status().as_u16(),
                ))
            }
            "user_remove_group_member" => {
                let group_id = req_str(params, "group_id")?;
                let user_id = req_str(params, "user_id")?;
                let url = format!("{}/groups/{}/members/{}/$ref", base, group_id, user_id);
                let status = self.client.delete(&url, scope, &[]).await?;
                Ok(ok_message(
                    format!("User '{}' removed from group '{}'.", user_id, group_id),
                    status,
                ))
            }
            "user_check_group_membership" => {
                let user_id = req_str(params, "user_id")?;
                let group_ids = params
                    .get("group_ids")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .or_else(|| opt_str(params, "group_id").map(|g| vec![json!(g)]))
                    .ok_or_else(|| {
                        ConnectorError::InvalidParams(
                            "'group_ids' (array) or 'group_id' is required".to_string(),
                        )
                    })?;
                let url = format!("{}/users/{}/checkMemberGroups", base, user_id);
                let data = self
                    .client
                    .post_json(&url, scope, &json!({ "groupIds": group_ids }))
                    .await?;
                Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}
