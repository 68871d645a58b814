use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::envelope::{
    ok, ok_paged_collection, opt_str, opt_u32, opt_usize, req_array, req_object, req_str,
    ActionOutput, Params,
};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::paging::PageSpec;
use crate::Connector;

const ACTIONS: &[&str] = &[
    "teams_list_joined_teams",
    "teams_get_team",
    "teams_list_channels",
    "teams_get_channel",
    "teams_send_channel_message",
    "teams_list_channel_messages",
    "teams_reply_to_message",
    "teams_send_chat_message",
    "teams_list_chats",
    "teams_get_chat",
    "teams_create_chat",
    "teams_list_chat_messages",
    "teams_schedule_meeting",
    "teams_get_meeting_details",
    "teams_list_members",
];

pub struct TeamsConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl TeamsConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn page_spec(&self, params: &Params, per_page: u32) -> PageSpec {
        PageSpec::new(
            per_page,
            opt_usize(params, "max_items_total"),
            self.settings.max_paging_pages,
        )
    }

    async fn paged(
        &self,
        url: &str,
        params: &Params,
        default_select: Option<&str>,
    ) -> Result<ActionOutput, ConnectorError> {
        let per_page = opt_u32(params, "top_per_page").unwrap_or(25).clamp(1, 50);
        let mut query: Query = vec![q("$top", per_page.to_string())];
        match opt_str(params, "select").or(default_select) {
            Some(select) => query.push(q("$select", select)),
            None => {}
        }
        if let Some(filter) = opt_str(params, "filter_query") {
            query.push(q("$filter", filter));
        }
        let outcome = self
            .client
            .paged_get(
                url,
                &self.settings.graph_scope,
                &query,
                &self.page_spec(params, per_page),
                &[],
            )
            .await?;
        Ok(ok_paged_collection(outcome))
    }

    fn message_body(params: &Params) -> Result<Value, ConnectorError> {
        let content = req_str(params, "message_content")?;
        let content_type = opt_str(params, "content_type").unwrap_or("text");
        if !content_type.eq_ignore_ascii_case("text") && !content_type.eq_ignore_ascii_case("html")
        {
            return Err(ConnectorError::InvalidParams(
                "'content_type' must be text or html".to_string(),
            ));
        }
        Ok(json!({ "body": { "contentType": content_type, "content": content } }))
    }
}

#[async_trait]
impl Connector for TeamsConnector {
    fn name(&self) -> &'static str {
        "teams"
    }

    fn description(&self) -> &'static str {
        "Microsoft Teams over Graph: teams, channels, chats, messages, meetings."
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
            "teams_list_joined_teams" => {
                let url = format!("{}/me/joinedTeams", base);
                self.paged(&url, params, Some("id,displayName,description,isArchived"))
                    .await
            }
            "teams_get_team" => {
                let team_id = req_str(params, "team_id")?;
                let url = format!("{}/teams/{}", base, team_id);
                Ok(ok(self.client.get_json(&url, scope, None).await?))
            }
            "teams_list_channels" => {
                let team_id = req_str(params, "team_id")?;
                let url = format!("{}/teams/{}/channels", base, team_id);
                self.paged(
                    &url,
                    params,
                    Some("id,displayName,description,webUrl,membershipType"),
                )
                .await
            }
            "teams_get_channel" => {
                let team_id = req_str(params, "team_id")?;
                let channel_id = req_str(params, "channel_id")?;
                let url = format!("{}/teams/{}/channels/{}", base, team_id, channel_id);
                Ok(ok(self.client.get_json(&url, scope, None).await?))
            }
            "teams_send_channel_message" => {
                let team_id = req_str(params, "team_id")?;
                let channel_id = req_str(params, "channel_id")?;
                let body = Self::message_body(params)?;
                let url = format!("{}/teams/{}/channels/{}/messages", base, team_id, channel_id);
                Ok(ok(self.client.post_json(&url, scope, &body).await?))
            }
            "teams_list_channel_messages" => {
                let team_id = req_str(params, "team_id")?;
                let channel_id = req_str(params, "channel_id")?;
                let url = format!("{}/teams/{}/channels/{}/messages", base, team_id, channel_id);
                self.paged(&url, params, None).await
            }
            "teams_reply_to_message" => {
                let team_id = req_str(params, "team_id")?;
                let channel_id = req_str(params, "channel_id")?;
                let message_id = req_str(params, "message_id")?;
                let body = Self::message_body(params)?;
                let url = format!(
                    "{}/teams/{}/channels/{}/messages/{}/replies",
                    base, team_id, channel_id, message_id
                );
                Ok(ok(self.client.post_json(&url, scope, &body).await?))
            }
            "teams_list_chats" => {
                let url = format!("{}/me/chats", base);
                self.paged(&url, params, Some("id,topic,chatType,lastUpdatedDateTime,webUrl"))
                    .await
            }
            "teams_get_chat" => {
                let chat_id = req_str(params, "chat_id")?;
                let url = format!("{}/chats/{}", base, chat_id);
                Ok(ok(self.client.get_json(&url, scope, None).await?))
            }
            "teams_create_chat" => {
                // members are ready-made conversationMember objects
                let members = req_array(params, "members")?;
                let chat_type = opt_str(params, "chat_type").unwrap_or("group");
                let mut payload = json!({ "chatType": chat_type, "members": members });
                if let Some(topic) = opt_str(params, "topic") {
                    payload["topic"] = json!(topic);
                }
                let url = format!("{}/chats", base);
                Ok(ok(self.client.post_json(&url, scope, &payload).await?))
            }
            "teams_send_chat_message" => {
                let chat_id = req_str(params, "chat_id")?;
                let body = Self::message_body(params)?;
                let url = format!("{}/chats/{}/messages", base, chat_id);
                Ok(ok(self.client.post_json(&url, scope, &body).await?))
            }
            "teams_list_chat_messages" => {
                let chat_id = req_str(params, "chat_id")?;
                let url = format!("{}/chats/{}/messages", base, chat_id);
                self.paged(&url, params, None).await
            }
            "teams_schedule_meeting" => {
                let payload = req_object(params, "meeting_payload")?;
                for field in ["subject", "start", "end"] {
                    if !payload.contains_key(field) {
                        return Err(ConnectorError::InvalidParams(format!(
                            "'meeting_payload' is missing required field '{}'",
                            field
                        )));
                    }
                }
                let mut body = Value::Object(payload.clone());
                body["isOnlineMeeting"] = json!(true);
                body["onlineMeetingProvider"] = json!("teamsForBusiness");
                let url = format!("{}/me/events", base);
                Ok(ok(self.client.post_json(&url, scope, &body).await?))
            }
            "teams_get_meeting_details" => {
                let event_id = req_str(params, "event_id")?;
                let url = format!("{}/me/events/{}", base, event_id);
                let query: Query = vec![q(
                    "$select",
                    opt_str(params, "select")
                        .unwrap_or("id,subject,start,end,onlineMeeting,attendees,organizer,webLink"),
                )];
                Ok(ok(self.client.get_json(&url, scope, Some(&query)).await?))
            }
            "teams_list_members" => {
                let url = match (opt_str(params, "team_id"), opt_str(params, "chat_id")) {
                    (Some(team_id), _) => format!("{}/teams/{}/members", base, team_id),
                    (None, Some(chat_id)) => format!("{}/chats/{}/members", base, chat_id),
                    (None, None) => {
                        return Err(ConnectorError::InvalidParams(
                            "'team_id' or 'chat_id' is required".to_string(),
                        ))
                    }
                };
                self.paged(&url, params, Some("id,displayName,roles,email")).await
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_body_validates_content_type() {
        let mut params = Params::new();
        params.insert("message_content".to_string(), json!("hola"));
        params.insert("content_type".to_string(), json!("markdown"));
        assert!(TeamsConnector::message_body(&params).is_err());

        params.insert("content_type".to_string(), json!("html"));
        let body = TeamsConnector::message_body(&params).unwrap();
        assert_eq!(body["body"]["content"], "hola");
        assert_eq!(body["body"]["contentType"], "html");
    }
}
