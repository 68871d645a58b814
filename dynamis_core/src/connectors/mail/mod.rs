use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::connectors::user_path;
use crate::envelope::{
    ok, ok_message, ok_paged_collection, opt_str, opt_u32, opt_usize, req_str, ActionOutput,
    Params,
};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::paging::PageSpec;
use crate::Connector;

const MAIL_PAGE_SIZE: u32 = 25;
const MAIL_PAGE_SIZE_MAX: u32 = 50;

const ACTIONS: &[&str] = &[
    "email_list_messages",
    "email_get_message",
    "email_send_message",
    "email_reply_message",
    "email_forward_message",
    "email_delete_message",
    "email_move_message",
    "email_list_folders",
    "email_create_folder",
    "email_search_messages",
];

const LIST_SELECT: &str = "id,receivedDateTime,subject,sender,from,toRecipients,ccRecipients,isRead,hasAttachments,importance,webLink";
const GET_SELECT: &str = "id,receivedDateTime,subject,sender,from,toRecipients,ccRecipients,bccRecipients,body,bodyPreview,importance,isRead,isDraft,hasAttachments,webLink,conversationId,parentFolderId";

pub struct MailConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

/// Accept recipients as a single address string, a `,`/`;`-separated
/// string, an array of address strings, or ready-made Graph recipient
/// objects. Invalid entries are dropped.
fn normalize_recipients(input: Option<&Value>) -> Vec<Value> {
    fn push_addr(out: &mut Vec<Value>, addr: &str) {
        let addr = addr.trim();
        if !addr.is_empty() && addr.contains('@') {
            out.push(json!({ "emailAddress": { "address": addr } }));
        }
    }
    let mut out = Vec::new();
    let Some(input) = input else {
        return out;
    };
    match input {
        Value::String(s) => {
            for part in s.replace(';', ",").split(',') {
                push_addr(&mut out, part);
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(s) => push_addr(&mut out, s),
                    Value::Object(obj) => {
                        let valid = obj
                            .get("emailAddress")
                            .and_then(|e| e.get("address"))
                            .and_then(|a| a.as_str())
                            .map(|a| !a.trim().is_empty() && a.contains('@'))
                            .unwrap_or(false);
                        if valid {
                            out.push(item.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    out
}

impl MailConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn mailbox<'a>(&'a self, params: &'a Params) -> &'a str {
        opt_str(params, "mailbox").unwrap_or(&self.settings.mailbox_user_id)
    }

    fn page_spec(&self, params: &Params, per_page: u32) -> PageSpec {
        PageSpec::new(
            per_page,
            opt_usize(params, "max_items_total"),
            self.settings.max_paging_pages,
        )
    }

    async fn list_messages(
        &self,
        params: &Params,
        search_override: Option<&str>,
    ) -> Result<ActionOutput, ConnectorError> {
        let mailbox = self.mailbox(params);
        let folder_id = opt_str(params, "folder_id").unwrap_or("Inbox");
        let per_page = opt_u32(params, "top_per_page")
            .unwrap_or(MAIL_PAGE_SIZE)
            .clamp(1, MAIL_PAGE_SIZE_MAX);
        let url = format!(
            "{}/{}/mailFolders/{}/messages",
            self.settings.graph_base_url,
            user_path(mailbox),
            folder_id
        );

        let mut query: Query = vec![
            q("$top", per_page.to_string()),
            q("$select", opt_str(params, "select").unwrap_or(LIST_SELECT)),
        ];
        let search = search_override.or_else(|| opt_str(params, "search"));
        let order_by = opt_str(params, "order_by").unwrap_or("receivedDateTime desc");
        if let Some(search) = search {
            // $orderby is not allowed alongside $search on messages
            query.push(q("$search", format!("\"{}\"", search)));
        } else if let Some(filter) = opt_str(params, "filter_query") {
            query.push(q("$filter", filter));
            query.push(q("$orderby", order_by));
        } else {
            query.push(q("$orderby", order_by));
        }

        let outcome = self
            .client
            .paged_get(
                &url,
                &self.settings.graph_scope,
                &query,
                &self.page_spec(params, per_page),
                &[],
            )
            .await?;
        Ok(ok_paged_collection(outcome))
    }

    async fn reply_or_forward(
        &self,
        params: &Params,
        segment: &str,
    ) -> Result<ActionOutput, ConnectorError> {
        let message_id = req_str(params, "message_id")?;
        let comment = opt_str(params, "comment").unwrap_or("");
        let mailbox = self.mailbox(params);
        let mut body = json!({ "comment": comment });
        if segment == "forward" {
            let to = normalize_recipients(params.get("to_recipients"));
            if to.is_empty() {
                return Err(ConnectorError::InvalidParams(
                    "'to_recipients' with at least one valid address is required".to_string(),
                ));
            }
            body["toRecipients"] = Value::Array(to);
        }
        let url = format!(
            "{}/{}/messages/{}/{}",
            self.settings.graph_base_url,
            user_path(mailbox),
            message_id,
            segment
        );
        let resp = self
            .client
            .post_for_response(&url, &self.settings.graph_scope, &body)
            .await?;
        Ok(ok_message(
            format!("Message '{}' {} accepted.", message_id, segment),
            resp.status().as_u16(),
        ))
    }
}

#[async_trait]
impl Connector for MailConnector {
    fn name(&self) -> &'static str {
        "mail"
    }

    fn description(&self) -> &'static str {
        "Outlook mail over Microsoft Graph: messages, folders, search, send/reply/forward."
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
            "email_list_messages" => self.list_messages(params, None).await,
            "email_search_messages" => {
                let query_text = req_str(params, "query")?;
                self.list_messages(params, Some(query_text)).await
            }
            "email_get_message" => {
                let message_id = req_str(params, "message_id")?;
                let mailbox = self.mailbox(params);
                let url = format!(
                    "{}/{}/messages/{}",
                    base,
                    user_path(mailbox),
                    message_id
                );
                let mut query: Query = vec![q(
                    "$select",
                    opt_str(params, "select").unwrap_or(GET_SELECT),
                )];
                if let Some(expand) = opt_str(params, "expand") {
                    query.push(q("$expand", expand));
                }
                let data = self.client.get_json(&url, scope, Some(&query)).await?;
                Ok(ok(data))
            }
            "email_send_message" => {
                let subject = req_str(params, "subject")?;
                let body_content = req_str(params, "body_content")?;
                let body_type = opt_str(params, "body_type").unwrap_or("HTML").to_uppercase();
                if body_type != "HTML" && body_type != "TEXT" {
                    return Err(ConnectorError::InvalidParams(
                        "'body_type' must be HTML or TEXT".to_string(),
                    ));
                }
                let to = normalize_recipients(params.get("to_recipients"));
                if to.is_empty() {
                    return Err(ConnectorError::InvalidParams(
                        "'to_recipients' with at least one valid address is required".to_string(),
                    ));
                }
                let mut message = json!({
                    "subject": subject,
                    "body": { "contentType": body_type, "content": body_content },
                    "toRecipients": to,
                });
                let cc = normalize_recipients(params.get("cc_recipients"));
                if !cc.is_empty() {
                    message["ccRecipients"] = Value::Array(cc);
                }
                let bcc = normalize_recipients(params.get("bcc_recipients"));
                if !bcc.is_empty() {
                    message["bccRecipients"] = Value::Array(bcc);
                }
                if let Some(atts) = params.get("attachments").and_then(|v| v.as_array()) {
                    message["attachments"] = Value::Array(atts.clone());
                }
                let save = params
                    .get("save_to_sent_items")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                let payload = json!({ "message": message, "saveToSentItems": save });
                let mailbox = self.mailbox(params);
                let url = format!("{}/{}/sendMail", base, user_path(mailbox));
                let resp = self.client.post_for_response(&url, scope, &payload).await?;
                Ok(ok_message(
                    "Send mail request accepted.",
                    resp.status().as_u16(),
                ))
            }
            "email_reply_message" => {
                let reply_all = params
                    .get("reply_all")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                self.reply_or_forward(params, if reply_all { "replyAll" } else { "reply" })
                    .await
            }
            "email_forward_message" => self.reply_or_forward(params, "forward").await,
            "email_delete_message" => {
                let message_id = req_str(params, "message_id")?;
                let mailbox = self.mailbox(params);
                let url = format!(
                    "{}/{}/messages/{}",
                    base,
                    user_path(mailbox),
                    message_id
                );
                let status = self.client.delete(&url, scope, &[]).await?;
                Ok(ok_message(
                    format!("Message '{}' deleted.", message_id),
                    status,
                ))
            }
            "email_move_message" => {
                let message_id = req_str(params, "message_id")?;
                let destination = req_str(params, "destination_folder_id")?;
                let mailbox = self.mailbox(params);
                let url = format!(
                    "{}/{}/messages/{}/move",
                    base,
                    user_path(mailbox),
                    message_id
                );
                let data = self
                    .client
                    .post_json(&url, scope, &json!({ "destinationId": destination }))
                    .await?;
                Ok(ok(data))
            }
            "email_list_folders" => {
                let mailbox = self.mailbox(params);
                let url = match opt_str(params, "parent_folder_id") {
                    Some(parent) => format!(
                        "{}/{}/mailFolders/{}/childFolders",
                        base,
                        user_path(mailbox),
                        parent
                    ),
                    None => format!("{}/{}/mailFolders", base, user_path(mailbox)),
                };
                let per_page = opt_u32(params, "top_per_page")
                    .unwrap_or(MAIL_PAGE_SIZE)
                    .clamp(1, MAIL_PAGE_SIZE_MAX);
                let mut query: Query = vec![q("$top", per_page.to_string())];
                query.push(q(
                    "$select",
                    opt_str(params, "select")
                        .unwrap_or("id,displayName,parentFolderId,childFolderCount,unreadItemCount,totalItemCount"),
                ));
                let outcome = self
                    .client
                    .paged_get(&url, scope, &query, &self.page_spec(params, per_page), &[])
                    .await?;
                Ok(ok_paged_collection(outcome))
            }
            "email_create_folder" => {
                let folder_name = req_str(params, "folder_name")?;
                let mailbox = self.mailbox(params);
                let url = match opt_str(params, "parent_folder_id") {
                    Some(parent) => format!(
                        "{}/{}/mailFolders/{}/childFolders",
                        base,
                        user_path(mailbox),
                        parent
                    ),
                    None => format!("{}/{}/mailFolders", base, user_path(mailbox)),
                };
                let data = self
                    .client
                    .post_json(&url, scope, &json!({ "displayName": folder_name }))
                    .await?;
                Ok(ok(data))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipients_from_delimited_string() {
        let v = json!("a@x.com; b@y.com,, not-an-email");
        let recs = normalize_recipients(Some(&v));
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0]["emailAddress"]["address"], "a@x.com");
        assert_eq!(recs[1]["emailAddress"]["address"], "b@y.com");
    }

    #[test]
    fn recipients_from_mixed_array() {
        let v = json!([
            "a@x.com",
            { "emailAddress": { "address": "b@y.com" } },
            { "emailAddress": { "address": "" } },
            42
        ]);
        let recs = normalize_recipients(Some(&v));
        assert_eq!(recs.len(), 2);
    }

    #[test]
    fn recipients_absent_is_empty() {
        assert!(normalize_recipients(None).is_empty());
        assert!(normalize_recipients(Some(&json!(17))).is_empty());
    }
}
