use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::connectors::parse_utc_datetime;
use crate::envelope::{
    ok, ok_message, ok_paged_collection, opt_str, opt_u32, opt_usize, req_object, req_str,
    ActionOutput, Params,
};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::paging::PageSpec;
use crate::Connector;

const ACTIONS: &[&str] = &[
    "todo_list_task_lists",
    "todo_create_task_list",
    "todo_list_tasks",
    "todo_create_task",
    "todo_get_task",
    "todo_update_task",
    "todo_delete_task",
];

pub struct TodoConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl TodoConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn scope(&self) -> &str {
        &self.settings.graph_scope
    }

    fn lists_base(&self) -> String {
        format!("{}/me/todo/lists", self.settings.graph_base_url)
    }

    /// A due date may arrive as a plain datetime string or a ready-made
    /// `{dateTime, timeZone}` object; strings normalize to UTC.
    fn due_date_value(input: &Value) -> Result<Value, ConnectorError> {
        match input {
            Value::String(s) => Ok(json!({
                "dateTime": parse_utc_datetime(s, "dueDateTime")?,
                "timeZone": "UTC",
            })),
            Value::Object(_) => Ok(input.clone()),
            _ => Err(ConnectorError::InvalidParams(
                "'dueDateTime' must be a datetime string or a {dateTime, timeZone} object"
                    .to_string(),
            )),
        }
    }
}

#[async_trait]
impl Connector for TodoConnector {
    fn name(&self) -> &'static str {
        "todo"
    }

    fn description(&self) -> &'static str {
        "Microsoft To Do over Graph: task lists and tasks."
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
            "todo_list_task_lists" => {
                let per_page = opt_u32(params, "top_per_page").unwrap_or(25).clamp(1, 100);
                let mut query: Query = vec![q("$top", per_page.to_string())];
                if let Some(select) = opt_str(params, "select") {
                    query.push(q("$select", select));
                }
                let spec = PageSpec::new(
                    per_page,
                    opt_usize(params, "max_items_total"),
                    self.settings.max_paging_pages,
                );
                let outcome = self
                    .client
                    .paged_get(&self.lists_base(), self.scope(), &query, &spec, &[])
                    .await?;
                Ok(ok_paged_collection(outcome))
            }
            "todo_create_task_list" => {
                let name = req_str(params, "displayName")?;
                let data = self
                    .client
                    .post_json(
                        &self.lists_base(),
                        self.scope(),
                        &json!({ "displayName": name }),
                    )
                    .await?;
                Ok(ok(data))
            }
            "todo_list_tasks" => {
                let list_id = req_str(params, "list_id")?;
                let per_page = opt_u32(params, "top_per_page").unwrap_or(25).clamp(1, 100);
                let url = format!("{}/{}/tasks", self.lists_base(), list_id);
                let mut query: Query = vec![q("$top", per_page.to_string())];
                if let Some(select) = opt_str(params, "select") {
                    query.push(q("$select", select));
                }
                if let Some(filter) = opt_str(params, "filter_query") {
                    query.push(q("$filter", filter));
                }
                if let Some(order) = opt_str(params, "orderby") {
                    query.push(q("$orderby", order));
                }
                let spec = PageSpec::new(
                    per_page,
                    opt_usize(params, "max_items_total"),
                    self.settings.max_paging_pages,
                );
                let outcome = self
                    .client
                    .paged_get(&url, self.scope(), &query, &spec, &[])
                    .await?;
                Ok(ok_paged_collection(outcome))
            }
            "todo_create_task" => {
                let list_id = req_str(params, "list_id")?;
                let title = req_str(params, "title")?;
                let mut payload = json!({ "title": title });
                if let Some(body) = opt_str(params, "body_content") {
                    payload["body"] = json!({
                        "content": body,
                        "contentType": opt_str(params, "body_type").unwrap_or("text"),
                    });
                }
                if let Some(due) = params.get("dueDateTime").filter(|v| !v.is_null()) {
                    payload["dueDateTime"] = Self::due_date_value(due)?;
                }
                if let Some(importance) = opt_str(params, "importance") {
                    payload["importance"] = json!(importance);
                }
                if let Some(reminder) = params.get("isReminderOn").and_then(|v| v.as_bool()) {
                    payload["isReminderOn"] = json!(reminder);
                }
                let url = format!("{}/{}/tasks", self.lists_base(), list_id);
                Ok(ok(self.client.post_json(&url, self.scope(), &payload).await?))
            }
            "todo_get_task" => {
                let list_id = req_str(params, "list_id")?;
                let task_id = req_str(params, "task_id")?;
                let url = format!("{}/{}/tasks/{}", self.lists_base(), list_id, task_id);
                let query: Query = match opt_str(params, "select") {
                    Some(select) => vec![q("$select", select)],
                    None => Vec::new(),
                };
                let data = self
                    .client
                    .get_json(
                        &url,
                        self.scope(),
                        if query.is_empty() { None } else { Some(&query) },
                    )
                    .await?;
                Ok(ok(data))
            }
            "todo_update_task" => {
                let list_id = req_str(params, "list_id")?;
                let task_id = req_str(params, "task_id")?;
                let updates = req_object(params, "update_payload")?;
                let mut payload = updates.clone();
                if let Some(due) = payload.get("dueDateTime").cloned() {
                    payload.insert("dueDateTime".to_string(), Self::due_date_value(&due)?);
                }
                let url = format!("{}/{}/tasks/{}", self.lists_base(), list_id, task_id);
                Ok(ok(self
                    .client
                    .patch_json(&url, self.scope(), &Value::Object(payload), &[])
                    .await?))
            }
            "todo_delete_task" => {
                let list_id = req_str(params, "list_id")?;
                let task_id = req_str(params, "task_id")?;
                let url = format!("{}/{}/tasks/{}", self.lists_base(), list_id, task_id);
                let status = self.client.delete(&url, self.scope(), &[]).await?;
                Ok(ok_message(
                    format!("To Do task '{}' deleted.", task_id),
                    status,
                ))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_date_string_normalizes_to_utc_object() {
        let v = TodoConnector::due_date_value(&json!("2025-07-01")).unwrap();
        assert_eq!(v["dateTime"], "2025-07-01T00:00:00Z");
        assert_eq!(v["timeZone"], "UTC");
    }

    #[test]
    fn due_date_object_passes_through() {
        let original = json!({"dateTime": "2025-07-01T09:00:00", "timeZone": "W. Europe Standard Time"});
        assert_eq!(TodoConnector::due_date_value(&original).unwrap(), original);
        assert!(TodoConnector::due_date_value(&json!(5)).is_err());
    }
}
