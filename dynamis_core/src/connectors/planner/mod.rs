use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::connectors::parse_utc_datetime;
use crate::envelope::{
    ok, ok_message, ok_paged_items, opt_str, opt_u32, opt_usize, req_str, ActionOutput, Params,
};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::paging::PageSpec;
use crate::Connector;

const ACTIONS: &[&str] = &[
    "planner_list_plans",
    "planner_get_plan",
    "planner_list_tasks",
    "planner_create_task",
    "planner_get_task",
    "planner_update_task",
    "planner_delete_task",
    "planner_list_buckets",
    "planner_create_bucket",
];

pub struct PlannerConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl PlannerConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn scope(&self) -> &str {
        &self.settings.graph_scope
    }

    fn base(&self) -> &str {
        &self.settings.graph_base_url
    }

    async fn details_etag(&self, task_id: &str) -> Option<String> {
        let url = format!("{}/planner/tasks/{}/details", self.base(), task_id);
        let query = vec![q("$select", "@odata.etag")];
        match self.client.get_json(&url, self.scope(), Some(&query)).await {
            Ok(details) => details
                .get("@odata.etag")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            Err(e) => {
                tracing::warn!("could not read details etag for task '{}': {}", task_id, e);
                None
            }
        }
    }

    async fn fetch_task(&self, task_id: &str, expand_details: bool) -> Result<Value, ConnectorError> {
        let url = format!("{}/planner/tasks/{}", self.base(), task_id);
        let query: Query = if expand_details {
            vec![q("$expand", "details")]
        } else {
            Vec::new()
        };
        self.client
            .get_json(&url, self.scope(), if query.is_empty() { None } else { Some(&query) })
            .await
    }

    /// Planner PATCHes require If-Match; the etag may arrive as a param or
    /// embedded in the payload as `@odata.etag`.
    fn take_etag(payload: &mut serde_json::Map<String, Value>, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(|s| s.to_string())
            .or_else(|| {
                payload
                    .remove("@odata.etag")
                    .and_then(|v| v.as_str().map(|s| s.to_string()))
            })
    }

    fn normalize_dates(payload: &mut serde_json::Map<String, Value>) -> Result<(), ConnectorError> {
        for field in ["dueDateTime", "startDateTime"] {
            if let Some(raw) = payload.get(field).and_then(|v| v.as_str()) {
                let normalized = parse_utc_datetime(raw, field)?;
                payload.insert(field.to_string(), json!(normalized));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for PlannerConnector {
    fn name(&self) -> &'static str {
        "planner"
    }

    fn description(&self) -> &'static str {
        "Microsoft Planner over Graph: plans, buckets, tasks and task details."
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
            "planner_list_plans" => {
                let owner_type = opt_str(params, "owner_type").unwrap_or("user").to_lowercase();
                let url = match owner_type.as_str() {
                    "user" => format!("{}/me/planner/plans", self.base()),
                    "group" => {
                        let owner_id = req_str(params, "owner_id")?;
                        format!("{}/groups/{}/planner/plans", self.base(), owner_id)
                    }
                    _ => {
                        return Err(ConnectorError::InvalidParams(
                            "'owner_type' must be 'user' or 'group'".to_string(),
                        ))
                    }
                };
                let top = opt_u32(params, "top").unwrap_or(25).clamp(1, 100);
                let mut query: Query = vec![
                    q("$top", top.to_string()),
                    q(
                        "$select",
                        opt_str(params, "select").unwrap_or("id,title,owner,createdDateTime,container"),
                    ),
                ];
                if let Some(filter) = opt_str(params, "filter") {
                    query.push(q("$filter", filter));
                }
                let data = self.client.get_json(&url, self.scope(), Some(&query)).await?;
                Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
            }
            "planner_get_plan" => {
                let plan_id = req_str(params, "plan_id")?;
                let url = format!("{}/planner/plans/{}", self.base(), plan_id);
                let query = vec![q(
                    "$select",
                    opt_str(params, "select")
                        .unwrap_or("id,title,owner,createdDateTime,container,details"),
                )];
                Ok(ok(self.client.get_json(&url, self.scope(), Some(&query)).await?))
            }
            "planner_list_tasks" => {
                let plan_id = req_str(params, "plan_id")?;
                let per_page = opt_u32(params, "top_per_page").unwrap_or(25).clamp(1, 100);
                let url = format!("{}/planner/plans/{}/tasks", self.base(), plan_id);
                let mut query: Query = vec![q("$top", per_page.to_string())];
                if let Some(select) = opt_str(params, "select") {
                    query.push(q("$select", select));
                }
                let spec = PageSpec::new(
                    per_page,
                    Some(opt_usize(params, "max_items_total").unwrap_or(200)),
                    self.settings.max_paging_pages,
                );
                let outcome = self
                    .client
                    .paged_get(&url, self.scope(), &query, &spec, &[])
                    .await?;
                Ok(ok_paged_items(outcome))
            }
            "planner_create_task" => {
                let plan_id = req_str(params, "plan_id")?;
                let title = req_str(params, "title")?;
                let mut payload = json!({ "planId": plan_id, "title": title });
                if let Some(bucket) = opt_str(params, "bucket_id") {
                    payload["bucketId"] = json!(bucket);
                }
                if let Some(assignments) = params.get("assignments").filter(|v| v.is_object()) {
                    payload["assignments"] = assignments.clone();
                }
                if let Some(due) = opt_str(params, "dueDateTime") {
                    payload["dueDateTime"] = json!(parse_utc_datetime(due, "dueDateTime")?);
                }
                let url = format!("{}/planner/tasks", self.base());
                let mut task = self.client.post_json(&url, self.scope(), &payload).await?;

                // an optional details payload is applied right after create
                if let Some(details) = params.get("details_payload").and_then(|v| v.as_object()) {
                    if let Some(task_id) = task.get("id").and_then(|v| v.as_str()).map(String::from)
                    {
                        let etag = self.details_etag(&task_id).await;
                        let headers = match etag {
                            Some(etag) => vec![("If-Match", etag)],
                            None => Vec::new(),
                        };
                        let details_url =
                            format!("{}/planner/tasks/{}/details", self.base(), task_id);
                        let updated = self
                            .client
                            .patch_json(
                                &details_url,
                                self.scope(),
                                &Value::Object(details.clone()),
                                &headers,
                            )
                            .await?;
                        task["details"] = updated;
                        task["details_update_status"] = json!("success");
                    }
                }
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": task,
                    "message": "Planner task created.",
                })))
            }
            "planner_get_task" => {
                let task_id = req_str(params, "task_id")?;
                let expand = params
                    .get("expand_details")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                Ok(ok(self.fetch_task(task_id, expand).await?))
            }
            "planner_update_task" => {
                let task_id = req_str(params, "task_id")?;
                let task_payload = params.get("update_payload_task").and_then(|v| v.as_object());
                let details_payload = params
                    .get("update_payload_details")
                    .and_then(|v| v.as_object());
                if task_payload.is_none() && details_payload.is_none() {
                    return Ok(ActionOutput::Json(json!({
                        "status": "success",
                        "message": "No changes requested.",
                        "data": { "id": task_id },
                    })));
                }

                let mut result = json!({ "id": task_id });
                if let Some(task_payload) = task_payload {
                    let mut payload = task_payload.clone();
                    let etag = Self::take_etag(&mut payload, opt_str(params, "etag_task"));
                    Self::normalize_dates(&mut payload)?;
                    let headers = match etag {
                        Some(etag) => vec![("If-Match", etag)],
                        None => Vec::new(),
                    };
                    let url = format!("{}/planner/tasks/{}", self.base(), task_id);
                    let patched = self
                        .client
                        .patch_json(&url, self.scope(), &Value::Object(payload), &headers)
                        .await?;
                    result = if patched.as_object().map(|o| o.is_empty()).unwrap_or(false) {
                        // 204: re-read the task for the caller
                        self.fetch_task(task_id, details_payload.is_some()).await?
                    } else {
                        patched
                    };
                    result["task_update_status"] = json!("success");
                }

                if let Some(details_payload) = details_payload {
                    let mut payload = details_payload.clone();
                    let etag = Self::take_etag(&mut payload, opt_str(params, "etag_details"))
                        .or_else(|| {
                            result
                                .get("details")
                                .and_then(|d| d.get("@odata.etag"))
                                .and_then(|v| v.as_str())
                                .map(|s| s.to_string())
                        });
                    let etag = match etag {
                        Some(etag) => Some(etag),
                        None => self.details_etag(task_id).await,
                    };
                    let headers = match etag {
                        Some(etag) => vec![("If-Match", etag)],
                        None => Vec::new(),
                    };
                    let url = format!("{}/planner/tasks/{}/details", self.base(), task_id);
                    let patched = self
                        .client
                        .patch_json(&url, self.scope(), &Value::Object(payload), &headers)
                        .await?;
                    let details = if patched.as_object().map(|o| o.is_empty()).unwrap_or(false) {
                        self.fetch_task(task_id, true)
                            .await?
                            .get("details")
                            .cloned()
                            .unwrap_or_else(|| json!({}))
                    } else {
                        patched
                    };
                    result["details"] = details;
                    result["details_update_status"] = json!("success");
                }

                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": result,
                    "message": "Update processed.",
                })))
            }
            "planner_delete_task" => {
                let task_id = req_str(params, "task_id")?;
                let headers = match opt_str(params, "etag") {
                    Some(etag) => vec![("If-Match", etag.to_string())],
                    None => {
                        tracing::warn!("deleting planner task '{}' without an etag", task_id);
                        Vec::new()
                    }
                };
                let url = format!("{}/planner/tasks/{}", self.base(), task_id);
                let status = self.client.delete(&url, self.scope(), &headers).await?;
                Ok(ok_message(
                    format!("Planner task '{}' deleted.", task_id),
                    status,
                ))
            }
            "planner_list_buckets" => {
                let plan_id = req_str(params, "plan_id")?;
                let url = format!("{}/planner/plans/{}/buckets", self.base(), plan_id);
                let mut query: Query = vec![q(
                    "$select",
                    opt_str(params, "select").unwrap_or("id,name,orderHint,planId"),
                )];
                if let Some(filter) = opt_str(params, "filter") {
                    query.push(q("$filter", filter));
                }
                let data = self.client.get_json(&url, self.scope(), Some(&query)).await?;
                Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
            }
            "planner_create_bucket" => {
                let plan_id = req_str(params, "plan_id")?;
                let name = req_str(params, "name")?;
                let mut payload = json!({ "name": name, "planId": plan_id });
                if let Some(order_hint) = opt_str(params, "orderHint") {
                    payload["orderHint"] = json!(order_hint);
                }
                let url = format!("{}/planner/buckets", self.base());
                let data = self.client.post_json(&url, self.scope(), &payload).await?;
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": data,
                    "message": "Bucket created.",
                })))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_prefers_explicit_param_over_payload() {
        let mut payload = json!({"title": "x", "@odata.etag": "W/\"payload\""})
            .as_object()
            .unwrap()
            .clone();
        let etag = PlannerConnector::take_etag(&mut payload, Some("W/\"param\""));
        assert_eq!(etag.as_deref(), Some("W/\"param\""));
        // payload etag removed either way? only when consumed
        let mut payload = json!({"@odata.etag": "W/\"payload\""})
            .as_object()
            .unwrap()
            .clone();
        let etag = PlannerConnector::take_etag(&mut payload, None);
        assert_eq!(etag.as_deref(), Some("W/\"payload\""));
        assert!(payload.get("@odata.etag").is_none());
    }

    #[test]
    fn task_dates_are_normalized_to_utc() {
        let mut payload = json!({"dueDateTime": "2025-06-01T10:00:00+02:00"})
            .as_object()
            .unwrap()
            .clone();
        PlannerConnector::normalize_dates(&mut payload).unwrap();
        assert_eq!(payload["dueDateTime"], "2025-06-01T08:00:00Z");

        let mut payload = json!({"startDateTime": "not-a-date"})
            .as_object()
            .unwrap()
            .clone();
        assert!(PlannerConnector::normalize_dates(&mut payload).is_err());
    }
}
