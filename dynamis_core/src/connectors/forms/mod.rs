use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::connectors::sharepoint::{resolve_drive_id, resolve_site_id};
use crate::envelope::{ok, opt_str, opt_u32, req_str, ActionOutput, Params};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::Connector;

const ACTIONS: &[&str] = &[
    "forms_list_forms",
    "forms_get_form",
    "forms_get_form_responses",
];

/// Microsoft Forms has no public Graph surface; forms are discovered as
/// FormPackage drive items and responses are read from the companion
/// workbook.
pub struct FormsConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

/// The drive search endpoint answers either bare DriveItems or
/// hitsContainers; flatten both shapes.
pub(crate) fn flatten_search_hits(value: &Value, keep: impl Fn(&Value) -> bool) -> Vec<Value> {
    let mut out = Vec::new();
    let Some(entries) = value.get("value").and_then(|v| v.as_array()) else {
        return out;
    };
    for entry in entries {
        if let Some(resource) = entry.get("resource").filter(|r| r.is_object()) {
            if keep(resource) {
                out.push(resource.clone());
            }
        } else if let Some(containers) = entry.get("hitsContainers").and_then(|v| v.as_array()) {
            for container in containers {
                for hit in container
                    .get("hits")
                    .and_then(|v| v.as_array())
                    .into_iter()
                    .flatten()
                {
                    if let Some(resource) = hit.get("resource").filter(|r| r.is_object()) {
                        if keep(resource) {
                            out.push(resource.clone());
                        }
                    }
                }
            }
        } else if entry.get("id").is_some() && keep(entry) {
            out.push(entry.clone());
        }
    }
    out
}

fn looks_like_form(item: &Value) -> bool {
    item.get("package")
        .and_then(|p| p.get("type"))
        .and_then(|t| t.as_str())
        .map(|t| t == "Form")
        .unwrap_or(false)
        || item
            .get("file")
            .and_then(|f| f.get("mimeType"))
            .and_then(|m| m.as_str())
            .map(|m| m == "application/vnd.ms-form")
            .unwrap_or(false)
        || item
            .get("name")
            .and_then(|n| n.as_str())
            .map(|n| n.to_lowercase().contains(".form"))
            .unwrap_or(false)
}

impl FormsConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn scope(&self) -> &str {
        &self.settings.graph_scope
    }
}

#[async_trait]
impl Connector for FormsConnector {
    fn name(&self) -> &'static str {
        "forms"
    }

    fn description(&self) -> &'static str {
        "Microsoft Forms discovery over Graph drive search, plus workbook-backed response reads."
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
        match action {
            "forms_list_forms" => {
                let drive_scope = opt_str(params, "drive_scope").unwrap_or("me").to_lowercase();
                let top = opt_u32(params, "top").unwrap_or(25).clamp(1, 200);
                let search = opt_str(params, "search_query")
                    .unwrap_or("contentType:FormPackage OR \"Microsoft Form\"");
                let search_base = match drive_scope.as_str() {
                    "me" => match opt_str(params, "drive_id") {
                        Some(drive_id) => format!("{}/me/drives/{}/root", base, drive_id),
                        None => format!("{}/me/drive/root", base),
                    },
                    "site" => {
                        let site_id = resolve_site_id(&self.client, &self.settings, params).await?;
                        let drive_input = opt_str(params, "drive_identifier")
                            .or_else(|| opt_str(params, "drive_id_or_name"));
                        let drive_id =
                            resolve_drive_id(&self.client, &self.settings, &site_id, drive_input)
                                .await?;
                        format!("{}/sites/{}/drives/{}/root", base, site_id, drive_id)
                    }
                    _ => {
                        return Err(ConnectorError::InvalidParams(
                            "'drive_scope' must be 'me' or 'site'".to_string(),
                        ))
                    }
                };
                let url = format!(
                    "{}/search(q='{}')",
                    search_base,
                    urlencoding::encode(search)
                );
                let query: Query = vec![
                    q("$top", top.to_string()),
                    q(
                        "$select",
                        opt_str(params, "select").unwrap_or(
                            "id,name,webUrl,createdDateTime,lastModifiedDateTime,size,parentReference,file,package",
                        ),
                    ),
                ];
                let results = self.client.get_json(&url, self.scope(), Some(&query)).await?;
                let items = flatten_search_hits(&results, looks_like_form);
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": items,
                    "total_retrieved": items.len(),
                })))
            }
            "forms_get_form" => {
                let form_item_id = req_str(params, "form_item_id")?;
                let drive_id = req_str(params, "drive_id")?;
                let url = match opt_str(params, "site_id") {
                    Some(site_id) => format!(
                        "{}/sites/{}/drives/{}/items/{}",
                        base, site_id, drive_id, form_item_id
                    ),
                    None => format!("{}/me/drives/{}/items/{}", base, drive_id, form_item_id),
                };
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
            "forms_get_form_responses" => {
                // responses live in the companion workbook; read its used range
                let item_id = req_str(params, "workbook_item_id")?;
                let sheet = opt_str(params, "hoja").unwrap_or("Form1");
                let url = format!(
                    "{}/me/drive/items/{}/workbook/worksheets/{}/usedRange",
                    base, item_id, sheet
                );
                Ok(ok(self.client.get_json(&url, self.scope(), None).await?))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_hits_flatten_both_shapes() {
        let nested = json!({
            "value": [
                { "hitsContainers": [ { "hits": [
                    { "resource": { "id": "1", "name": "a.form", "package": {"type": "Form"} } },
                    { "resource": { "id": "2", "name": "b.txt" } }
                ] } ] },
                { "resource": { "id": "3", "name": "c.form" } },
                { "id": "4", "name": "d.form" }
            ]
        });
        let items = flatten_search_hits(&nested, looks_like_form);
        let ids: Vec<&str> = items.iter().filter_map(|i| i["id"].as_str()).collect();
        assert_eq!(ids, vec!["1", "3", "4"]);
    }
}
