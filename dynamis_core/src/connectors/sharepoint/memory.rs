//! Session memory persisted as items of a dedicated SharePoint list.
//!
//! Each entry is one list item with `SessionID`, `Clave` (key), `Valor`
//! (JSON-encoded value) and `Timestamp` columns; saves upsert on
//! (session, key).

use serde_json::{json, Map as JsonMap, Value};

use super::{rows_to_csv, SharePointConnector};
use crate::envelope::{ok, ok_message, opt_str, req_str, req_value, ActionOutput, Params};
use crate::error::ConnectorError;
use crate::http::q;

fn timestamp_iso_z() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

fn odata_escape(value: &str) -> String {
    value.replace('\'', "''")
}

impl SharePointConnector {
    /// The memory list must exist before reads/writes; a 404 on lookup
    /// creates it with the default column set.
    async fn ensure_memory_list(&self, site_id: &str) -> Result<(), ConnectorError> {
        let list_name = &self.settings.memory_list_name;
        let url = format!("{}/sites/{}/lists/{}", self.base(), site_id, list_name);
        let query = vec![q("$select", "id")];
        match self.client.get_json(&url, self.scope(), Some(&query)).await {
            Ok(_) => Ok(()),
            Err(ConnectorError::Upstream { status: 404, .. }) => {
                tracing::info!(list = %list_name, site = %site_id, "creating memory list");
                let columns = json!([
                    { "name": "SessionID", "text": {} },
                    { "name": "Clave", "text": {} },
                    { "name": "Valor", "text": { "allowMultipleLines": true, "textType": "plain" } },
                    { "name": "Timestamp", "dateTime": { "displayAs": "default", "format": "dateTime" } },
                ]);
                let create_url = format!("{}/sites/{}/lists", self.base(), site_id);
                let payload = json!({
                    "displayName": list_name,
                    "list": { "template": "genericList" },
                    "columns": columns,
                });
                self.client
                    .post_json(&create_url, self.scope(), &payload)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn memory_list_params(&self, site_id: &str, filter: String, extra: &[(&str, Value)]) -> Params {
        let mut p = Params::new();
        p.insert("site_id".to_string(), json!(site_id));
        p.insert(
            "lista_id_o_nombre".to_string(),
            json!(self.settings.memory_list_name),
        );
        p.insert("filter_query".to_string(), json!(filter));
        for (key, value) in extra {
            p.insert((*key).to_string(), value.clone());
        }
        p
    }

    pub(super) async fn memory_ensure_list(
        &self,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let site_id = self.resolve_site_id(params).await?;
        self.ensure_memory_list(&site_id).await?;
        Ok(ok_message(
            format!(
                "Memory list '{}' ensured in site '{}'.",
                self.settings.memory_list_name, site_id
            ),
            200,
        ))
    }

    pub(super) async fn memory_save(
        &self,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let session_id = req_str(params, "session_id")?;
        let key = req_str(params, "clave")?;
        let value = req_value(params, "valor")?;
        let site_id = self.resolve_site_id(params).await?;
        self.ensure_memory_list(&site_id).await?;

        let filter = format!(
            "fields/SessionID eq '{}' and fields/Clave eq '{}'",
            odata_escape(session_id),
            odata_escape(key)
        );
        let lookup = self.memory_list_params(
            &site_id,
            filter,
            &[
                ("top_per_page", json!(1)),
                ("max_items_total", json!(1)),
                ("select", json!("id,@odata.etag")),
            ],
        );
        let existing = self.list_list_items_impl(&site_id, &lookup).await?;
        let existing_item = existing.items.first();
        let item_id = existing_item
            .and_then(|i| i.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let etag = existing_item
            .and_then(|i| i.get("@odata.etag"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let fields = json!({
            "SessionID": session_id,
            "Clave": key,
            "Valor": serde_json::to_string(value)?,
            "Timestamp": timestamp_iso_z(),
        });

        match item_id {
            Some(item_id) => {
                let url = format!(
                    "{}/sites/{}/lists/{}/items/{}/fields",
                    self.base(),
                    site_id,
                    self.settings.memory_list_name,
                    item_id
                );
                let headers = match etag {
                    Some(etag) => vec![("If-Match", etag)],
                    None => Vec::new(),
                };
                Ok(ok(self
                    .client
                    .patch_json(&url, self.scope(), &fields, &headers)
                    .await?))
            }
            None => {
                let url = format!(
                    "{}/sites/{}/lists/{}/items",
                    self.base(),
                    site_id,
                    self.settings.memory_list_name
                );
                let payload = json!({ "fields": fields });
                Ok(ok(self.client.post_json(&url, self.scope(), &payload).await?))
            }
        }
    }

    pub(super) async fn memory_get(
        &self,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let session_id = req_str(params, "session_id")?;
        let key = opt_str(params, "clave");
        let site_id = self.resolve_site_id(params).await?;

        let mut filter = format!("fields/SessionID eq '{}'", odata_escape(session_id));
        if let Some(key) = key {
            filter.push_str(&format!(" and fields/Clave eq '{}'", odata_escape(key)));
        }
        let mut extra: Vec<(&str, Value)> = vec![
            ("select", json!("id")),
            ("expand", json!("fields(select=Clave,Valor,Timestamp)")),
            ("orderby", json!("fields/Timestamp desc")),
        ];
        if key.is_some() {
            extra.push(("max_items_total", json!(1)));
        }
        let lookup = self.memory_list_params(&site_id, filter, &extra);
        let outcome = self.list_list_items_impl(&site_id, &lookup).await?;

        fn decode(value_str: Option<&str>) -> Value {
            match value_str {
                Some(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string())),
                None => Value::Null,
            }
        }

        if let Some(key) = key {
            let data = outcome
                .items
                .first()
                .and_then(|item| item.get("fields"))
                .and_then(|f| f.get("Valor"))
                .and_then(|v| v.as_str())
                .map(|s| decode(Some(s)))
                .unwrap_or(Value::Null);
            if data.is_null() {
                return Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": Value::Null,
                    "message": format!("No data found for key '{}'.", key),
                })));
            }
            return Ok(ok(data));
        }

        // whole session: newest entry per key wins
        let mut map = JsonMap::new();
        for item in &outcome.items {
            let fields = item.get("fields").and_then(|f| f.as_object());
            let Some(fields) = fields else { continue };
            let Some(key) = fields.get("Clave").and_then(|v| v.as_str()) else {
                continue;
            };
            if !map.contains_key(key) {
                map.insert(
                    key.to_string(),
                    decode(fields.get("Valor").and_then(|v| v.as_str())),
                );
            }
        }
        Ok(ok(Value::Object(map)))
    }

    pub(super) async fn memory_delete(
        &self,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let session_id = req_str(params, "session_id")?;
        let key = opt_str(params, "clave");
        let site_id = self.resolve_site_id(params).await?;

        let mut filter = format!("fields/SessionID eq '{}'", odata_escape(session_id));
        if let Some(key) = key {
            filter.push_str(&format!(" and fields/Clave eq '{}'", odata_escape(key)));
        }
        let lookup = self.memory_list_params(&site_id, filter, &[("select", json!("id"))]);
        let outcome = self.list_list_items_impl(&site_id, &lookup).await?;
        if outcome.items.is_empty() {
            return Ok(ok_message(
                format!("Nothing to delete for session '{}'.", session_id),
                200,
            ));
        }

        let mut deleted = 0usize;
        let mut errors: Vec<String> = Vec::new();
        for item in &outcome.items {
            let Some(item_id) = item.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            let url = format!(
                "{}/sites/{}/lists/{}/items/{}",
                self.base(),
                site_id,
                self.settings.memory_list_name,
                item_id
            );
            match self.client.delete(&url, self.scope(), &[]).await {
                Ok(_) => deleted += 1,
                Err(e) => errors.push(format!("item {}: {}", item_id, e)),
            }
        }
        if errors.is_empty() {
            Ok(ok_message(
                format!(
                    "Memory for session '{}' removed; {} items deleted.",
                    session_id, deleted
                ),
                200,
            ))
        } else {
            Ok(ActionOutput::Json(json!({
                "status": "partial_error",
                "message": format!("{} items deleted, with errors.", deleted),
                "details": errors,
            })))
        }
    }

    pub(super) async fn memory_list_keys(
        &self,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let session_id = req_str(params, "session_id")?;
        let site_id = self.resolve_site_id(params).await?;
        let filter = format!("fields/SessionID eq '{}'", odata_escape(session_id));
        let lookup = self.memory_list_params(
            &site_id,
            filter,
            &[
                ("select", json!("id")),
                ("expand", json!("fields(select=Clave)")),
            ],
        );
        let outcome = self.list_list_items_impl(&site_id, &lookup).await?;
        let mut keys: Vec<String> = outcome
            .items
            .iter()
            .filter_map(|item| {
                item.get("fields")
                    .and_then(|f| f.get("Clave"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            })
            .collect();
        keys.sort();
        keys.dedup();
        Ok(ok(json!(keys)))
    }

    pub(super) async fn memory_export_session(
        &self,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let session_id = req_str(params, "session_id")?;
        let format = opt_str(params, "format").unwrap_or("json").to_lowercase();
        if format != "json" && format != "csv" {
            return Err(ConnectorError::InvalidParams(
                "'format' must be 'json' or 'csv'".to_string(),
            ));
        }
        let site_id = self.resolve_site_id(params).await?;
        let filter = format!("fields/SessionID eq '{}'", odata_escape(session_id));
        let lookup = self.memory_list_params(
            &site_id,
            filter,
            &[
                ("select", json!("id,@odata.etag")),
                (
                    "expand",
                    json!("fields(select=SessionID,Clave,Valor,Timestamp)"),
                ),
            ],
        );
        let outcome = self.list_list_items_impl(&site_id, &lookup).await?;

        let rows: Vec<JsonMap<String, Value>> = outcome
            .items
            .iter()
            .map(|item| {
                let mut fields = item
                    .get("fields")
                    .and_then(|f| f.as_object())
                    .cloned()
                    .unwrap_or_default();
                fields.insert(
                    "_ListItemID_".to_string(),
                    item.get("id").cloned().unwrap_or(Value::Null),
                );
                fields.insert(
                    "_ListItemETag_".to_string(),
                    item.get("@odata.etag").cloned().unwrap_or(Value::Null),
                );
                fields
            })
            .collect();

        if format == "json" {
            let data: Vec<Value> = rows.into_iter().map(Value::Object).collect();
            return Ok(ok(json!(data)));
        }
        Ok(ActionOutput::Csv(rows_to_csv(&rows)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odata_quotes_are_doubled() {
        assert_eq!(odata_escape("o'brien"), "o''brien");
        assert_eq!(odata_escape("plain"), "plain");
    }

    #[test]
    fn timestamp_is_second_precision_utc() {
        let ts = timestamp_iso_z();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2025-05-20T08:00:00Z".len());
    }
}
