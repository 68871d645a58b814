use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::connectors::sharepoint::decode_content_bytes;
use crate::envelope::{
    ok, ok_message, ok_paged_items, opt_str, opt_u32, opt_usize, req_object, req_str, req_value,
    ActionOutput, Params,
};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::ident::ItemRef;
use crate::paging::PageSpec;
use crate::Connector;

const SMALL_UPLOAD_LIMIT: usize = 4 * 1024 * 1024;
const UPLOAD_CHUNK_SIZE: usize = 5 * 1024 * 1024;
const DEFAULT_MAX_ITEMS: usize = 100;

const ACTIONS: &[&str] = &[
    "onedrive_list_items",
    "onedrive_get_item",
    "onedrive_upload_file",
    "onedrive_download_file",
    "onedrive_delete_item",
    "onedrive_create_folder",
    "onedrive_move_item",
    "onedrive_copy_item",
    "onedrive_search_items",
    "onedrive_get_sharing_link",
    "onedrive_update_item_metadata",
];

pub struct OneDriveConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl OneDriveConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn scope(&self) -> &str {
        &self.settings.graph_scope
    }

    fn drive_base(&self) -> String {
        format!("{}/me/drive", self.settings.graph_base_url)
    }

    fn item_endpoint(&self, item: &ItemRef) -> String {
        match item {
            ItemRef::Id(id) => format!("{}/items/{}", self.drive_base(), id),
            ItemRef::Path(path) => {
                let safe = path.trim().trim_start_matches('/');
                if safe.is_empty() {
                    format!("{}/root", self.drive_base())
                } else {
                    format!("{}/root:/{}", self.drive_base(), safe)
                }
            }
        }
    }

    /// Either the caller-supplied `item_id_o_nombre_con_ruta` or its
    /// `item_id_or_path` alias.
    fn item_ref(params: &Params) -> Result<ItemRef, ConnectorError> {
        let value = params
            .get("item_id_o_nombre_con_ruta")
            .or_else(|| params.get("item_id_or_path"))
            .filter(|v| !v.is_null())
            .ok_or_else(|| {
                ConnectorError::InvalidParams("'item_id_o_nombre_con_ruta' is required".to_string())
            })?;
        ItemRef::from_value(value)
    }

    async fn resolve_item_id(&self, item: ItemRef) -> Result<String, ConnectorError> {
        match item {
            ItemRef::Id(id) => Ok(id),
            path @ ItemRef::Path(_) => {
                let url = self.item_endpoint(&path);
                let query = vec![q("$select", "id,name")];
                let meta = self.client.get_json(&url, self.scope(), Some(&query)).await?;
                meta.get("id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .ok_or_else(|| {
                        ConnectorError::NotFound(format!(
                            "no item id found for path '{}'",
                            path.as_str()
                        ))
                    })
            }
        }
    }

    fn page_spec(&self, params: &Params, per_page: u32) -> PageSpec {
        PageSpec::new(
            per_page,
            Some(opt_usize(params, "max_items_total").unwrap_or(DEFAULT_MAX_ITEMS)),
            self.settings.max_paging_pages,
        )
    }

    /// `parentReference` for move/copy: `id` passes through; a drive-root
    /// relative `path` is rewritten to the `/drive/root:` form Graph wants.
    fn parent_reference(params: &Params) -> Result<Value, ConnectorError> {
        let parent = req_object(params, "parent_reference")?;
        let mut out = json!({});
        if let Some(id) = parent.get("id").and_then(|v| v.as_str()) {
            out["id"] = json!(id);
        } else if let Some(path) = parent.get("path").and_then(|v| v.as_str()) {
            if path == "/" {
                out["path"] = json!("/drive/root:");
            } else {
                out["path"] = json!(format!("/drive/root:/{}", path.trim_start_matches('/')));
            }
        } else {
            return Err(ConnectorError::InvalidParams(
                "'parent_reference' must carry 'id' or 'path'".to_string(),
            ));
        }
        if let Some(drive_id) = parent.get("driveId").and_then(|v| v.as_str()) {
            out["driveId"] = json!(drive_id);
        }
        Ok(out)
    }
}

#[async_trait]
impl Connector for OneDriveConnector {
    fn name(&self) -> &'static str {
        "onedrive"
    }

    fn description(&self) -> &'static str {
        "OneDrive (/me/drive) over Microsoft Graph: items, uploads, downloads, search, sharing."
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
            "onedrive_list_items" => {
                let ruta = opt_str(params, "ruta").unwrap_or("/");
                let per_page = opt_u32(params, "top_per_page").unwrap_or(50).clamp(1, 200);
                let folder = ItemRef::classify(ruta);
                let url = format!("{}/children", self.item_endpoint(&folder));
                let mut query: Query = vec![q("$top", per_page.to_string())];
                if let Some(select) = opt_str(params, "select") {
                    query.push(q("$select", select));
                }
                if let Some(filter) = opt_str(params, "filter_query") {
                    query.push(q("$filter", filter));
                }
                if let Some(order) = opt_str(params, "order_by") {
                    query.push(q("$orderby", order));
                }
                let outcome = self
                    .client
                    .paged_get(
                        &url,
                        self.scope(),
                        &query,
                        &self.page_spec(params, per_page),
                        &[],
                    )
                    .await?;
                Ok(ok_paged_items(outcome))
            }
            "onedrive_get_item" => {
                let item = Self::item_ref(params)?;
                let url = self.item_endpoint(&item);
                let mut query: Query = Vec::new();
                if let Some(select) = opt_str(params, "select") {
                    query.push(q("$select", select));
                }
                if let Some(expand) = opt_str(params, "expand") {
                    query.push(q("$expand", expand));
                }
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
            "onedrive_upload_file" => {
                let filename = req_str(params, "nombre_archivo")?;
                let content = decode_content_bytes(req_str(params, "contenido_bytes")?)?;
                let dest = opt_str(params, "ruta_destino_relativa").unwrap_or("/");
                let conflict = opt_str(params, "conflict_behavior").unwrap_or("rename");
                let target = if dest.trim_matches('/').is_empty() {
                    filename.to_string()
                } else {
                    format!("{}/{}", dest.trim_matches('/'), filename)
                };
                let item_url = self.item_endpoint(&ItemRef::Path(target.clone()));

                if content.len() <= SMALL_UPLOAD_LIMIT {
                    let url = format!("{}/content", item_url);
                    let query = vec![q("@microsoft.graph.conflictBehavior", conflict)];
                    let data = self
                        .client
                        .put_bytes(
                            &url,
                            self.scope(),
                            &content,
                            "application/octet-stream",
                            Some(&query),
                        )
                        .await?;
                    return Ok(ActionOutput::Json(json!({
                        "status": "success",
                        "data": data,
                        "message": "File uploaded (simple).",
                    })));
                }

                let session_url = format!("{}/createUploadSession", item_url);
                let session_body = json!({
                    "item": { "@microsoft.graph.conflictBehavior": conflict, "name": filename }
                });
                let session = self
                    .client
                    .post_json(&session_url, self.scope(), &session_body)
                    .await?;
                let upload_url = session
                    .get("uploadUrl")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ConnectorError::InternalError(
                            "upload session returned no uploadUrl".to_string(),
                        )
                    })?;
                let total = content.len();
                let mut start = 0usize;
                let mut uploaded: Option<Value> = None;
                while start < total {
                    let end = (start + UPLOAD_CHUNK_SIZE).min(total) - 1;
                    let chunk = &content[start..=end];
                    let resp = self
                        .client
                        .raw()
                        .put(upload_url)
                        .header("Content-Length", chunk.len().to_string())
                        .header("Content-Range", format!("bytes {}-{}/{}", start, end, total))
                        .body(chunk.to_vec())
                        .send()
                        .await
                        .map_err(ConnectorError::HttpRequest)?;
                    let status = resp.status();
                    if !status.is_success() {
                        return Err(crate::http::upstream_error(
                            status,
                            resp.text().await.unwrap_or_default(),
                        ));
                    }
                    if status.as_u16() == 200 || status.as_u16() == 201 {
                        uploaded =
                            Some(resp.json::<Value>().await.map_err(ConnectorError::HttpRequest)?);
                        break;
                    }
                    start = end + 1;
                }
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": uploaded.unwrap_or_else(|| json!({})),
                    "message": "File uploaded via upload session.",
                })))
            }
            "onedrive_download_file" => {
                let item = Self::item_ref(params)?;
                let url = format!("{}/content", self.item_endpoint(&item));
                let bytes = self.client.get_bytes(&url, self.scope(), None).await?;
                Ok(ActionOutput::bytes(bytes))
            }
            "onedrive_delete_item" => {
                let item = Self::item_ref(params)?;
                let item_id = self.resolve_item_id(item).await?;
                let url = self.item_endpoint(&ItemRef::Id(item_id.clone()));
                let status = self.client.delete(&url, self.scope(), &[]).await?;
                Ok(ok_message(format!("Item '{}' deleted.", item_id), status))
            }
            "onedrive_create_folder" => {
                let name = req_str(params, "nombre_carpeta")?;
                let parent_path = opt_str(params, "ruta_padre_relativa").unwrap_or("/");
                let conflict = opt_str(params, "conflict_behavior").unwrap_or("fail");
                let parent_endpoint = if parent_path == "/" {
                    self.item_endpoint(&ItemRef::Path("/".to_string()))
                } else {
                    let parent_id = self
                        .resolve_item_id(ItemRef::classify(parent_path))
                        .await?;
                    self.item_endpoint(&ItemRef::Id(parent_id))
                };
                let url = format!("{}/children", parent_endpoint);
                let payload = json!({
                    "name": name,
                    "folder": {},
                    "@microsoft.graph.conflictBehavior": conflict,
                });
                let data = self.client.post_json(&url, self.scope(), &payload).await?;
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": data,
                    "message": format!("Folder '{}' created.", name),
                })))
            }
            "onedrive_move_item" => {
                let source = ItemRef::from_value(req_value(params, "item_id_o_nombre_con_ruta_origen")?)?;
                let parent_ref = Self::parent_reference(params)?;
                let item_id = self.resolve_item_id(source).await?;
                let url = self.item_endpoint(&ItemRef::Id(item_id));
                let mut payload = json!({ "parentReference": parent_ref });
                if let Some(name) = opt_str(params, "nuevo_nombre") {
                    payload["name"] = json!(name);
                }
                let data = self
                    .client
                    .patch_json(&url, self.scope(), &payload, &[])
                    .await?;
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": data,
                    "message": "Item moved/renamed.",
                })))
            }
            "onedrive_copy_item" => {
                let source = ItemRef::from_value(req_value(params, "item_id_o_nombre_con_ruta_origen")?)?;
                let parent_ref = Self::parent_reference(params)?;
                let item_id = self.resolve_item_id(source).await?;
                let url = format!("{}/copy", self.item_endpoint(&ItemRef::Id(item_id)));
                let mut payload = json!({ "parentReference": parent_ref });
                if let Some(name) = opt_str(params, "nuevo_nombre_copia") {
                    payload["name"] = json!(name);
                }
                let resp = self
                    .client
                    .post_for_response(&url, self.scope(), &payload)
                    .await?;
                let status = resp.status().as_u16();
                let monitor = resp
                    .headers()
                    .get("Location")
                    .and_then(|h| h.to_str().ok())
                    .map(|s| s.to_string());
                if status == 202 {
                    let data = resp.json::<Value>().await.unwrap_or_else(|_| json!({}));
                    return Ok(crate::envelope::pending(
                        "Copy request accepted and in progress.",
                        monitor,
                        data,
                    ));
                }
                let data = resp.json::<Value>().await.unwrap_or_else(|_| json!({}));
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": data,
                    "message": "Item copied (synchronous).",
                })))
            }
            "onedrive_search_items" => {
                let query_text = req_str(params, "query_text")?;
                let per_page = opt_u32(params, "top_per_page").unwrap_or(50).clamp(1, 200);
                let scope_path = opt_str(params, "search_scope_path").unwrap_or("");
                let encoded = query_text.replace('\'', "''");
                let url = if !scope_path.is_empty() && scope_path != "/" {
                    format!(
                        "{}/search(q='{}')",
                        self.item_endpoint(&ItemRef::Path(scope_path.to_string())),
                        encoded
                    )
                } else {
                    format!("{}/search(q='{}')", self.drive_base(), encoded)
                };
                let query: Query = vec![
                    q("$top", per_page.to_string()),
                    q(
                        "$select",
                        opt_str(params, "select")
                            .unwrap_or("id,name,webUrl,size,file,folder,parentReference,searchResult"),
                    ),
                ];
                let outcome = self
                    .client
                    .paged_get(
                        &url,
                        self.scope(),
                        &query,
                        &self.page_spec(params, per_page),
                        &[],
                    )
                    .await?;
                Ok(ok_paged_items(outcome))
            }
            "onedrive_get_sharing_link" => {
                let item = Self::item_ref(params)?;
                let link_type = opt_str(params, "type").unwrap_or("view");
                let link_scope = opt_str(params, "scope").unwrap_or("organization");
                let item_id = self.resolve_item_id(item).await?;
                let url = format!("{}/createLink", self.item_endpoint(&ItemRef::Id(item_id)));
                let mut payload = json!({ "type": link_type, "scope": link_scope });
                if let Some(password) = opt_str(params, "password") {
                    payload["password"] = json!(password);
                }
                if let Some(expiry) = opt_str(params, "expirationDateTime") {
                    payload["expirationDateTime"] = json!(expiry);
                }
                Ok(ok(self.client.post_json(&url, self.scope(), &payload).await?))
            }
            "onedrive_update_item_metadata" => {
                let item = Self::item_ref(params)?;
                let updates = req_object(params, "nuevos_valores")?;
                let mut updates = updates.clone();
                // ETag may ride inside the payload or as its own param
                let etag = updates
                    .remove("@odata.etag")
                    .and_then(|v| v.as_str().map(|s| s.to_string()))
                    .or_else(|| opt_str(params, "etag").map(|s| s.to_string()));
                let headers = match etag {
                    Some(etag) => vec![("If-Match", etag)],
                    None => Vec::new(),
                };
                let item_id = self.resolve_item_id(item).await?;
                let url = self.item_endpoint(&ItemRef::Id(item_id));
                let data = self
                    .client
                    .patch_json(&url, self.scope(), &Value::Object(updates), &headers)
                    .await?;
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": data,
                    "message": "Metadata updated.",
                })))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    fn connector() -> OneDriveConnector {
        OneDriveConnector::new(
            AuthedClient::new(
                reqwest::Client::new(),
                Arc::new(StaticToken("test".to_string())),
            ),
            Arc::new(Settings::from_env().unwrap()),
        )
    }

    #[test]
    fn root_and_path_endpoints() {
        let c = connector();
        assert!(c
            .item_endpoint(&ItemRef::Path("/".to_string()))
            .ends_with("/me/drive/root"));
        assert!(c
            .item_endpoint(&ItemRef::Path("Documents/a.txt".to_string()))
            .ends_with("/me/drive/root:/Documents/a.txt"));
        assert!(c
            .item_endpoint(&ItemRef::Id("ABC!12".to_string()))
            .ends_with("/me/drive/items/ABC!12"));
    }

    #[test]
    fn parent_reference_path_is_rooted() {
        let mut params = Params::new();
        params.insert("parent_reference".to_string(), json!({"path": "/Archive"}));
        let out = OneDriveConnector::parent_reference(&params).unwrap();
        assert_eq!(out["path"], "/drive/root:/Archive");

        params.insert("parent_reference".to_string(), json!({"path": "/"}));
        let out = OneDriveConnector::parent_reference(&params).unwrap();
        assert_eq!(out["path"], "/drive/root:");

        params.insert(
            "parent_reference".to_string(),
            json!({"id": "F1", "driveId": "D9"}),
        );
        let out = OneDriveConnector::parent_reference(&params).unwrap();
        assert_eq!(out["id"], "F1");
        assert_eq!(out["driveId"], "D9");

        params.insert("parent_reference".to_string(), json!({"name": "x"}));
        assert!(OneDriveConnector::parent_reference(&params).is_err());
    }
}
