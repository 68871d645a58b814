use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Map as JsonMap, Value};

use crate::config::Settings;
use crate::envelope::{
    ok, ok_message, ok_paged_collection, opt_str, opt_u32, opt_usize, req_array, req_object,
    req_str, req_value, ActionOutput, Params,
};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::ident::{drive_ref_is_likely_id, folder_ref_is_likely_id, site_ref_is_canonical, ItemRef};
use crate::paging::{PageSpec, PagedOutcome};
use crate::Connector;

mod memory;

const SMALL_UPLOAD_LIMIT: usize = 4 * 1024 * 1024;
const UPLOAD_CHUNK_SIZE: usize = 5 * 1024 * 1024;

const ACTIONS: &[&str] = &[
    "sp_list_lists",
    "sp_get_list",
    "sp_create_list",
    "sp_update_list",
    "sp_delete_list",
    "sp_list_list_items",
    "sp_get_list_item",
    "sp_add_list_item",
    "sp_update_list_item",
    "sp_delete_list_item",
    "sp_search_list_items",
    "sp_list_document_libraries",
    "sp_list_folder_contents",
    "sp_get_file_metadata",
    "sp_upload_document",
    "sp_download_document",
    "sp_delete_document",
    "sp_create_folder",
    "sp_move_item",
    "sp_copy_item",
    "sp_update_file_metadata",
    "sp_get_site_info",
    "sp_search_sites",
    "sp_memory_ensure_list",
    "sp_memory_save",
    "sp_memory_get",
    "sp_memory_delete",
    "sp_memory_list_keys",
    "sp_memory_export_session",
    "sp_get_sharing_link",
    "sp_add_item_permissions",
    "sp_remove_item_permissions",
    "sp_list_item_permissions",
];

pub struct SharePointConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

pub(crate) fn decode_content_bytes(input: &str) -> Result<Vec<u8>, ConnectorError> {
    base64::engine::general_purpose::STANDARD
        .decode(input)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(input))
        .map_err(|e| ConnectorError::InvalidParams(format!("base64 decode of 'content_bytes': {}", e)))
}

impl SharePointConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn scope(&self) -> &str {
        &self.settings.graph_scope
    }

    fn base(&self) -> &str {
        &self.settings.graph_base_url
    }

    fn page_spec(&self, params: &Params, per_page: u32) -> PageSpec {
        PageSpec::new(
            per_page,
            opt_usize(params, "max_items_total"),
            self.settings.max_paging_pages,
        )
    }

    pub(crate) async fn resolve_site_id(&self, params: &Params) -> Result<String, ConnectorError> {
        resolve_site_id(&self.client, &self.settings, params).await
    }

    pub(crate) async fn resolve_drive_id(
        &self,
        site_id: &str,
        drive_input: Option<&str>,
    ) -> Result<String, ConnectorError> {
        resolve_drive_id(&self.client, &self.settings, site_id, drive_input).await
    }

    fn item_endpoint(&self, site_id: &str, drive_id: &str, item: &ItemRef) -> String {
        match item {
            ItemRef::Id(id) => format!(
                "{}/sites/{}/drives/{}/items/{}",
                self.base(),
                site_id,
                drive_id,
                id
            ),
            ItemRef::Path(path) => {
                let safe = path.trim().trim_start_matches('/');
                if safe.is_empty() {
                    format!("{}/sites/{}/drives/{}/root", self.base(), site_id, drive_id)
                } else {
                    format!(
                        "{}/sites/{}/drives/{}/root:/{}",
                        self.base(),
                        site_id,
                        drive_id,
                        safe
                    )
                }
            }
        }
    }

    /// Paths are resolved to an item id through a `$select=id,name` metadata
    /// lookup; ids pass through untouched.
    pub(crate) async fn resolve_item_id(
        &self,
        site_id: &str,
        drive_id: &str,
        item: ItemRef,
    ) -> Result<String, ConnectorError> {
        match item {
            ItemRef::Id(id) => Ok(id),
            path @ ItemRef::Path(_) => {
                let url = self.item_endpoint(site_id, drive_id, &path);
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

    async fn site_and_drive(&self, params: &Params) -> Result<(String, String), ConnectorError> {
        let site_id = self.resolve_site_id(params).await?;
        let drive_id = self
            .resolve_drive_id(&site_id, opt_str(params, "drive_id_or_name"))
            .await?;
        Ok((site_id, drive_id))
    }

    fn item_ref(params: &Params, key: &str) -> Result<ItemRef, ConnectorError> {
        ItemRef::from_value(req_value(params, key)?)
    }

    async fn paged(
        &self,
        url: &str,
        query: Query,
        params: &Params,
        per_page: u32,
    ) -> Result<PagedOutcome, ConnectorError> {
        self.client
            .paged_get(url, self.scope(), &query, &self.page_spec(params, per_page), &[])
            .await
    }

    pub(crate) async fn list_list_items_impl(
        &self,
        site_id: &str,
        params: &Params,
    ) -> Result<PagedOutcome, ConnectorError> {
        let list = req_str(params, "lista_id_o_nombre")?;
        let per_page = opt_u32(params, "top_per_page")
            .unwrap_or(self.settings.default_page_size)
            .clamp(1, self.settings.default_page_size);
        let url = format!("{}/sites/{}/lists/{}/items", self.base(), site_id, list);
        let mut query: Query = vec![q("$top", per_page.to_string())];
        if let Some(select) = opt_str(params, "select") {
            query.push(q("$select", select));
        }
        if let Some(filter) = opt_str(params, "filter_query") {
            query.push(q("$filter", filter));
        }
        query.push(q(
            "$expand",
            opt_str(params, "expand").unwrap_or("fields(select=*)"),
        ));
        if let Some(order) = opt_str(params, "orderby") {
            query.push(q("$orderby", order));
        }
        self.paged(&url, query, params, per_page).await
    }

    async fn get_file_metadata(&self, params: &Params) -> Result<Value, ConnectorError> {
        let item = Self::item_ref(params, "item_id_or_path")?;
        let (site_id, drive_id) = self.site_and_drive(params).await?;
        let url = self.item_endpoint(&site_id, &drive_id, &item);
        let mut query: Query = vec![q(
            "$select",
            opt_str(params, "select").unwrap_or(
                "id,name,webUrl,size,createdDateTime,lastModifiedDateTime,file,folder,package,parentReference,listItem",
            ),
        )];
        if let Some(expand) = opt_str(params, "expand") {
            query.push(q("$expand", expand));
        }
        self.client.get_json(&url, self.scope(), Some(&query)).await
    }

    async fn upload_document(&self, params: &Params) -> Result<ActionOutput, ConnectorError> {
        let filename = req_str(params, "filename")?;
        let content = decode_content_bytes(req_str(params, "content_bytes")?)?;
        let folder_path = opt_str(params, "folder_path").unwrap_or("");
        let conflict = opt_str(params, "conflict_behavior").unwrap_or("rename");

        let (site_id, drive_id) = self.site_and_drive(params).await?;
        let path_segment = folder_path.trim_matches('/');
        let target_path = if path_segment.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", path_segment, filename)
        };
        let item_url =
            self.item_endpoint(&site_id, &drive_id, &ItemRef::Path(target_path.clone()));

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
            return Ok(ok(data));
        }

        // Large file: Graph upload session with chunked PUTs against the
        // pre-authorized uploadUrl (no bearer token on the chunks).
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
                ConnectorError::InternalError("upload session returned no uploadUrl".to_string())
            })?;

        let total = content.len();
        let mut start = 0usize;
        let mut final_item: Option<Value> = None;
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
                final_item = Some(resp.json::<Value>().await.map_err(ConnectorError::HttpRequest)?);
                break;
            }
            start = end + 1;
        }
        match final_item {
            Some(item) => Ok(ActionOutput::Json(json!({
                "status": "success",
                "data": item,
                "message": "File uploaded via upload session.",
            }))),
            None => {
                // session finished without a terminal item body; verify
                let mut check = params.clone();
                check.insert("item_id_or_path".to_string(), json!(target_path));
                check.insert("site_id".to_string(), json!(site_id));
                check.insert("drive_id_or_name".to_string(), json!(drive_id));
                let meta = self.get_file_metadata(&check).await?;
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": meta,
                    "message": "File uploaded via upload session (verified).",
                })))
            }
        }
    }

    /// Permission actions address either a drive item or a list item.
    async fn permission_target_url(
        &self,
        params: &Params,
        suffix: &str,
    ) -> Result<String, ConnectorError> {
        let site_id = self.resolve_site_id(params).await?;
        if let Some(item_value) = params.get("item_id_or_path").filter(|v| !v.is_null()) {
            let item = ItemRef::from_value(item_value)?;
            let drive_id = self
                .resolve_drive_id(&site_id, opt_str(params, "drive_id_or_name"))
                .await?;
            let item_id = self.resolve_item_id(&site_id, &drive_id, item).await?;
            return Ok(format!(
                "{}/{}",
                self.item_endpoint(&site_id, &drive_id, &ItemRef::Id(item_id)),
                suffix
            ));
        }
        let list = opt_str(params, "list_id_o_nombre");
        let list_item = opt_str(params, "list_item_id");
        match (list, list_item) {
            (Some(list), Some(item)) => Ok(format!(
                "{}/sites/{}/lists/{}/items/{}/{}",
                self.base(),
                site_id,
                list,
                item,
                suffix
            )),
            _ => Err(ConnectorError::InvalidParams(
                "'item_id_or_path' or ('list_id_o_nombre' and 'list_item_id') is required"
                    .to_string(),
            )),
        }
    }
}

#[async_trait]
impl Connector for SharePointConnector {
    fn name(&self) -> &'static str {
        "sharepoint"
    }

    fn description(&self) -> &'static str {
        "SharePoint over Microsoft Graph: sites, lists, list items, documents, permissions, session memory."
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
            "sp_get_site_info" => {
                let site_id = self.resolve_site_id(params).await?;
                let url = format!("{}/sites/{}", self.base(), site_id);
                let query = vec![q(
                    "$select",
                    opt_str(params, "select").unwrap_or(
                        "id,displayName,name,webUrl,createdDateTime,lastModifiedDateTime,description,siteCollection",
                    ),
                )];
                Ok(ok(self.client.get_json(&url, self.scope(), Some(&query)).await?))
            }
            "sp_search_sites" => {
                let query_text = req_str(params, "query_text")?;
                let url = format!("{}/sites", self.base());
                let mut query: Query = vec![q("search", query_text)];
                if let Some(select) = opt_str(params, "select") {
                    query.push(q("$select", select));
                }
                if let Some(top) = opt_u32(params, "top") {
                    query.push(q("$top", top.to_string()));
                }
                let data = self.client.get_json(&url, self.scope(), Some(&query)).await?;
                Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
            }
            "sp_create_list" => {
                let list_name = req_str(params, "nombre_lista")?;
                let template = opt_str(params, "template").unwrap_or("genericList");
                let site_id = self.resolve_site_id(params).await?;
                let url = format!("{}/sites/{}/lists", self.base(), site_id);
                let mut payload = json!({
                    "displayName": list_name,
                    "list": { "template": template },
                });
                if let Some(columns) = params.get("columnas").and_then(|v| v.as_array()) {
                    payload["columns"] = Value::Array(columns.clone());
                }
                Ok(ok(self.client.post_json(&url, self.scope(), &payload).await?))
            }
            "sp_list_lists" => {
                let per_page = opt_u32(params, "top_per_page")
                    .unwrap_or(self.settings.default_page_size)
                    .clamp(1, self.settings.default_page_size);
                let site_id = self.resolve_site_id(params).await?;
                let url = format!("{}/sites/{}/lists", self.base(), site_id);
                let mut query: Query = vec![
                    q("$top", per_page.to_string()),
                    q(
                        "$select",
                        opt_str(params, "select").unwrap_or("id,name,displayName,webUrl,list"),
                    ),
                ];
                if let Some(filter) = opt_str(params, "filter_query") {
                    query.push(q("$filter", filter));
                }
                if let Some(order) = opt_str(params, "order_by") {
                    query.push(q("$orderby", order));
                }
                if let Some(expand) = opt_str(params, "expand") {
                    query.push(q("$expand", expand));
                }
                Ok(ok_paged_collection(self.paged(&url, query, params, per_page).await?))
            }
            "sp_get_list" => {
                let list = req_str(params, "lista_id_o_nombre")?;
                let site_id = self.resolve_site_id(params).await?;
                let url = format!("{}/sites/{}/lists/{}", self.base(), site_id, list);
                let mut query: Query = Vec::new();
                if let Some(select) = opt_str(params, "select") {
                    query.push(q("$select", select));
                }
                if let Some(expand) = opt_str(params, "expand") {
                    query.push(q("$expand", expand));
                }
                let data = self
                    .client
                    .get_json(&url, self.scope(), if query.is_empty() { None } else { Some(&query) })
                    .await?;
                Ok(ok(data))
            }
            "sp_update_list" => {
                let list = req_str(params, "lista_id_o_nombre")?;
                let payload = req_object(params, "update_payload")?;
                let site_id = self.resolve_site_id(params).await?;
                let url = format!("{}/sites/{}/lists/{}", self.base(), site_id, list);
                Ok(ok(self
                    .client
                    .patch_json(&url, self.scope(), &Value::Object(payload.clone()), &[])
                    .await?))
            }
            "sp_delete_list" => {
                let list = req_str(params, "lista_id_o_nombre")?;
                let site_id = self.resolve_site_id(params).await?;
                let url = format!("{}/sites/{}/lists/{}", self.base(), site_id, list);
                let status = self.client.delete(&url, self.scope(), &[]).await?;
                Ok(ok_message(format!("List '{}' deleted.", list), status))
            }
            "sp_list_list_items" => {
                let site_id = self.resolve_site_id(params).await?;
                Ok(ok_paged_collection(
                    self.list_list_items_impl(&site_id, params).await?,
                ))
            }
            "sp_get_list_item" => {
                let list = req_str(params, "lista_id_o_nombre")?;
                let item_id = req_str(params, "item_id")?;
                let site_id = self.resolve_site_id(params).await?;
                let url = format!(
                    "{}/sites/{}/lists/{}/items/{}",
                    self.base(),
                    site_id,
                    list,
                    item_id
                );
                let mut query: Query = vec![q(
                    "$expand",
                    opt_str(params, "expand").unwrap_or("fields(select=*)"),
                )];
                if let Some(select) = opt_str(params, "select") {
                    query.push(q("$select", select));
                }
                Ok(ok(self.client.get_json(&url, self.scope(), Some(&query)).await?))
            }
            "sp_add_list_item" => {
                let list = req_str(params, "lista_id_o_nombre")?;
                let fields = req_object(params, "datos_campos")?;
                let site_id = self.resolve_site_id(params).await?;
                let url = format!("{}/sites/{}/lists/{}/items", self.base(), site_id, list);
                let payload = json!({ "fields": fields });
                Ok(ok(self.client.post_json(&url, self.scope(), &payload).await?))
            }
            "sp_update_list_item" => {
                let list = req_str(params, "lista_id_o_nombre")?;
                let item_id = req_str(params, "item_id")?;
                let fields = req_object(params, "nuevos_valores_campos")?;
                let site_id = self.resolve_site_id(params).await?;
                let url = format!(
                    "{}/sites/{}/lists/{}/items/{}/fields",
                    self.base(),
                    site_id,
                    list,
                    item_id
                );
                let headers = match opt_str(params, "etag") {
                    Some(etag) => vec![("If-Match", etag.to_string())],
                    None => Vec::new(),
                };
                Ok(ok(self
                    .client
                    .patch_json(&url, self.scope(), &Value::Object(fields.clone()), &headers)
                    .await?))
            }
            "sp_delete_list_item" => {
                let list = req_str(params, "lista_id_o_nombre")?;
                let item_id = req_str(params, "item_id")?;
                let site_id = self.resolve_site_id(params).await?;
                let url = format!(
                    "{}/sites/{}/lists/{}/items/{}",
                    self.base(),
                    site_id,
                    list,
                    item_id
                );
                let headers = match opt_str(params, "etag") {
                    Some(etag) => vec![("If-Match", etag.to_string())],
                    None => Vec::new(),
                };
                let status = self.client.delete(&url, self.scope(), &headers).await?;
                Ok(ok_message(format!("Item '{}' deleted.", item_id), status))
            }
            "sp_search_list_items" => {
                // query_text is applied as an OData $filter over the list
                let _ = req_str(params, "lista_id_o_nombre")?;
                let filter = req_str(params, "query_text")?.to_string();
                let mut forwarded = params.clone();
                forwarded.insert("filter_query".to_string(), json!(filter));
                if let Some(top) = opt_usize(params, "top") {
                    forwarded.insert("max_items_total".to_string(), json!(top));
                }
                let site_id = self.resolve_site_id(&forwarded).await?;
                Ok(ok_paged_collection(
                    self.list_list_items_impl(&site_id, &forwarded).await?,
                ))
            }
            "sp_list_document_libraries" => {
                let per_page = opt_u32(params, "top_per_page")
                    .unwrap_or(self.settings.default_page_size)
                    .clamp(1, self.settings.default_page_size);
                let site_id = self.resolve_site_id(params).await?;
                let url = format!("{}/sites/{}/drives", self.base(), site_id);
                let query: Query = vec![
                    q("$top", per_page.to_string()),
                    q(
                        "$select",
                        opt_str(params, "select")
                            .unwrap_or("id,name,displayName,webUrl,driveType,quota,owner"),
                    ),
                    q(
                        "$filter",
                        opt_str(params, "filter_query").unwrap_or("driveType eq 'documentLibrary'"),
                    ),
                ];
                Ok(ok_paged_collection(self.paged(&url, query, params, per_page).await?))
            }
            "sp_list_folder_contents" => {
                let folder = opt_str(params, "folder_path_or_id").unwrap_or("");
                let per_page = opt_u32(params, "top_per_page")
                    .unwrap_or(self.settings.default_page_size)
                    .clamp(1, 200);
                let (site_id, drive_id) = self.site_and_drive(params).await?;
                let item_segment = if folder_ref_is_likely_id(folder) {
                    format!("items/{}", folder)
                } else if folder.is_empty() || folder == "/" {
                    "root".to_string()
                } else {
                    format!("root:/{}", folder.trim_matches('/'))
                };
                let url = format!(
                    "{}/sites/{}/drives/{}/{}/children",
                    self.base(),
                    site_id,
                    drive_id,
                    item_segment
                );
                let mut query: Query = vec![
                    q("$top", per_page.to_string()),
                    q(
                        "$select",
                        opt_str(params, "select").unwrap_or(
                            "id,name,webUrl,size,createdDateTime,lastModifiedDateTime,file,folder,package,parentReference",
                        ),
                    ),
                ];
                if let Some(expand) = opt_str(params, "expand") {
                    query.push(q("$expand", expand));
                }
                if let Some(order) = opt_str(params, "orderby") {
                    query.push(q("$orderby", order));
                }
                Ok(ok_paged_collection(self.paged(&url, query, params, per_page).await?))
            }
            "sp_get_file_metadata" => Ok(ok(self.get_file_metadata(params).await?)),
            "sp_upload_document" => self.upload_document(params).await,
            "sp_download_document" => {
                let item = Self::item_ref(params, "item_id_or_path")?;
                let (site_id, drive_id) = self.site_and_drive(params).await?;
                let item_id = self.resolve_item_id(&site_id, &drive_id, item).await?;
                let url = format!(
                    "{}/content",
                    self.item_endpoint(&site_id, &drive_id, &ItemRef::Id(item_id))
                );
                let bytes = self.client.get_bytes(&url, self.scope(), None).await?;
                Ok(ActionOutput::bytes(bytes))
            }
            "sp_delete_document" => {
                let item = Self::item_ref(params, "item_id_or_path")?;
                let (site_id, drive_id) = self.site_and_drive(params).await?;
                let item_id = self.resolve_item_id(&site_id, &drive_id, item).await?;
                let url = self.item_endpoint(&site_id, &drive_id, &ItemRef::Id(item_id.clone()));
                let headers = match opt_str(params, "etag") {
                    Some(etag) => vec![("If-Match", etag.to_string())],
                    None => Vec::new(),
                };
                let status = self.client.delete(&url, self.scope(), &headers).await?;
                Ok(ok_message(format!("Item '{}' deleted.", item_id), status))
            }
            "sp_create_folder" => {
                let folder_name = req_str(params, "folder_name")?;
                let parent = opt_str(params, "parent_folder_path_or_id").unwrap_or("");
                let conflict = opt_str(params, "conflict_behavior").unwrap_or("fail");
                let (site_id, drive_id) = self.site_and_drive(params).await?;
                let parent_ref = if folder_ref_is_likely_id(parent) {
                    ItemRef::Id(parent.to_string())
                } else {
                    ItemRef::Path(parent.to_string())
                };
                let url = format!(
                    "{}/children",
                    self.item_endpoint(&site_id, &drive_id, &parent_ref)
                );
                let payload = json!({
                    "name": folder_name,
                    "folder": {},
                    "@microsoft.graph.conflictBehavior": conflict,
                });
                Ok(ok(self.client.post_json(&url, self.scope(), &payload).await?))
            }
            "sp_move_item" => {
                let item = Self::item_ref(params, "item_id_or_path")?;
                let target_parent = req_str(params, "target_parent_folder_id")?;
                let (site_id, drive_id) = self.site_and_drive(params).await?;
                let item_id = self.resolve_item_id(&site_id, &drive_id, item).await?;
                let url = self.item_endpoint(&site_id, &drive_id, &ItemRef::Id(item_id));
                let mut parent_ref = json!({ "id": target_parent });
                if let Some(target_drive) = opt_str(params, "target_drive_id") {
                    parent_ref["driveId"] = json!(target_drive);
                }
                if let Some(target_site) = opt_str(params, "target_site_id") {
                    parent_ref["siteId"] = json!(target_site);
                }
                let mut payload = json!({ "parentReference": parent_ref });
                if let Some(new_name) = opt_str(params, "new_name") {
                    payload["name"] = json!(new_name);
                }
                Ok(ok(self
                    .client
                    .patch_json(&url, self.scope(), &payload, &[])
                    .await?))
            }
            "sp_copy_item" => {
                let item = Self::item_ref(params, "item_id_or_path")?;
                let target_parent = req_str(params, "target_parent_folder_id")?;
                // the source may live in a different site than the target
                let mut source_params = params.clone();
                if let Some(source_site) = opt_str(params, "source_site_id") {
                    source_params.insert("site_id".to_string(), json!(source_site));
                }
                let site_id = self.resolve_site_id(&source_params).await?;
                let drive_id = self
                    .resolve_drive_id(
                        &site_id,
                        opt_str(params, "source_drive_id_or_name")
                            .or_else(|| opt_str(params, "drive_id_or_name")),
                    )
                    .await?;
                let item_id = self.resolve_item_id(&site_id, &drive_id, item).await?;
                let url = format!(
                    "{}/copy",
                    self.item_endpoint(&site_id, &drive_id, &ItemRef::Id(item_id))
                );
                let mut parent_ref = json!({ "id": target_parent });
                if let Some(target_drive) = opt_str(params, "target_drive_id") {
                    parent_ref["driveId"] = json!(target_drive);
                    if let Some(target_site) = opt_str(params, "target_site_id") {
                        parent_ref["siteId"] = json!(target_site);
                    }
                }
                let mut payload = json!({ "parentReference": parent_ref });
                if let Some(new_name) = opt_str(params, "new_name") {
                    payload["name"] = json!(new_name);
                }
                let resp = self
                    .client
                    .post_for_response(&url, self.scope(), &payload)
                    .await?;
                if resp.status().as_u16() == 202 {
                    let monitor = resp
                        .headers()
                        .get("Location")
                        .and_then(|h| h.to_str().ok())
                        .map(|s| s.to_string());
                    return Ok(crate::envelope::pending(
                        "Copy request accepted.",
                        monitor,
                        json!({}),
                    ));
                }
                let data = resp.json::<Value>().await.unwrap_or_else(|_| json!({}));
                Ok(ok(data))
            }
            "sp_update_file_metadata" => {
                let item = Self::item_ref(params, "item_id_or_path")?;
                let updates = req_object(params, "metadata_updates")?;
                let (site_id, drive_id) = self.site_and_drive(params).await?;
                let item_id = self.resolve_item_id(&site_id, &drive_id, item).await?;
                let url = self.item_endpoint(&site_id, &drive_id, &ItemRef::Id(item_id));
                let headers = match opt_str(params, "etag") {
                    Some(etag) => vec![("If-Match", etag.to_string())],
                    None => Vec::new(),
                };
                Ok(ok(self
                    .client
                    .patch_json(&url, self.scope(), &Value::Object(updates.clone()), &headers)
                    .await?))
            }
            "sp_get_sharing_link" => {
                let item = Self::item_ref(params, "item_id_or_path")?;
                let link_type = opt_str(params, "link_type").unwrap_or("view");
                let link_scope = opt_str(params, "scope").unwrap_or("organization");
                if link_scope == "users"
                    && params.get("recipients").and_then(|v| v.as_array()).is_none()
                {
                    return Err(ConnectorError::InvalidParams(
                        "'recipients' is required when scope is 'users'".to_string(),
                    ));
                }
                let (site_id, drive_id) = self.site_and_drive(params).await?;
                let item_id = self.resolve_item_id(&site_id, &drive_id, item).await?;
                let url = format!(
                    "{}/createLink",
                    self.item_endpoint(&site_id, &drive_id, &ItemRef::Id(item_id))
                );
                let mut payload = json!({ "type": link_type, "scope": link_scope });
                if let Some(password) = opt_str(params, "password") {
                    payload["password"] = json!(password);
                }
                if let Some(expiry) = opt_str(params, "expiration_datetime") {
                    payload["expirationDateTime"] = json!(expiry);
                }
                if link_scope == "users" {
                    if let Some(recipients) = params.get("recipients") {
                        payload["recipients"] = recipients.clone();
                    }
                }
                Ok(ok(self.client.post_json(&url, self.scope(), &payload).await?))
            }
            "sp_list_item_permissions" => {
                let url = self.permission_target_url(params, "permissions").await?;
                let data = self.client.get_json(&url, self.scope(), None).await?;
                Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
            }
            "sp_add_item_permissions" => {
                let recipients = req_array(params, "recipients")?;
                let roles = req_array(params, "roles")?;
                let url = self.permission_target_url(params, "invite").await?;
                let mut payload = json!({
                    "recipients": recipients,
                    "roles": roles,
                    "requireSignIn": params.get("requireSignIn").and_then(|v| v.as_bool()).unwrap_or(true),
                    "sendInvitation": params.get("sendInvitation").and_then(|v| v.as_bool()).unwrap_or(true),
                });
                if let Some(message) = opt_str(params, "message") {
                    payload["message"] = json!(message);
                }
                if let Some(expiry) = opt_str(params, "expirationDateTime") {
                    payload["expirationDateTime"] = json!(expiry);
                }
                let data = self.client.post_json(&url, self.scope(), &payload).await?;
                Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
            }
            "sp_remove_item_permissions" => {
                let permission_id = req_str(params, "permission_id")?.to_string();
                let url = self
                    .permission_target_url(params, &format!("permissions/{}", permission_id))
                    .await?;
                let status = self.client.delete(&url, self.scope(), &[]).await?;
                Ok(ok_message(
                    format!("Permission '{}' removed.", permission_id),
                    status,
                ))
            }
            "sp_memory_ensure_list" => self.memory_ensure_list(params).await,
            "sp_memory_save" => self.memory_save(params).await,
            "sp_memory_get" => self.memory_get(params).await,
            "sp_memory_delete" => self.memory_delete(params).await,
            "sp_memory_list_keys" => self.memory_list_keys(params).await,
            "sp_memory_export_session" => self.memory_export_session(params).await,
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

/// Resolve whatever the caller passed as `site_id`/`site_identifier` to a
/// canonical Graph site id, trying in order: already-canonical input,
/// lookup by (hostname-prefixed) server-relative path, the configured
/// default site, the root site. Shared with the forms and stream
/// connectors, which address SharePoint drives too.
pub(crate) async fn resolve_site_id(
    client: &AuthedClient,
    settings: &Settings,
    params: &Params,
) -> Result<String, ConnectorError> {
    let base = &settings.graph_base_url;
    let scope = &settings.graph_scope;
    let site_input = opt_str(params, "site_id").or_else(|| opt_str(params, "site_identifier"));

    if let Some(input) = site_input {
        if site_ref_is_canonical(input) {
            return Ok(input.to_string());
        }
        let mut lookup_path = input.to_string();
        if !input.contains(':') && (input.starts_with("/sites/") || input.starts_with("/teams/")) {
            let root_url = format!("{}/sites/root", base);
            let query = vec![q("$select", "siteCollection")];
            match client.get_json(&root_url, scope, Some(&query)).await {
                Ok(root) => {
                    if let Some(hostname) = root
                        .get("siteCollection")
                        .and_then(|c| c.get("hostname"))
                        .and_then(|h| h.as_str())
                    {
                        lookup_path = format!("{}:{}", hostname, input);
                    }
                }
                Err(e) => {
                    tracing::warn!("root-site hostname lookup failed for '{}': {}", input, e);
                }
            }
        }
        let url = format!("{}/sites/{}", base, lookup_path);
        let query = vec![q("$select", "id,displayName,webUrl,siteCollection")];
        match client.get_json(&url, scope, Some(&query)).await {
            Ok(site) => {
                if let Some(id) = site.get("id").and_then(|v| v.as_str()) {
                    return Ok(id.to_string());
                }
            }
            Err(e) => {
                tracing::warn!("site lookup failed for '{}': {}, falling back", lookup_path, e);
            }
        }
    }

    if let Some(default_site) = settings.sharepoint_default_site_id.as_deref() {
        if site_ref_is_canonical(default_site) {
            return Ok(default_site.to_string());
        }
    }

    let url = format!("{}/sites/root", base);
    let query = vec![q("$select", "id,displayName")];
    let root = client.get_json(&url, scope, Some(&query)).await?;
    root.get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ConnectorError::InternalError("could not determine a SharePoint site id".to_string())
        })
}

/// Resolve a drive reference (opaque id or display name) to a drive id.
pub(crate) async fn resolve_drive_id(
    client: &AuthedClient,
    settings: &Settings,
    site_id: &str,
    drive_input: Option<&str>,
) -> Result<String, ConnectorError> {
    let base = &settings.graph_base_url;
    let scope = &settings.graph_scope;
    let target = drive_input.unwrap_or(&settings.sharepoint_default_drive_name);
    if target.is_empty() {
        return Err(ConnectorError::InvalidParams(
            "a drive name or id is required".to_string(),
        ));
    }
    if drive_ref_is_likely_id(target) {
        let url = format!("{}/sites/{}/drives/{}", base, site_id, target);
        let query = vec![q("$select", "id,name")];
        match client.get_json(&url, scope, Some(&query)).await {
            Ok(drive) => {
                if let Some(id) = drive.get("id").and_then(|v| v.as_str()) {
                    return Ok(id.to_string());
                }
            }
            Err(e) => {
                tracing::warn!("drive lookup by id '{}' failed: {}, trying by name", target, e);
            }
        }
    }
    let url = format!("{}/sites/{}/drives", base, site_id);
    let query = vec![q("$select", "id,name,displayName,webUrl")];
    let drives = client.get_json(&url, scope, Some(&query)).await?;
    let found = drives
        .get("value")
        .and_then(|v| v.as_array())
        .and_then(|list| {
            list.iter().find(|d| {
                ["name", "displayName"].iter().any(|key| {
                    d.get(*key)
                        .and_then(|n| n.as_str())
                        .map(|n| n.eq_ignore_ascii_case(target))
                        .unwrap_or(false)
                })
            })
        })
        .and_then(|d| d.get("id"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    found.ok_or_else(|| {
        ConnectorError::NotFound(format!("drive '{}' not found in site '{}'", target, site_id))
    })
}

/// Quote-all CSV rendering for list exports. Field order: `_ListItemID_`,
/// `_ListItemETag_`, then the remaining keys sorted.
pub(crate) fn rows_to_csv(rows: &[JsonMap<String, Value>]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let mut keys: BTreeSet<String> = BTreeSet::new();
    for row in rows {
        keys.extend(row.keys().cloned());
    }
    let mut ordered: Vec<String> = Vec::with_capacity(keys.len());
    for lead in ["_ListItemID_", "_ListItemETag_"] {
        if keys.remove(lead) {
            ordered.push(lead.to_string());
        }
    }
    ordered.extend(keys);

    fn cell(value: Option<&Value>) -> String {
        let raw = match value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        format!("\"{}\"", raw.replace('"', "\"\""))
    }

    let mut out = String::new();
    out.push_str(
        &ordered
            .iter()
            .map(|k| format!("\"{}\"", k.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push_str("\r\n");
    for row in rows {
        out.push_str(
            &ordered
                .iter()
                .map(|k| cell(row.get(k)))
                .collect::<Vec<_>>()
                .join(","),
        );
        out.push_str("\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    fn connector() -> SharePointConnector {
        let settings = Arc::new(Settings::from_env().unwrap());
        let client = AuthedClient::new(
            reqwest::Client::new(),
            Arc::new(StaticToken("test".to_string())),
        );
        SharePointConnector::new(client, settings)
    }

    #[test]
    fn item_endpoint_by_path_and_id() {
        let c = connector();
        let by_path = c.item_endpoint("site1", "drive1", &ItemRef::Path("/docs/a.txt".to_string()));
        assert!(by_path.ends_with("/sites/site1/drives/drive1/root:/docs/a.txt"));
        let root = c.item_endpoint("site1", "drive1", &ItemRef::Path("/".to_string()));
        assert!(root.ends_with("/sites/site1/drives/drive1/root"));
        let by_id = c.item_endpoint("site1", "drive1", &ItemRef::Id("ITEM!1".to_string()));
        assert!(by_id.ends_with("/sites/site1/drives/drive1/items/ITEM!1"));
    }

    #[test]
    fn csv_export_orders_ledger_columns_first() {
        let rows: Vec<JsonMap<String, Value>> = vec![
            json!({"Clave": "k1", "Valor": "\"v1\"", "_ListItemID_": "3", "_ListItemETag_": "e3"})
                .as_object()
                .unwrap()
                .clone(),
            json!({"Clave": "k2", "_ListItemID_": "4"})
                .as_object()
                .unwrap()
                .clone(),
        ];
        let csv = rows_to_csv(&rows);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "\"_ListItemID_\",\"_ListItemETag_\",\"Clave\",\"Valor\""
        );
        let first = lines.next().unwrap();
        assert!(first.starts_with("\"3\",\"e3\",\"k1\""));
        // embedded quotes are doubled
        assert!(first.contains("\"\"v1\"\""));
        let second = lines.next().unwrap();
        assert!(second.starts_with("\"4\",\"\",\"k2\""));
    }

    #[test]
    fn csv_export_of_nothing_is_empty() {
        assert_eq!(rows_to_csv(&[]), "");
    }

    #[test]
    fn content_bytes_accepts_standard_and_urlsafe_base64() {
        assert_eq!(decode_content_bytes("aGVsbG8=").unwrap(), b"hello");
        assert!(decode_content_bytes("not base64!!").is_err());
    }
}
