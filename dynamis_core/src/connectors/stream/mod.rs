use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::connectors::forms::flatten_search_hits;
use crate::connectors::sharepoint::{resolve_drive_id, resolve_site_id};
use crate::envelope::{ok, opt_str, opt_u32, req_str, ActionOutput, Params};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::ident::ItemRef;
use crate::Connector;

const VIDEO_FILETYPE_QUERY: &str = "filetype:mp4 OR filetype:mov OR filetype:wmv OR filetype:avi OR filetype:mkv OR filetype:webm OR filetype:mpeg";

const ACTIONS: &[&str] = &[
    "stream_get_video_playback_url",
    "stream_listar_videos",
    "stream_obtener_metadatos_video",
    "stream_obtener_transcripcion_video",
];

/// Stream (on SharePoint) videos are ordinary drive items with a `video`
/// facet; discovery and playback go through the drive APIs.
pub struct StreamConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl StreamConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn scope(&self) -> &str {
        &self.settings.graph_scope
    }

    /// Drive base segment (no `/root` suffix) for `drive_scope` = `me` or
    /// `site`.
    async fn drive_segment(&self, params: &Params) -> Result<String, ConnectorError> {
        let base = &self.settings.graph_base_url;
        let drive_scope = opt_str(params, "drive_scope").unwrap_or("me").to_lowercase();
        match drive_scope.as_str() {
            "me" => Ok(match opt_str(params, "drive_id") {
                Some(drive_id) => format!("{}/me/drives/{}", base, drive_id),
                None => format!("{}/me/drive", base),
            }),
            "site" => {
                let site_id = resolve_site_id(&self.client, &self.settings, params).await?;
                let drive_id = resolve_drive_id(
                    &self.client,
                    &self.settings,
                    &site_id,
                    opt_str(params, "drive_id_or_name"),
                )
                .await?;
                Ok(format!("{}/sites/{}/drives/{}", base, site_id, drive_id))
            }
            _ => Err(ConnectorError::InvalidParams(
                "'drive_scope' must be 'me' or 'site'".to_string(),
            )),
        }
    }

    /// The search root: the drive root, optionally narrowed to a folder.
    async fn search_base(&self, params: &Params) -> Result<String, ConnectorError> {
        let mut segment = self.drive_segment(params).await?;
        let folder = opt_str(params, "search_folder_path").unwrap_or("/");
        if folder != "/" && !folder.is_empty() {
            segment.push_str(&format!("/root:{}:", folder.trim_matches('/')));
        } else {
            segment.push_str("/root");
        }
        Ok(segment)
    }

    async fn video_item(&self, params: &Params) -> Result<Value, ConnectorError> {
        let item_input = req_str(params, "item_id_or_path")?;
        let drive_base = self.drive_segment(params).await?;
        let url = match ItemRef::classify(item_input) {
            ItemRef::Id(id) => format!("{}/items/{}", drive_base, id),
            ItemRef::Path(path) => {
                format!("{}/root:/{}", drive_base, path.trim_matches('/'))
            }
        };
        let query: Query = vec![q(
            "$select",
            opt_str(params, "select").unwrap_or(
                "id,name,webUrl,video,size,file,createdDateTime,lastModifiedDateTime,parentReference,@microsoft.graph.downloadUrl",
            ),
        )];
        self.client.get_json(&url, self.scope(), Some(&query)).await
    }
}

#[async_trait]
impl Connector for StreamConnector {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn description(&self) -> &'static str {
        "Stream-on-SharePoint video files over Graph drive search and download URLs."
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
            "stream_listar_videos" => {
                let top = opt_u32(params, "top").unwrap_or(25).clamp(1, 200);
                let search = match opt_str(params, "query") {
                    Some(user_query) => format!("({}) AND ({})", user_query, VIDEO_FILETYPE_QUERY),
                    None => format!("({})", VIDEO_FILETYPE_QUERY),
                };
                let base = self.search_base(params).await?;
                let url = format!("{}/search(q='{}')", base, urlencoding::encode(&search));
                let query: Query = vec![
                    q("$top", top.to_string()),
                    q(
                        "$select",
                        opt_str(params, "select").unwrap_or(
                            "id,name,webUrl,video,size,file,createdDateTime,lastModifiedDateTime,parentReference",
                        ),
                    ),
                ];
                let results = self.client.get_json(&url, self.scope(), Some(&query)).await?;
                let items = flatten_search_hits(&results, |item| item.get("video").is_some());
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": items,
                    "total_retrieved": items.len(),
                })))
            }
            "stream_obtener_metadatos_video" => Ok(ok(self.video_item(params).await?)),
            "stream_get_video_playback_url" => {
                let item = self.video_item(params).await?;
                let download_url = item
                    .get("@microsoft.graph.downloadUrl")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ConnectorError::NotFound(
                            "item carries no downloadUrl (not a downloadable video?)".to_string(),
                        )
                    })?;
                Ok(ok(json!({
                    "playback_url": download_url,
                    "item_id": item.get("id"),
                    "name": item.get("name"),
                    "video": item.get("video"),
                })))
            }
            "stream_obtener_transcripcion_video" => Err(ConnectorError::NotSupported(
                "video transcripts are not exposed by the drive APIs".to_string(),
            )),
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}
