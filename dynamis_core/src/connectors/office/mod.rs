use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::envelope::{ok, opt_str, req_array, req_str, ActionOutput, Params};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient};
use crate::ident::ItemRef;
use crate::Connector;

const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const ACTIONS: &[&str] = &[
    "office_crear_documento_word",
    "office_reemplazar_contenido_word",
    "office_obtener_documento_word_binario",
    "office_crear_libro_excel",
    "office_leer_celda_excel",
    "office_escribir_celda_excel",
    "office_crear_tabla_excel",
    "office_agregar_filas_tabla_excel",
];

/// Word and Excel files live on `/me/drive`; workbook operations address
/// the file by item id.
pub struct OfficeConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl OfficeConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn scope(&self) -> &str {
        &self.settings.graph_scope
    }

    fn content_url(&self, item: &ItemRef) -> String {
        let base = format!("{}/me/drive", self.settings.graph_base_url);
        match item {
            ItemRef::Id(id) => format!("{}/items/{}/content", base, id),
            ItemRef::Path(path) => {
                format!("{}/root:/{}:/content", base, path.trim_matches('/'))
            }
        }
    }

    fn workbook_url(&self, item_id: &str) -> String {
        format!(
            "{}/me/drive/items/{}/workbook",
            self.settings.graph_base_url, item_id
        )
    }

    /// Create an empty document at a drive path, with the extension and
    /// MIME type of the requested kind.
    async fn create_empty(
        &self,
        params: &Params,
        extension: &str,
        mime: &str,
    ) -> Result<ActionOutput, ConnectorError> {
        let mut filename = req_str(params, "nombre_archivo")?.to_string();
        if !filename.to_lowercase().ends_with(extension) {
            filename.push_str(extension);
        }
        let folder = opt_str(params, "ruta_onedrive").unwrap_or("/").trim_matches('/').to_string();
        let conflict = opt_str(params, "conflict_behavior").unwrap_or("rename");
        let target = if folder.is_empty() {
            filename.clone()
        } else {
            format!("{}/{}", folder, filename)
        };
        let url = self.content_url(&ItemRef::Path(target));
        let query = vec![q("@microsoft.graph.conflictBehavior", conflict)];
        let data = self
            .client
            .put_bytes(&url, self.scope(), &[], mime, Some(&query))
            .await?;
        Ok(ActionOutput::Json(json!({
            "status": "success",
            "data": data,
            "message": format!("Document '{}' created.", filename),
        })))
    }

    /// `'Sheet1'!A1` when the address does not already name a sheet.
    fn range_address(sheet: &str, cell_or_range: &str) -> String {
        if cell_or_range.contains('!') {
            cell_or_range.to_string()
        } else {
            format!("'{}'!{}", sheet, cell_or_range)
        }
    }
}

#[async_trait]
impl Connector for OfficeConnector {
    fn name(&self) -> &'static str {
        "office"
    }

    fn description(&self) -> &'static str {
        "Word and Excel files over Graph drive and workbook APIs."
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
            "office_crear_documento_word" => self.create_empty(params, ".docx", DOCX_MIME).await,
            "office_crear_libro_excel" => self.create_empty(params, ".xlsx", XLSX_MIME).await,
            "office_reemplazar_contenido_word" => {
                let item = ItemRef::classify(req_str(params, "item_id_o_ruta")?);
                let content = req_str(params, "nuevo_contenido")?;
                // plain text replaces the document body; any formatting is lost
                let content_type = opt_str(params, "content_type").unwrap_or("text/plain");
                let url = self.content_url(&item);
                let data = self
                    .client
                    .put_bytes(&url, self.scope(), content.as_bytes(), content_type, None)
                    .await?;
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": data,
                    "message": "Word content replaced.",
                })))
            }
            "office_obtener_documento_word_binario" => {
                let item = ItemRef::classify(req_str(params, "item_id_o_ruta")?);
                let url = self.content_url(&item);
                let bytes = self.client.get_bytes(&url, self.scope(), None).await?;
                Ok(ActionOutput::bytes_with_type(bytes, DOCX_MIME))
            }
            "office_leer_celda_excel" => {
                let item_id = req_str(params, "item_id")?;
                let sheet = req_str(params, "hoja")?;
                let cell = req_str(params, "celda_o_rango")?;
                let address = Self::range_address(sheet, cell);
                let url = format!(
                    "{}/range(address='{}')",
                    self.workbook_url(item_id),
                    address
                );
                Ok(ok(self.client.get_json(&url, self.scope(), None).await?))
            }
            "office_escribir_celda_excel" => {
                let item_id = req_str(params, "item_id")?;
                let sheet = req_str(params, "hoja")?;
                let cell = req_str(params, "celda_o_rango")?;
                let values = req_array(params, "valores")?;
                if !values.iter().all(|row| row.is_array()) {
                    return Err(ConnectorError::InvalidParams(
                        "'valores' must be an array of row arrays".to_string(),
                    ));
                }
                let address = Self::range_address(sheet, cell);
                let url = format!(
                    "{}/range(address='{}')",
                    self.workbook_url(item_id),
                    address
                );
                let payload = json!({ "values": values });
                let data = self
                    .client
                    .patch_json(&url, self.scope(), &payload, &[])
                    .await?;
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": data,
                    "message": "Excel range updated.",
                })))
            }
            "office_crear_tabla_excel" => {
                let item_id = req_str(params, "item_id")?;
                let sheet = req_str(params, "hoja")?;
                let range = req_str(params, "rango")?;
                let has_headers = params
                    .get("tiene_headers_tabla")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let url = format!(
                    "{}/worksheets/{}/tables/add",
                    self.workbook_url(item_id),
                    sheet
                );
                let address = Self::range_address(sheet, range);
                let payload = json!({ "address": address, "hasHeaders": has_headers });
                let mut table = self.client.post_json(&url, self.scope(), &payload).await?;
                if let Some(name) = opt_str(params, "nombre_tabla") {
                    if let Some(table_id) = table.get("id").and_then(|v| v.as_str()) {
                        let rename_url = format!(
                            "{}/worksheets/{}/tables/{}",
                            self.workbook_url(item_id),
                            sheet,
                            table_id
                        );
                        table = self
                            .client
                            .patch_json(&rename_url, self.scope(), &json!({ "name": name }), &[])
                            .await?;
                    }
                }
                Ok(ok(table))
            }
            "office_agregar_filas_tabla_excel" => {
                let item_id = req_str(params, "item_id")?;
                let sheet = req_str(params, "hoja")?;
                let table = req_str(params, "tabla_nombre_o_id")?;
                let rows = req_array(params, "valores_filas")?;
                if !rows.iter().all(|row| row.is_array()) {
                    return Err(ConnectorError::InvalidParams(
                        "'valores_filas' must be an array of row arrays".to_string(),
                    ));
                }
                let url = format!(
                    "{}/worksheets/{}/tables/{}/rows",
                    self.workbook_url(item_id),
                    sheet,
                    table
                );
                let payload = json!({ "values": rows, "index": Value::Null });
                Ok(ok(self.client.post_json(&url, self.scope(), &payload).await?))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_address_qualifies_bare_cells() {
        assert_eq!(OfficeConnector::range_address("Hoja1", "A1:C5"), "'Hoja1'!A1:C5");
        assert_eq!(
            OfficeConnector::range_address("Hoja1", "Resumen!B2"),
            "Resumen!B2"
        );
    }
}
