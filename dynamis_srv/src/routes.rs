use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;

use dynamis_core::{ActionOutput, ActionRegistry, ConnectorError, Settings};

use crate::schemas::{ActionRequest, ErrorResponse};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ActionRegistry>,
    pub settings: Arc<Settings>,
}

pub fn router(state: AppState) -> Router {
    let prefix = state.settings.api_prefix.trim_end_matches('/').to_string();
    Router::new()
        .route(&format!("{}/dynamics", prefix), post(dispatch_action))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn status_or(code: u16, fallback: StatusCode) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(fallback)
}

fn error_response(action: &str, err: &ConnectorError) -> Response {
    // an error must never travel with a 2xx status
    let mut code = err.http_status();
    if (200..300).contains(&code) {
        code = 500;
    }
    let mut body = ErrorResponse::new(
        Some(action),
        format!("Error executing {}: {}", action, err.code_str()),
        code,
    );
    body.details = Some(Value::String(err.to_string()));
    body.graph_error_code = err.upstream_code().map(|c| c.to_string());
    (status_or(code, StatusCode::INTERNAL_SERVER_ERROR), Json(body)).into_response()
}

/// Infer the download media type the way the original service did: profile
/// photos are JPEG, document downloads and report exports take their type
/// from the requested filename's extension.
fn binary_media_type(action: &str, params: &serde_json::Map<String, Value>) -> &'static str {
    if action.contains("photo") {
        return "image/jpeg";
    }
    if action.ends_with("_download_document")
        || action.ends_with("_download_file")
        || action.ends_with("_export_report")
    {
        let filename = params
            .get("filename")
            .or_else(|| params.get("item_id_or_path"))
            .or_else(|| params.get("item_id_o_nombre_con_ruta"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if let Some(ext) = filename.rsplit('.').next().filter(|e| *e != filename) {
            return match ext.to_lowercase().as_str() {
                "pdf" => "application/pdf",
                "xlsx" | "xls" => {
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                }
                "docx" | "doc" => {
                    "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                }
                "csv" => "text/csv",
                "png" => "image/png",
                _ => "application/octet-stream",
            };
        }
    }
    "application/octet-stream"
}

async fn dispatch_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ActionRequest>,
) -> Response {
    let invocation_id = headers
        .get("x-ms-invocation-id")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("N/A");
    let action = request.action.clone();
    tracing::info!(
        invocation_id,
        action = %action,
        param_keys = ?request.params.keys().collect::<Vec<_>>(),
        "dispatch request received"
    );

    match state.registry.dispatch(&action, &request.params).await {
        Ok(ActionOutput::Json(envelope)) => {
            let embedded = envelope
                .get("http_status")
                .and_then(|v| v.as_u64())
                .map(|v| v as u16);
            let is_error = envelope.get("status").and_then(|s| s.as_str()) == Some("error");
            let code = match (is_error, embedded) {
                // a handler-built error envelope keeps its own status,
                // coerced out of the 2xx range
                (true, Some(code)) if !(200..300).contains(&code) => code,
                (true, _) => 500,
                (false, Some(code)) if (200..300).contains(&code) => code,
                (false, _) => 200,
            };
            tracing::info!(invocation_id, action = %action, code, "action completed");
            (
                status_or(code, StatusCode::OK),
                Json(envelope),
            )
                .into_response()
        }
        Ok(ActionOutput::Bytes { data, media_type }) => {
            tracing::info!(invocation_id, action = %action, bytes = data.len(), "action returned binary data");
            let content_type = media_type
                .unwrap_or_else(|| binary_media_type(&action, &request.params).to_string());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type)],
                data,
            )
                .into_response()
        }
        Ok(ActionOutput::Csv(csv)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=export.csv".to_string(),
                ),
            ],
            csv,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(invocation_id, action = %action, error = %err, "action failed");
            error_response(&action, &err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn photo_actions_are_jpeg() {
        let params = serde_json::Map::new();
        assert_eq!(
            binary_media_type("profile_get_my_photo", &params),
            "image/jpeg"
        );
    }

    #[test]
    fn download_type_follows_extension() {
        let params = json!({ "item_id_or_path": "/docs/q3 report.pdf" })
            .as_object()
            .unwrap()
            .clone();
        assert_eq!(
            binary_media_type("sp_download_document", &params),
            "application/pdf"
        );
        let params = json!({ "filename": "export.xlsx" }).as_object().unwrap().clone();
        assert_eq!(
            binary_media_type("powerbi_export_report", &params),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        let params = json!({ "item_id_or_path": "no-extension" })
            .as_object()
            .unwrap()
            .clone();
        assert_eq!(
            binary_media_type("sp_download_document", &params),
            "application/octet-stream"
        );
    }
}
