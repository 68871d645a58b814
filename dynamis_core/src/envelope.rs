// src/envelope.rs
//! The uniform result envelope plus parameter-bag accessors.

use serde_json::{json, Map as JsonMap, Value};

use crate::error::ConnectorError;
use crate::paging::PagedOutcome;

pub type Params = JsonMap<String, Value>;

/// What an action hands back to the dispatch layer. Most actions return a
/// JSON envelope; file downloads and exports return raw bytes, the list
/// export can return CSV text.
#[derive(Debug)]
pub enum ActionOutput {
    Json(Value),
    Bytes {
        data: Vec<u8>,
        media_type: Option<String>,
    },
    Csv(String),
}

impl ActionOutput {
    pub fn bytes(data: Vec<u8>) -> Self {
        ActionOutput::Bytes {
            data,
            media_type: None,
        }
    }

    pub fn bytes_with_type(data: Vec<u8>, media_type: &str) -> Self {
        ActionOutput::Bytes {
            data,
            media_type: Some(media_type.to_string()),
        }
    }
}

/// `{"status": "success", "data": ...}`
pub fn ok(data: Value) -> ActionOutput {
    ActionOutput::Json(json!({ "status": "success", "data": data }))
}

/// Success with no payload, just a human-readable message and the upstream
/// status code (deletes and other 204-shaped operations).
pub fn ok_message(message: impl Into<String>, http_status: u16) -> ActionOutput {
    ActionOutput::Json(json!({
        "status": "success",
        "message": message.into(),
        "http_status": http_status,
    }))
}

/// 202-accepted long-running operation; `monitor_url` is the upstream
/// Location header when one was issued.
pub fn pending(message: impl Into<String>, monitor_url: Option<String>, data: Value) -> ActionOutput {
    let mut body = json!({
        "status": "pending",
        "message": message.into(),
        "http_status": 202,
        "data": data,
    });
    if let Some(url) = monitor_url {
        body["monitor_url"] = Value::String(url);
    }
    ActionOutput::Json(body)
}

/// Paged collection envelope used by the SharePoint-family list actions:
/// the accumulated batch is re-wrapped as a `value` collection and the
/// paging counters ride alongside.
pub fn ok_paged_collection(outcome: PagedOutcome) -> ActionOutput {
    let total = outcome.total_retrieved;
    let pages = outcome.pages_processed;
    ActionOutput::Json(json!({
        "status": "success",
        "data": outcome.into_value_collection(),
        "total_retrieved": total,
        "pages_processed": pages,
    }))
}

/// Paged envelope with the items as a bare array (`onedrive`-family shape).
pub fn ok_paged_items(outcome: PagedOutcome) -> ActionOutput {
    ActionOutput::Json(json!({
        "status": "success",
        "data": outcome.items,
        "total_retrieved": outcome.total_retrieved,
        "pages_processed": outcome.pages_processed,
    }))
}

// --- parameter-bag accessors -------------------------------------------------

pub fn req_str<'a>(params: &'a Params, key: &str) -> Result<&'a str, ConnectorError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ConnectorError::InvalidParams(format!("'{}' is required", key)))
}

pub fn opt_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

pub fn opt_u32(params: &Params, key: &str) -> Option<u32> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v.min(u64::from(u32::MAX)) as u32)
}

pub fn opt_usize(params: &Params, key: &str) -> Option<usize> {
    params.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

pub fn opt_bool(params: &Params, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

pub fn req_object<'a>(params: &'a Params, key: &str) -> Result<&'a Params, ConnectorError> {
    params
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| ConnectorError::InvalidParams(format!("'{}' (object) is required", key)))
}

pub fn req_array<'a>(params: &'a Params, key: &str) -> Result<&'a Vec<Value>, ConnectorError> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| ConnectorError::InvalidParams(format!("'{}' (array) is required", key)))
}

pub fn req_value<'a>(params: &'a Params, key: &str) -> Result<&'a Value, ConnectorError> {
    params
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| ConnectorError::InvalidParams(format!("'{}' is required", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_param_is_invalid_params() {
        let params = Params::new();
        let err = req_str(&params, "message_id").unwrap_err();
        assert_eq!(err.code_str(), "invalid_params");
        assert!(err.to_string().contains("message_id"));
    }

    #[test]
    fn blank_string_counts_as_missing() {
        let mut params = Params::new();
        params.insert("subject".to_string(), json!("   "));
        assert!(req_str(&params, "subject").is_err());
        assert!(opt_str(&params, "subject").is_none());
    }

    #[test]
    fn paged_collection_envelope_shape() {
        let outcome = PagedOutcome {
            items: vec![json!({"id": 1}), json!({"id": 2})],
            total_retrieved: 2,
            pages_processed: 1,
        };
        match ok_paged_collection(outcome) {
            ActionOutput::Json(v) => {
                assert_eq!(v["status"], "success");
                assert_eq!(v["data"]["@odata.count"], 2);
                assert_eq!(v["total_retrieved"], 2);
                assert_eq!(v["pages_processed"], 1);
            }
            _ => panic!("expected json"),
        }
    }
}
