use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of the dispatch request: the action key plus its parameter bag.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Standardized error response. Fields absent from the failure are omitted.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub message: String,
    pub http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_error_code: Option<String>,
}

impl ErrorResponse {
    pub fn new(action: Option<&str>, message: impl Into<String>, http_status: u16) -> Self {
        ErrorResponse {
            status: "error",
            action: action.map(|a| a.to_string()),
            message: message.into(),
            http_status,
            details: None,
            graph_error_code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_default_to_empty() {
        let req: ActionRequest =
            serde_json::from_value(json!({ "action": "calendar_list_events" })).unwrap();
        assert_eq!(req.action, "calendar_list_events");
        assert!(req.params.is_empty());
    }

    #[test]
    fn error_response_omits_absent_fields() {
        let resp = ErrorResponse::new(Some("sp_get_list"), "boom", 500);
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["http_status"], 500);
        assert!(v.get("details").is_none());
        assert!(v.get("graph_error_code").is_none());
    }
}
