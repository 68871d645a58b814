// src/error.rs
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Upstream error {status}: {message}")]
    Upstream {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ConnectorError {
    pub fn code_str(&self) -> &'static str {
        match self {
            ConnectorError::InvalidParams(_) => "invalid_params",
            ConnectorError::Authentication(_) => "auth_failed",
            ConnectorError::ActionNotFound(_) => "action_not_found",
            ConnectorError::NotFound(_) => "not_found",
            ConnectorError::Upstream { .. } => "upstream_error",
            ConnectorError::HttpRequest(_) => "transport_error",
            ConnectorError::SerdeJson(_) => "parse_error",
            ConnectorError::NotSupported(_) => "not_supported",
            ConnectorError::InternalError(_) => "internal_error",
        }
    }

    /// HTTP status this error maps to at the dispatch boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            ConnectorError::InvalidParams(_) | ConnectorError::ActionNotFound(_) => 400,
            ConnectorError::Authentication(_) => 401,
            ConnectorError::NotFound(_) => 404,
            ConnectorError::NotSupported(_) => 501,
            ConnectorError::Upstream { status, .. } => *status,
            ConnectorError::HttpRequest(_) => 502,
            ConnectorError::SerdeJson(_) | ConnectorError::InternalError(_) => 500,
        }
    }

    /// Upstream-issued error code (Graph `error.code`), when one was parsed.
    pub fn upstream_code(&self) -> Option<&str> {
        match self {
            ConnectorError::Upstream { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The standardized error envelope returned by every action.
    pub fn to_envelope(&self, action: &str) -> Value {
        let mut body = json!({
            "status": "error",
            "action": action,
            "message": format!("Error executing {}: {}", action, self.code_str()),
            "http_status": self.http_status(),
            "details": self.to_string(),
        });
        if let Some(code) = self.upstream_code() {
            body["graph_error_code"] = Value::String(code.to_string());
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_envelope_carries_status_and_code() {
        let err = ConnectorError::Upstream {
            status: 403,
            code: Some("accessDenied".to_string()),
            message: "Insufficient privileges".to_string(),
        };
        let env = err.to_envelope("sp_get_list");
        assert_eq!(env["status"], "error");
        assert_eq!(env["action"], "sp_get_list");
        assert_eq!(env["http_status"], 403);
        assert_eq!(env["graph_error_code"], "accessDenied");
    }

    #[test]
    fn invalid_params_maps_to_400_without_graph_code() {
        let err = ConnectorError::InvalidParams("'message_id' is required".to_string());
        let env = err.to_envelope("email_get_message");
        assert_eq!(env["http_status"], 400);
        assert!(env.get("graph_error_code").is_none());
    }
}
