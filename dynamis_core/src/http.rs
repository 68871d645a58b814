// src/http.rs
//! Authenticated HTTP plumbing shared by every connector.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde_json::Value;

use crate::auth::TokenProvider;
use crate::error::ConnectorError;
use crate::paging::{follow_value_pages, PageSpec, PagedOutcome};

/// Query parameters are prepared as owned pairs so callers can build them
/// conditionally before handing them over.
pub type Query = Vec<(String, String)>;

pub fn q(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

/// Wraps a shared `reqwest::Client`, attaching a bearer token for the
/// requested OAuth scope on every call and normalizing upstream failures
/// into [`ConnectorError::Upstream`]. There is deliberately no retry or
/// backoff here: upstream failures abort the action and surface verbatim.
#[derive(Clone)]
pub struct AuthedClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
}

impl AuthedClient {
    pub fn new(http: reqwest::Client, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { http, tokens }
    }

    /// The underlying client, for flows that carry their own credentials
    /// (Meta access tokens, Google token exchange).
    pub fn raw(&self) -> &reqwest::Client {
        &self.http
    }

    pub async fn send(
        &self,
        method: Method,
        url: &str,
        scope: &str,
        query: Option<&[(String, String)]>,
        json_body: Option<&Value>,
        raw_body: Option<(&[u8], &str)>,
        headers: &[(&str, String)],
    ) -> Result<reqwest::Response, ConnectorError> {
        let token = self.tokens.token(scope).await?;
        tracing::debug!(%method, url, scope, "upstream request");

        let mut req = self.http.request(method.clone(), url).bearer_auth(&token);
        if let Some(query) = query {
            if !query.is_empty() {
                req = req.query(query);
            }
        }
        if let Some(body) = json_body {
            req = req.json(body);
        }
        if let Some((bytes, content_type)) = raw_body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(bytes.to_vec());
        }
        for (name, value) in headers {
            req = req.header(*name, value);
        }

        let resp = req.send().await.map_err(ConnectorError::HttpRequest)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        Err(upstream_error(status, resp.text().await.unwrap_or_default()))
    }

    pub async fn get_json(
        &self,
        url: &str,
        scope: &str,
        query: Option<&[(String, String)]>,
    ) -> Result<Value, ConnectorError> {
        self.get_json_with_headers(url, scope, query, &[]).await
    }

    pub async fn get_json_with_headers(
        &self,
        url: &str,
        scope: &str,
        query: Option<&[(String, String)]>,
        headers: &[(&str, String)],
    ) -> Result<Value, ConnectorError> {
        let resp = self
            .send(Method::GET, url, scope, query, None, None, headers)
            .await?;
        json_body(resp).await
    }

    pub async fn get_bytes(
        &self,
        url: &str,
        scope: &str,
        query: Option<&[(String, String)]>,
    ) -> Result<Vec<u8>, ConnectorError> {
        let resp = self
            .send(Method::GET, url, scope, query, None, None, &[])
            .await?;
        Ok(resp.bytes().await.map_err(ConnectorError::HttpRequest)?.to_vec())
    }

    pub async fn post_json(
        &self,
        url: &str,
        scope: &str,
        body: &Value,
    ) -> Result<Value, ConnectorError> {
        let resp = self
            .send(Method::POST, url, scope, None, Some(body), None, &[])
            .await?;
        json_body_or_default(resp).await
    }

    /// POST returning the raw response for callers that inspect status and
    /// headers (202-accepted long-running operations).
    pub async fn post_for_response(
        &self,
        url: &str,
        scope: &str,
        body: &Value,
    ) -> Result<reqwest::Response, ConnectorError> {
        self.send(Method::POST, url, scope, None, Some(body), None, &[])
            .await
    }

    pub async fn patch_json(
        &self,
        url: &str,
        scope: &str,
        body: &Value,
        headers: &[(&str, String)],
    ) -> Result<Value, ConnectorError> {
        let resp = self
            .send(Method::PATCH, url, scope, None, Some(body), None, headers)
            .await?;
        json_body_or_default(resp).await
    }

    pub async fn put_bytes(
        &self,
        url: &str,
        scope: &str,
        bytes: &[u8],
        content_type: &str,
        query: Option<&[(String, String)]>,
    ) -> Result<Value, ConnectorError> {
        let resp = self
            .send(
                Method::PUT,
                url,
                scope,
                query,
                None,
                Some((bytes, content_type)),
                &[],
            )
            .await?;
        json_body_or_default(resp).await
    }

    /// DELETE returning the upstream status code for the success message.
    pub async fn delete(
        &self,
        url: &str,
        scope: &str,
        headers: &[(&str, String)],
    ) -> Result<u16, ConnectorError> {
        let resp = self
            .send(Method::DELETE, url, scope, None, None, None, headers)
            .await?;
        Ok(resp.status().as_u16())
    }

    /// Bounded cursor pagination bound to this client: `initial_query` only
    /// rides on the first request; cursor URLs are used verbatim.
    pub async fn paged_get(
        &self,
        start_url: &str,
        scope: &str,
        initial_query: &[(String, String)],
        spec: &PageSpec,
        headers: &[(&str, String)],
    ) -> Result<PagedOutcome, ConnectorError> {
        follow_value_pages(start_url, spec, |url, is_first| {
            let query = if is_first { Some(initial_query) } else { None };
            async move { self.get_json_with_headers(&url, scope, query, headers).await }
        })
        .await
    }
}

async fn json_body(resp: reqwest::Response) -> Result<Value, ConnectorError> {
    resp.json::<Value>().await.map_err(ConnectorError::HttpRequest)
}

/// Some write endpoints answer 201/202/204 with an empty body; treat that
/// as an empty object rather than a parse failure.
async fn json_body_or_default(resp: reqwest::Response) -> Result<Value, ConnectorError> {
    let bytes = resp.bytes().await.map_err(ConnectorError::HttpRequest)?;
    if bytes.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_slice(&bytes).map_err(ConnectorError::SerdeJson)
}

/// Mine the Graph-style error body (`{"error": {"code", "message"}}`) for
/// the structured error; fall back to a truncated raw body.
pub fn upstream_error(status: StatusCode, body: String) -> ConnectorError {
    let parsed: Option<Value> = serde_json::from_str(&body).ok();
    let info = parsed.as_ref().and_then(|v| v.get("error"));
    let code = info
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .map(|c| c.to_string());
    let message = info
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
        .unwrap_or_else(|| {
            let mut raw = body;
            if raw.len() > 500 {
                let mut cut = 500;
                while !raw.is_char_boundary(cut) {
                    cut -= 1;
                }
                raw.truncate(cut);
                raw.push_str("...");
            }
            raw
        });
    tracing::error!(status = status.as_u16(), code = code.as_deref(), "upstream error: {}", message);
    ConnectorError::Upstream {
        status: status.as_u16(),
        code,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_body_is_mined() {
        let err = upstream_error(
            StatusCode::NOT_FOUND,
            r#"{"error": {"code": "itemNotFound", "message": "The resource could not be found."}}"#.to_string(),
        );
        match err {
            ConnectorError::Upstream { status, code, message } => {
                assert_eq!(status, 404);
                assert_eq!(code.as_deref(), Some("itemNotFound"));
                assert!(message.contains("could not be found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_json_error_body_is_truncated() {
        let err = upstream_error(StatusCode::BAD_GATEWAY, "x".repeat(1000));
        match err {
            ConnectorError::Upstream { status, code, message } => {
                assert_eq!(status, 502);
                assert!(code.is_none());
                assert_eq!(message.len(), 503); // 500 chars + ellipsis
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
