// src/auth.rs
use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::EntraCredentials;
use crate::error::ConnectorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    // epoch seconds, already shortened by the refresh margin
    expires_at: i64,
}

impl CachedToken {
    fn from_tokens(tokens: &OAuthTokens) -> Self {
        let expires_at = now_epoch() + tokens.expires_in.unwrap_or(3600) - 60;
        CachedToken {
            access_token: tokens.access_token.clone(),
            expires_at,
        }
    }

    fn is_fresh(&self) -> bool {
        self.expires_at > now_epoch()
    }
}

/// Where connectors get bearer tokens from. One provider instance serves
/// many scopes; implementations cache per scope.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, scope: &str) -> Result<String, ConnectorError>;
}

/// Entra ID client-credentials flow against the v2.0 token endpoint.
pub struct ClientCredentials {
    http: reqwest::Client,
    creds: EntraCredentials,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl ClientCredentials {
    pub fn new(http: reqwest::Client, creds: EntraCredentials) -> Self {
        Self {
            http,
            creds,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch(&self, scope: &str) -> Result<OAuthTokens, ConnectorError> {
        let tenant = if self.creds.tenant_id.is_empty() {
            "common"
        } else {
            &self.creds.tenant_id
        };
        let url = format!("https://login.microsoftonline.com/{}/oauth2/v2.0/token", tenant);
        let body = [
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.creds.client_id.clone()),
            ("client_secret", self.creds.client_secret.clone()),
            ("scope", scope.to_string()),
        ];
        let resp = self
            .http
            .post(url)
            .form(&body)
            .send()
            .await
            .map_err(ConnectorError::HttpRequest)?;
        let status = resp.status();
        let v = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ConnectorError::InternalError(e.to_string()))?;
        if !status.is_success() {
            return Err(ConnectorError::Authentication(format!(
                "token request failed for scope {}: {}",
                scope, v
            )));
        }
        Ok(OAuthTokens {
            access_token: v["access_token"].as_str().unwrap_or_default().to_string(),
            refresh_token: None,
            expires_in: v.get("expires_in").and_then(|i| i.as_i64()),
            scope: Some(scope.to_string()),
            token_type: v
                .get("token_type")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string()),
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentials {
    async fn token(&self, scope: &str) -> Result<String, ConnectorError> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(scope) {
                if entry.is_fresh() {
                    return Ok(entry.access_token.clone());
                }
            }
        }
        tracing::debug!(scope, "requesting access token");
        let tokens = self.fetch(scope).await?;
        if tokens.access_token.is_empty() {
            return Err(ConnectorError::Authentication(format!(
                "empty access token for scope {}",
                scope
            )));
        }
        let entry = CachedToken::from_tokens(&tokens);
        self.cache
            .lock()
            .await
            .insert(scope.to_string(), entry.clone());
        Ok(entry.access_token)
    }
}

/// Placeholder provider registered when a credential block is absent from
/// the environment; every token request reports the missing configuration.
pub struct MissingCredentials(pub &'static str);

#[async_trait]
impl TokenProvider for MissingCredentials {
    async fn token(&self, scope: &str) -> Result<String, ConnectorError> {
        Err(ConnectorError::Authentication(format!(
            "{} credentials are not configured (needed for scope {})",
            self.0, scope
        )))
    }
}

/// Fixed token, for tests and pre-issued credentials.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self, _scope: &str) -> Result<String, ConnectorError> {
        Ok(self.0.clone())
    }
}

/// Google OAuth refresh-token grant. Used by the Google Ads connector.
pub struct GoogleRefreshToken {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    cache: Mutex<Option<CachedToken>>,
}

impl GoogleRefreshToken {
    pub fn new(
        http: reqwest::Client,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    ) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            refresh_token,
            cache: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> Result<String, ConnectorError> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.as_ref() {
                if entry.is_fresh() {
                    return Ok(entry.access_token.clone());
                }
            }
        }
        let tokens = google_refresh_token(
            &self.http,
            &self.client_id,
            Some(&self.client_secret),
            &self.refresh_token,
        )
        .await?;
        let entry = CachedToken::from_tokens(&tokens);
        *self.cache.lock().await = Some(entry.clone());
        Ok(entry.access_token)
    }
}

pub async fn google_refresh_token(
    http: &reqwest::Client,
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
) -> Result<OAuthTokens, ConnectorError> {
    let url = "https://oauth2.googleapis.com/token";
    let mut body = vec![
        ("grant_type", "refresh_token".to_string()),
        ("client_id", client_id.to_string()),
        ("refresh_token", refresh_token.to_string()),
    ];
    if let Some(cs) = client_secret {
        if !cs.is_empty() {
            body.push(("client_secret", cs.to_string()));
        }
    }
    let resp = http
        .post(url)
        .form(&body)
        .send()
        .await
        .map_err(ConnectorError::HttpRequest)?;
    let status = resp.status();
    let v = resp
        .json::<serde_json::Value>()
        .await
        .map_err(|e| ConnectorError::InternalError(e.to_string()))?;
    if !status.is_success() {
        return Err(ConnectorError::Authentication(format!(
            "refresh failed: {}",
            v
        )));
    }
    Ok(OAuthTokens {
        access_token: v["access_token"].as_str().unwrap_or_default().to_string(),
        refresh_token: v
            .get("refresh_token")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
        expires_in: v.get("expires_in").and_then(|i| i.as_i64()),
        scope: v
            .get("scope")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
        token_type: v
            .get("token_type")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_ignores_scope() {
        let p = StaticToken("tok-123".to_string());
        assert_eq!(p.token("https://graph.microsoft.com/.default").await.unwrap(), "tok-123");
        assert_eq!(p.token("anything").await.unwrap(), "tok-123");
    }

    #[test]
    fn cached_token_expiry_margin() {
        let tokens = OAuthTokens {
            access_token: "t".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
            scope: None,
            token_type: None,
        };
        let entry = CachedToken::from_tokens(&tokens);
        assert!(entry.is_fresh());
        let stale = CachedToken {
            access_token: "t".to_string(),
            expires_at: now_epoch() - 1,
        };
        assert!(!stale.is_fresh());
    }
}
