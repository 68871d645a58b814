// src/config.rs
use std::env;
use std::time::Duration;

pub const GRAPH_API_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const GRAPH_API_BETA_BASE_URL: &str = "https://graph.microsoft.com/beta";
pub const AZURE_MGMT_API_BASE_URL: &str = "https://management.azure.com";
pub const POWER_BI_API_BASE_URL: &str = "https://api.powerbi.com/v1.0/myorg";

pub const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";
pub const AZURE_MGMT_DEFAULT_SCOPE: &str = "https://management.azure.com/.default";
pub const POWER_BI_DEFAULT_SCOPE: &str = "https://analysis.windows.net/powerbi/api/.default";

/// Credentials for the Google Ads API (env prefix `GOOGLE_ADS_`).
#[derive(Debug, Clone)]
pub struct GoogleAdsCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub developer_token: String,
    pub refresh_token: String,
    /// MCC or direct account id, digits only.
    pub login_customer_id: Option<String>,
}

/// Credentials for the Meta Marketing API (env prefix `META_ADS_`).
#[derive(Debug, Clone)]
pub struct MetaAdsCredentials {
    pub access_token: String,
    /// Ad account id, e.g. `act_123456789`.
    pub business_account_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EntraCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub app_version: String,
    pub api_prefix: String,

    pub graph_base_url: String,
    pub mgmt_base_url: String,
    pub powerbi_base_url: String,

    pub graph_scope: String,
    pub mgmt_scope: String,
    pub powerbi_scope: String,

    /// Entra app registration for Graph/ARM (client-credentials flow).
    pub entra: Option<EntraCredentials>,
    /// Dedicated Power BI app registration; falls back to `entra`.
    pub powerbi_entra: Option<EntraCredentials>,

    pub azure_openai_endpoint: Option<String>,
    pub azure_openai_api_version: String,

    pub azure_subscription_id: Option<String>,
    pub azure_resource_group: Option<String>,

    pub github_pat: Option<String>,
    pub google_ads: Option<GoogleAdsCredentials>,
    pub meta_ads: Option<MetaAdsCredentials>,

    /// Mailbox actions run against this user; `me` means the signed-in
    /// principal (delegated flows).
    pub mailbox_user_id: String,
    /// SharePoint list backing the session memory actions.
    pub memory_list_name: String,
    pub sharepoint_default_site_id: Option<String>,
    pub sharepoint_default_drive_name: String,

    pub default_page_size: u32,
    pub max_paging_pages: usize,
    pub default_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

fn opt_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn entra_from_env(prefix: &str) -> Option<EntraCredentials> {
    Some(EntraCredentials {
        tenant_id: opt_var(&format!("{prefix}TENANT_ID"))?,
        client_id: opt_var(&format!("{prefix}CLIENT_ID"))?,
        client_secret: opt_var(&format!("{prefix}CLIENT_SECRET"))?,
    })
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let page_size = match opt_var("DEFAULT_PAGING_SIZE") {
            Some(v) => v
                .parse::<u32>()
                .map_err(|e| ConfigError::InvalidValue("DEFAULT_PAGING_SIZE", e.to_string()))?,
            None => 50,
        };
        let max_pages = match opt_var("MAX_PAGING_PAGES") {
            Some(v) => v
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidValue("MAX_PAGING_PAGES", e.to_string()))?,
            None => 20,
        };
        let timeout_secs = match opt_var("DEFAULT_API_TIMEOUT") {
            Some(v) => v
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidValue("DEFAULT_API_TIMEOUT", e.to_string()))?,
            None => 90,
        };

        let google_ads = match (
            opt_var("GOOGLE_ADS_CLIENT_ID"),
            opt_var("GOOGLE_ADS_CLIENT_SECRET"),
            opt_var("GOOGLE_ADS_DEVELOPER_TOKEN"),
            opt_var("GOOGLE_ADS_REFRESH_TOKEN"),
        ) {
            (Some(client_id), Some(client_secret), Some(developer_token), Some(refresh_token)) => {
                Some(GoogleAdsCredentials {
                    client_id,
                    client_secret,
                    developer_token,
                    refresh_token,
                    login_customer_id: opt_var("GOOGLE_ADS_LOGIN_CUSTOMER_ID")
                        .map(|v| v.replace('-', "")),
                })
            }
            _ => None,
        };

        let meta_ads = opt_var("META_ADS_ACCESS_TOKEN").map(|access_token| MetaAdsCredentials {
            access_token,
            business_account_id: opt_var("META_ADS_BUSINESS_ACCOUNT_ID"),
        });

        Ok(Settings {
            app_name: opt_var("APP_NAME").unwrap_or_else(|| "dynamis".to_string()),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            api_prefix: opt_var("API_PREFIX").unwrap_or_else(|| "/api/v1".to_string()),

            graph_base_url: opt_var("GRAPH_API_BASE_URL")
                .unwrap_or_else(|| GRAPH_API_BASE_URL.to_string()),
            mgmt_base_url: opt_var("AZURE_MGMT_API_BASE_URL")
                .unwrap_or_else(|| AZURE_MGMT_API_BASE_URL.to_string()),
            powerbi_base_url: POWER_BI_API_BASE_URL.to_string(),

            graph_scope: GRAPH_DEFAULT_SCOPE.to_string(),
            mgmt_scope: AZURE_MGMT_DEFAULT_SCOPE.to_string(),
            powerbi_scope: POWER_BI_DEFAULT_SCOPE.to_string(),

            entra: entra_from_env("AZURE_"),
            powerbi_entra: entra_from_env("PBI_"),

            azure_openai_endpoint: opt_var("AZURE_OPENAI_RESOURCE_ENDPOINT")
                .map(|v| v.trim_end_matches('/').to_string()),
            azure_openai_api_version: opt_var("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| "2024-02-15-preview".to_string()),

            azure_subscription_id: opt_var("AZURE_SUBSCRIPTION_ID"),
            azure_resource_group: opt_var("AZURE_RESOURCE_GROUP"),

            github_pat: opt_var("GITHUB_PAT"),
            google_ads,
            meta_ads,

            mailbox_user_id: opt_var("MAILBOX_USER_ID").unwrap_or_else(|| "me".to_string()),
            memory_list_name: opt_var("MEMORIA_LIST_NAME")
                .unwrap_or_else(|| "AsistenteMemoria".to_string()),
            sharepoint_default_site_id: opt_var("SHAREPOINT_DEFAULT_SITE_ID"),
            sharepoint_default_drive_name: opt_var("SHAREPOINT_DEFAULT_DRIVE_ID_OR_NAME")
                .unwrap_or_else(|| "Documents".to_string()),

            default_page_size: page_size,
            max_paging_pages: max_pages,
            default_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Scope requested for Azure OpenAI calls: `{endpoint}/.default`.
    pub fn azure_openai_scope(&self) -> Option<String> {
        self.azure_openai_endpoint
            .as_ref()
            .map(|e| format!("{}/.default", e.trim_end_matches('/')))
    }

    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.app_name, self.app_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_scope_derives_from_endpoint() {
        let mut s = Settings::from_env().unwrap();
        s.azure_openai_endpoint = Some("https://myres.openai.azure.com".to_string());
        assert_eq!(
            s.azure_openai_scope().unwrap(),
            "https://myres.openai.azure.com/.default"
        );
    }
}
