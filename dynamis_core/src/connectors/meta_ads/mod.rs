use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{MetaAdsCredentials, Settings};
use crate::envelope::{ok, opt_str, opt_u32, req_object, req_str, ActionOutput, Params};
use crate::error::ConnectorError;
use crate::Connector;

const META_GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";

const ACTIONS: &[&str] = &[
    "metaads_list_campaigns",
    "metaads_create_campaign",
    "metaads_update_campaign",
    "metaads_delete_campaign",
    "metaads_get_insights",
];

const CAMPAIGN_FIELDS: &str = "id,name,objective,status,effective_status,created_time,start_time,stop_time,daily_budget,lifetime_budget,special_ad_categories";

/// Meta Marketing API over the Facebook Graph REST surface, authenticated
/// with a long-lived access token.
pub struct MetaAdsConnector {
    http: reqwest::Client,
    settings: Arc<Settings>,
}

impl MetaAdsConnector {
    pub fn new(http: reqwest::Client, settings: Arc<Settings>) -> Self {
        Self { http, settings }
    }

    fn creds(&self) -> Result<&MetaAdsCredentials, ConnectorError> {
        self.settings.meta_ads.as_ref().ok_or_else(|| {
            ConnectorError::Authentication("META_ADS_ACCESS_TOKEN is not configured".to_string())
        })
    }

    /// `act_` prefix is required on ad-account paths; the caller-supplied
    /// id wins over the configured default.
    fn ad_account_id(&self, params: &Params) -> Result<String, ConnectorError> {
        let creds = self.creds()?;
        let raw = opt_str(params, "ad_account_id")
            .map(|s| s.to_string())
            .or_else(|| creds.business_account_id.clone())
            .ok_or_else(|| {
                ConnectorError::InvalidParams(
                    "'ad_account_id' is required (param or META_ADS_BUSINESS_ACCOUNT_ID)"
                        .to_string(),
                )
            })?;
        if raw.starts_with("act_") {
            Ok(raw)
        } else {
            Ok(format!("act_{}", raw))
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        query: &[(String, String)],
        form: Option<&Params>,
    ) -> Result<Value, ConnectorError> {
        let creds = self.creds()?;
        let mut req = self
            .http
            .request(method, url)
            .query(&[("access_token", creds.access_token.as_str())]);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(form) = form {
            // Graph API expects form fields; nested values ride as JSON text
            let rendered: Vec<(String, String)> = form
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect();
            req = req.form(&rendered);
        }
        let resp = req.send().await.map_err(ConnectorError::HttpRequest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(crate::http::upstream_error(
                status,
                resp.text().await.unwrap_or_default(),
            ));
        }
        resp.json::<Value>().await.map_err(ConnectorError::HttpRequest)
    }
}

#[async_trait]
impl Connector for MetaAdsConnector {
    fn name(&self) -> &'static str {
        "meta_ads"
    }

    fn description(&self) -> &'static str {
        "Meta Marketing API: campaigns and insights for an ad account."
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
            "metaads_list_campaigns" => {
                let account = self.ad_account_id(params)?;
                let url = format!("{}/{}/campaigns", META_GRAPH_API_BASE, account);
                let mut query = vec![(
                    "fields".to_string(),
                    opt_str(params, "fields").unwrap_or(CAMPAIGN_FIELDS).to_string(),
                )];
                if let Some(limit) = opt_u32(params, "limit") {
                    query.push(("limit".to_string(), limit.to_string()));
                }
                if let Some(preset) = opt_str(params, "date_preset") {
                    query.push(("date_preset".to_string(), preset.to_string()));
                }
                if let Some(filtering) = params.get("filtering").filter(|v| v.is_array()) {
                    query.push(("filtering".to_string(), filtering.to_string()));
                }
                let data = self
                    .request(reqwest::Method::GET, &url, &query, None)
                    .await?;
                let items = data.get("data").cloned().unwrap_or_else(|| json!([]));
                let total = items.as_array().map(|a| a.len()).unwrap_or(0);
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": items,
                    "total_retrieved": total,
                    "paging": data.get("paging"),
                })))
            }
            "metaads_create_campaign" => {
                let account = self.ad_account_id(params)?;
                let payload = req_object(params, "campaign_payload")?;
                for field in ["name", "objective", "status", "special_ad_categories"] {
                    if !payload.contains_key(field) {
                        return Err(ConnectorError::InvalidParams(format!(
                            "'campaign_payload' is missing required field '{}'",
                            field
                        )));
                    }
                }
                let url = format!("{}/{}/campaigns", META_GRAPH_API_BASE, account);
                let data = self
                    .request(reqwest::Method::POST, &url, &[], Some(payload))
                    .await?;
                Ok(ok(data))
            }
            "metaads_update_campaign" => {
                let campaign_id = req_str(params, "campaign_id")?;
                let payload = req_object(params, "update_payload")?;
                let url = format!("{}/{}", META_GRAPH_API_BASE, campaign_id);
                let data = self
                    .request(reqwest::Method::POST, &url, &[], Some(payload))
                    .await?;
                Ok(ok(data))
            }
            "metaads_delete_campaign" => {
                let campaign_id = req_str(params, "campaign_id")?;
                let url = format!("{}/{}", META_GRAPH_API_BASE, campaign_id);
                let data = self
                    .request(reqwest::Method::DELETE, &url, &[], None)
                    .await?;
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": data,
                    "message": format!("Campaign '{}' deleted.", campaign_id),
                })))
            }
            "metaads_get_insights" => {
                // level defaults to the account; a campaign id narrows it
                let object_id = match opt_str(params, "campaign_id") {
                    Some(campaign_id) => campaign_id.to_string(),
                    None => self.ad_account_id(params)?,
                };
                let url = format!("{}/{}/insights", META_GRAPH_API_BASE, object_id);
                let mut query: Vec<(String, String)> = Vec::new();
                if let Some(fields) = opt_str(params, "fields") {
                    query.push(("fields".to_string(), fields.to_string()));
                }
                if let Some(preset) = opt_str(params, "date_preset") {
                    query.push(("date_preset".to_string(), preset.to_string()));
                }
                if let Some(time_range) = params.get("time_range").filter(|v| v.is_object()) {
                    query.push(("time_range".to_string(), time_range.to_string()));
                }
                if let Some(level) = opt_str(params, "level") {
                    query.push(("level".to_string(), level.to_string()));
                }
                let data = self
                    .request(reqwest::Method::GET, &url, &query, None)
                    .await?;
                Ok(ok(data.get("data").cloned().unwrap_or_else(|| json!([]))))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector_with_creds() -> MetaAdsConnector {
        let mut settings = Settings::from_env().unwrap();
        settings.meta_ads = Some(MetaAdsCredentials {
            access_token: "tok".to_string(),
            business_account_id: Some("111222333".to_string()),
        });
        MetaAdsConnector::new(reqwest::Client::new(), Arc::new(settings))
    }

    #[test]
    fn ad_account_id_is_prefixed() {
        let c = connector_with_creds();
        let params = Params::new();
        assert_eq!(c.ad_account_id(&params).unwrap(), "act_111222333");

        let mut params = Params::new();
        params.insert("ad_account_id".to_string(), json!("act_999"));
        assert_eq!(c.ad_account_id(&params).unwrap(), "act_999");
    }
}
