use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::Settings;
use crate::envelope::{
    ok, ok_message, ok_paged_collection, opt_str, opt_u32, opt_usize, req_object, req_str,
    ActionOutput, Params,
};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::paging::PageSpec;
use crate::Connector;

const ACTIONS: &[&str] = &[
    "bookings_list_businesses",
    "bookings_get_business",
    "bookings_list_services",
    "bookings_list_staff",
    "bookings_create_appointment",
    "bookings_get_appointment",
    "bookings_cancel_appointment",
    "bookings_list_appointments",
];

pub struct BookingsConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl BookingsConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn scope(&self) -> &str {
        &self.settings.graph_scope
    }

    fn businesses_base(&self) -> String {
        format!("{}/solutions/bookingBusinesses", self.settings.graph_base_url)
    }

    async fn simple_collection(
        &self,
        url: String,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let mut query: Query = Vec::new();
        if let Some(top) = opt_u32(params, "top") {
            query.push(q("$top", top.to_string()));
        }
        if let Some(select) = opt_str(params, "select") {
            query.push(q("$select", select));
        }
        let data = self
            .client
            .get_json(&url, self.scope(), if query.is_empty() { None } else { Some(&query) })
            .await?;
        Ok(ok(data.get("value").cloned().unwrap_or_else(|| json!([]))))
    }
}

#[async_trait]
impl Connector for BookingsConnector {
    fn name(&self) -> &'static str {
        "bookings"
    }

    fn description(&self) -> &'static str {
        "Microsoft Bookings over Graph: businesses, services, staff, appointments."
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
            "bookings_list_businesses" => self.simple_collection(self.businesses_base(), params).await,
            "bookings_get_business" => {
                let business_id = req_str(params, "business_id")?;
                let url = format!("{}/{}", self.businesses_base(), business_id);
                Ok(ok(self.client.get_json(&url, self.scope(), None).await?))
            }
            "bookings_list_services" => {
                let business_id = req_str(params, "business_id")?;
                let url = format!("{}/{}/services", self.businesses_base(), business_id);
                self.simple_collection(url, params).await
            }
            "bookings_list_staff" => {
                let business_id = req_str(params, "business_id")?;
                let url = format!("{}/{}/staffMembers", self.businesses_base(), business_id);
                self.simple_collection(url, params).await
            }
            "bookings_create_appointment" => {
                let business_id = req_str(params, "business_id")?;
                let payload = req_object(params, "appointment_payload")?;
                for field in ["customerTimeZone", "serviceId", "startDateTime", "endDateTime"] {
                    if !payload.contains_key(field) {
                        return Err(ConnectorError::InvalidParams(format!(
                            "'appointment_payload' is missing required field '{}'",
                            field
                        )));
                    }
                }
                let url = format!("{}/{}/appointments", self.businesses_base(), business_id);
                Ok(ok(self
                    .client
                    .post_json(&url, self.scope(), &serde_json::Value::Object(payload.clone()))
                    .await?))
            }
            "bookings_list_appointments" => {
                let business_id = req_str(params, "business_id")?;
                let per_page = opt_u32(params, "top_per_page").unwrap_or(25).clamp(1, 100);
                let mut query: Query = vec![q("$top", per_page.to_string())];
                let start = opt_str(params, "start_datetime");
                let end = opt_str(params, "end_datetime");
                let url = if let (Some(start), Some(end)) = (start, end) {
                    query.push(q("startDateTime", start));
                    query.push(q("endDateTime", end));
                    format!("{}/{}/calendarView", self.businesses_base(), business_id)
                } else {
                    format!("{}/{}/appointments", self.businesses_base(), business_id)
                };
                let spec = PageSpec::new(
                    per_page,
                    opt_usize(params, "max_items_total"),
                    self.settings.max_paging_pages,
                );
                let outcome = self
                    .client
                    .paged_get(&url, self.scope(), &query, &spec, &[])
                    .await?;
                Ok(ok_paged_collection(outcome))
            }
            "bookings_get_appointment" => {
                let business_id = req_str(params, "business_id")?;
                let appointment_id = req_str(params, "appointment_id")?;
                let url = format!(
                    "{}/{}/appointments/{}",
                    self.businesses_base(),
                    business_id,
                    appointment_id
                );
                Ok(ok(self.client.get_json(&url, self.scope(), None).await?))
            }
            "bookings_cancel_appointment" => {
                let business_id = req_str(params, "business_id")?;
                let appointment_id = req_str(params, "appointment_id")?;
                let message = opt_str(params, "cancellation_message")
                    .unwrap_or("Appointment cancelled.");
                let url = format!(
                    "{}/{}/appointments/{}/cancel",
                    self.businesses_base(),
                    business_id,
                    appointment_id
                );
                let resp = self
                    .client
                    .post_for_response(&url, self.scope(), &json!({ "cancellationMessage": message }))
                    .await?;
                Ok(ok_message(
                    format!("Appointment '{}' cancelled.", appointment_id),
                    resp.status().as_u16(),
                ))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}
