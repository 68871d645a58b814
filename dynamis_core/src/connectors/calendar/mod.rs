use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::Settings;
use crate::connectors::user_path;
use crate::envelope::{
    ok, ok_message, ok_paged_collection, opt_str, opt_u32, opt_usize, req_object, req_str,
    ActionOutput, Params,
};
use crate::error::ConnectorError;
use crate::http::{q, AuthedClient, Query};
use crate::paging::PageSpec;
use crate::Connector;

const ACTIONS: &[&str] = &[
    "calendar_list_events",
    "calendar_create_event",
    "calendar_get_event",
    "calendar_update_event",
    "calendar_delete_event",
    "calendar_find_meeting_times",
    "calendar_get_schedule",
];

const LIST_SELECT: &str =
    "id,subject,bodyPreview,start,end,organizer,attendees,location,isAllDay,webLink,onlineMeeting";

pub struct CalendarConnector {
    client: AuthedClient,
    settings: Arc<Settings>,
}

impl CalendarConnector {
    pub fn new(client: AuthedClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    fn mailbox<'a>(&'a self, params: &'a Params) -> &'a str {
        opt_str(params, "mailbox").unwrap_or(&self.settings.mailbox_user_id)
    }

    fn calendar_segment(params: &Params) -> String {
        match opt_str(params, "calendar_id") {
            Some(id) => format!("calendars/{}", id),
            None => "calendar".to_string(),
        }
    }

    /// `start`/`end` in an event payload must be `{dateTime, timeZone}`
    /// objects; Graph rejects anything else with an opaque 400.
    fn check_event_payload(payload: &Params) -> Result<(), ConnectorError> {
        for field in ["subject", "start", "end"] {
            if !payload.contains_key(field) {
                return Err(ConnectorError::InvalidParams(format!(
                    "'event_payload' is missing required field '{}'",
                    field
                )));
            }
        }
        for field in ["start", "end"] {
            let ok_shape = payload
                .get(field)
                .and_then(|v| v.as_object())
                .map(|o| o.contains_key("dateTime") && o.contains_key("timeZone"))
                .unwrap_or(false);
            if !ok_shape {
                return Err(ConnectorError::InvalidParams(format!(
                    "'{}' in 'event_payload' must be an object with 'dateTime' and 'timeZone'",
                    field
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for CalendarConnector {
    fn name(&self) -> &'static str {
        "calendar"
    }

    fn description(&self) -> &'static str {
        "Outlook calendar over Microsoft Graph: events, calendar view, availability."
    }

    fn actions(&self) -> &'static [&'static str] {
        ACTIONS
    }

    async fn execute(
        &self,
        action: &str,
        params: &Params,
    ) -> Result<ActionOutput, ConnectorError> {
        let base = &self.settings.graph_base_url;
        let scope = &self.settings.graph_scope;
        match action {
            "calendar_list_events" => {
                let mailbox = self.mailbox(params);
                let per_page = opt_u32(params, "top_per_page").unwrap_or(25).clamp(1, 100);
                let mut query: Query = vec![
                    q("$top", per_page.to_string()),
                    q("$select", opt_str(params, "select").unwrap_or(LIST_SELECT)),
                    q(
                        "$orderby",
                        opt_str(params, "orderby").unwrap_or("start/dateTime"),
                    ),
                ];
                let start = opt_str(params, "start_datetime");
                let end = opt_str(params, "end_datetime");
                let url = if let (Some(start), Some(end)) = (start, end) {
                    // calendarView: the window is the filter
                    query.push(q("startDateTime", start));
                    query.push(q("endDateTime", end));
                    format!(
                        "{}/{}/{}/calendarView",
                        base,
                        user_path(mailbox),
                        Self::calendar_segment(params)
                    )
                } else {
                    if let Some(filter) = opt_str(params, "filter") {
                        query.push(q("$filter", filter));
                    }
                    format!(
                        "{}/{}/{}/events",
                        base,
                        user_path(mailbox),
                        Self::calendar_segment(params)
                    )
                };
                let spec = PageSpec::new(
                    per_page,
                    opt_usize(params, "max_items_total"),
                    self.settings.max_paging_pages,
                );
                let outcome = self.client.paged_get(&url, scope, &query, &spec, &[]).await?;
                Ok(ok_paged_collection(outcome))
            }
            "calendar_create_event" => {
                let payload = req_object(params, "event_payload")?;
                Self::check_event_payload(payload)?;
                let mailbox = self.mailbox(params);
                let url = format!(
                    "{}/{}/{}/events",
                    base,
                    user_path(mailbox),
                    Self::calendar_segment(params)
                );
                let data = self
                    .client
                    .post_json(&url, scope, &serde_json::Value::Object(payload.clone()))
                    .await?;
                Ok(ok(data))
            }
            "calendar_get_event" => {
                let event_id = req_str(params, "event_id")?;
                let mailbox = self.mailbox(params);
                let url = format!("{}/{}/events/{}", base, user_path(mailbox), event_id);
                let query: Query = match opt_str(params, "select") {
                    Some(select) => vec![q("$select", select)],
                    None => Vec::new(),
                };
                let data = self
                    .client
                    .get_json(&url, scope, if query.is_empty() { None } else { Some(&query) })
                    .await?;
                Ok(ok(data))
            }
            "calendar_update_event" => {
                let event_id = req_str(params, "event_id")?;
                let payload = req_object(params, "update_payload")?;
                let mailbox = self.mailbox(params);
                let url = format!("{}/{}/events/{}", base, user_path(mailbox), event_id);
                let data = self
                    .client
                    .patch_json(&url, scope, &serde_json::Value::Object(payload.clone()), &[])
                    .await?;
                Ok(ok(data))
            }
            "calendar_delete_event" => {
                let event_id = req_str(params, "event_id")?;
                let mailbox = self.mailbox(params);
                let url = format!("{}/{}/events/{}", base, user_path(mailbox), event_id);
                let status = self.client.delete(&url, scope, &[]).await?;
                Ok(ok_message(format!("Event '{}' deleted.", event_id), status))
            }
            "calendar_find_meeting_times" => {
                let payload = req_object(params, "meeting_time_suggestion_payload")?;
                let mailbox = self.mailbox(params);
                let url = format!("{}/{}/findMeetingTimes", base, user_path(mailbox));
                let data = self
                    .client
                    .post_json(&url, scope, &serde_json::Value::Object(payload.clone()))
                    .await?;
                Ok(ok(data))
            }
            "calendar_get_schedule" => {
                let payload = req_object(params, "schedule_information_payload")?;
                for field in ["schedules", "startTime", "endTime"] {
                    if !payload.contains_key(field) {
                        return Err(ConnectorError::InvalidParams(format!(
                            "'schedule_information_payload' is missing '{}'",
                            field
                        )));
                    }
                }
                let url = format!("{}/me/calendar/getSchedule", base);
                let data = self
                    .client
                    .post_json(&url, scope, &serde_json::Value::Object(payload.clone()))
                    .await?;
                Ok(ok(data))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_payload_requires_typed_start_end() {
        let payload = json!({
            "subject": "standup",
            "start": "2025-05-20T08:00:00Z",
            "end": { "dateTime": "2025-05-20T08:30:00Z", "timeZone": "UTC" },
        });
        let err =
            CalendarConnector::check_event_payload(payload.as_object().unwrap()).unwrap_err();
        assert!(err.to_string().contains("'start'"));

        let payload = json!({
            "subject": "standup",
            "start": { "dateTime": "2025-05-20T08:00:00Z", "timeZone": "UTC" },
            "end": { "dateTime": "2025-05-20T08:30:00Z", "timeZone": "UTC" },
        });
        assert!(CalendarConnector::check_event_payload(payload.as_object().unwrap()).is_ok());
    }

    #[test]
    fn calendar_segment_defaults_to_primary() {
        let params = Params::new();
        assert_eq!(CalendarConnector::calendar_segment(&params), "calendar");
        let mut params = Params::new();
        params.insert("calendar_id".to_string(), json!("AQMkAD"));
        assert_eq!(
            CalendarConnector::calendar_segment(&params),
            "calendars/AQMkAD"
        );
    }
}
