/// Mailbox-scoped Graph paths: `me/...` for the signed-in principal,
/// `users/{upn-or-id}/...` otherwise.
pub(crate) fn user_path(mailbox: &str) -> String {
    if mailbox.eq_ignore_ascii_case("me") {
        "me".to_string()
    } else {
        format!("users/{}", mailbox)
    }
}

/// Normalize a caller-supplied datetime (RFC 3339 with any offset, or a
/// bare `YYYY-MM-DD`) to the UTC `...Z` form Graph task endpoints expect.
pub(crate) fn parse_utc_datetime(input: &str, field: &str) -> Result<String, crate::ConnectorError> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(input) {
        return Ok(dt
            .with_timezone(&chrono::Utc)
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Ok(format!("{}Z", naive.format("%Y-%m-%dT%H:%M:%S")));
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(format!("{}T00:00:00Z", date.format("%Y-%m-%d")));
    }
    Err(crate::ConnectorError::InvalidParams(format!(
        "invalid datetime for '{}': {}",
        field, input
    )))
}

// Microsoft Graph family
pub mod bookings;
pub mod calendar;
pub mod forms;
pub mod graph;
pub mod mail;
pub mod office;
pub mod onedrive;
pub mod planner;
pub mod profile;
pub mod sharepoint;
pub mod stream;
pub mod teams;
pub mod todo;
pub mod users;
pub mod viva;

// Azure Resource Manager family
pub mod azure_mgmt;
pub mod power_automate;

// Other first-party surfaces
pub mod azure_openai;
pub mod power_bi;

// Third parties
#[cfg(feature = "github")]
pub mod github;
#[cfg(feature = "google-ads")]
pub mod google_ads;
#[cfg(feature = "meta-ads")]
pub mod meta_ads;
