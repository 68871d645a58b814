use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::Settings;
use crate::envelope::{ok, opt_str, opt_u32, req_str, ActionOutput, Params};
use crate::error::ConnectorError;
use crate::Connector;

const ACTIONS: &[&str] = &[
    "github_list_repos",
    "github_create_issue",
    "github_list_issues",
];

pub struct GitHubConnector {
    settings: Arc<Settings>,
}

impl GitHubConnector {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    fn octo(&self) -> Result<octocrab::Octocrab, ConnectorError> {
        let token = self.settings.github_pat.clone().ok_or_else(|| {
            ConnectorError::Authentication("GITHUB_PAT is not configured".to_string())
        })?;
        octocrab::Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|e| ConnectorError::InternalError(e.to_string()))
    }

    fn issue_state(state: Option<&str>) -> Result<octocrab::params::State, ConnectorError> {
        match state.unwrap_or("open") {
            "open" => Ok(octocrab::params::State::Open),
            "closed" => Ok(octocrab::params::State::Closed),
            "all" => Ok(octocrab::params::State::All),
            other => Err(ConnectorError::InvalidParams(format!(
                "'state' must be open, closed or all (got '{}')",
                other
            ))),
        }
    }
}

fn gh_err(e: octocrab::Error) -> ConnectorError {
    match e {
        octocrab::Error::GitHub { source, .. } => ConnectorError::Upstream {
            status: source.status_code.as_u16(),
            code: None,
            message: source.message,
        },
        other => ConnectorError::InternalError(other.to_string()),
    }
}

#[async_trait]
impl Connector for GitHubConnector {
    fn name(&self) -> &'static str {
        "github"
    }

    fn description(&self) -> &'static str {
        "GitHub via a personal access token: repositories and issues."
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
            "github_list_repos" => {
                let octo = self.octo()?;
                let per_page = opt_u32(params, "per_page").unwrap_or(30).clamp(1, 100) as u8;
                let page = opt_u32(params, "page").unwrap_or(1);
                let repos = match opt_str(params, "org_name") {
                    Some(org) => octo
                        .orgs(org)
                        .list_repos()
                        .per_page(per_page)
                        .page(page)
                        .send()
                        .await
                        .map_err(gh_err)?,
                    None => octo
                        .current()
                        .list_repos_for_authenticated_user()
                        .per_page(per_page)
                        .page(page as u8)
                        .send()
                        .await
                        .map_err(gh_err)?,
                };
                let items = serde_json::to_value(&repos.items)?;
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": items,
                    "total_retrieved": repos.items.len(),
                })))
            }
            "github_create_issue" => {
                let owner = req_str(params, "owner")?;
                let repo = req_str(params, "repo")?;
                let title = req_str(params, "title")?;
                let octo = self.octo()?;
                let handler = octo.issues(owner, repo);
                let mut builder = handler.create(title);
                if let Some(body) = opt_str(params, "body") {
                    builder = builder.body(body);
                }
                if let Some(labels) = params.get("labels").and_then(|v| v.as_array()) {
                    let labels: Vec<String> = labels
                        .iter()
                        .filter_map(|l| l.as_str().map(|s| s.to_string()))
                        .collect();
                    builder = builder.labels(labels);
                }
                if let Some(assignees) = params.get("assignees").and_then(|v| v.as_array()) {
                    let assignees: Vec<String> = assignees
                        .iter()
                        .filter_map(|a| a.as_str().map(|s| s.to_string()))
                        .collect();
                    builder = builder.assignees(assignees);
                }
                let issue = builder.send().await.map_err(gh_err)?;
                Ok(ok(serde_json::to_value(&issue)?))
            }
            "github_list_issues" => {
                let owner = req_str(params, "owner")?;
                let repo = req_str(params, "repo")?;
                let state = Self::issue_state(opt_str(params, "state"))?;
                let per_page = opt_u32(params, "per_page").unwrap_or(30).clamp(1, 100) as u8;
                let page = opt_u32(params, "page").unwrap_or(1);
                let octo = self.octo()?;
                let issues = octo
                    .issues(owner, repo)
                    .list()
                    .state(state)
                    .per_page(per_page)
                    .page(page)
                    .send()
                    .await
                    .map_err(gh_err)?;
                let items = serde_json::to_value(&issues.items)?;
                Ok(ActionOutput::Json(json!({
                    "status": "success",
                    "data": items,
                    "total_retrieved": issues.items.len(),
                })))
            }
            _ => Err(ConnectorError::ActionNotFound(action.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_parsing() {
        assert!(matches!(
            GitHubConnector::issue_state(None).unwrap(),
            octocrab::params::State::Open
        ));
        assert!(matches!(
            GitHubConnector::issue_state(Some("all")).unwrap(),
            octocrab::params::State::All
        ));
        assert!(GitHubConnector::issue_state(Some("merged")).is_err());
    }
}
