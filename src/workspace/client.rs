//! Power BI REST client for dataset refresh history.
//!
//! Authenticates as a service principal with the client-credentials grant
//! and walks `groups -> datasets -> refreshes?$top=1`. A token is requested
//! at the start of every cycle and never reused across cycles.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::WorkspacesConfig;
use crate::error::BiwatchError;
use crate::source::{DatasetRef, KeyedSource, RefreshOccurrence, SourceError};

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Group {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Dataset {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default = "default_refreshable")]
    is_refreshable: bool,
}

fn default_refreshable() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Refresh {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    service_exception_json: Option<String>,
}

impl From<Refresh> for RefreshOccurrence {
    fn from(refresh: Refresh) -> Self {
        Self {
            request_id: refresh.request_id,
            status: refresh.status.unwrap_or_else(|| "Unknown".to_string()),
            end_time: refresh.end_time,
            error_detail: refresh.service_exception_json,
        }
    }
}

/// Power BI client implementing [`KeyedSource`].
pub struct WorkspaceClient {
    client: Client,
    config: WorkspacesConfig,
    token: Option<String>,
}

impl WorkspaceClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns `BiwatchError::Http` if the HTTP client cannot be created.
    pub fn new(config: &WorkspacesConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(BiwatchError::Http)?;

        Ok(Self {
            client,
            config: config.clone(),
            token: None,
        })
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.authority_base.trim_end_matches('/'),
            self.config.tenant_id
        )
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// GETs `path` and decodes its `value` array.
    async fn get_collection<T: DeserializeOwned>(
        &self,
        path: &str,
        what: &str,
    ) -> Result<Vec<T>, SourceError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| SourceError::Auth("no access token".to_string()))?;

        let response = self
            .client
            .get(self.api_url(path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, what));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Transient(format!("{} body unreadable: {}", what, e)))?;
        serde_json::from_str::<Collection<T>>(&body)
            .map(|c| c.value)
            .map_err(|e| SourceError::Malformed(format!("{} payload: {}", what, e)))
    }
}

/// Map an HTTP failure status to a source error.
fn status_error(status: StatusCode, body: &str, what: &str) -> SourceError {
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    let detail = format!("{} returned {}: {}", what, status.as_u16(), body.trim());

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        SourceError::Auth(detail)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SourceError::Transient(detail)
    } else {
        SourceError::Malformed(detail)
    }
}

#[async_trait]
impl KeyedSource for WorkspaceClient {
    async fn authenticate(&mut self) -> Result<(), SourceError> {
        self.token = None;

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", self.config.scope.as_str()),
        ];

        let response = self
            .client
            .post(self.token_url())
            .form(&params)
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status_error(status, &body, "token endpoint") {
                // invalid_client and friends come back as 400
                SourceError::Malformed(detail) if status.is_client_error() => {
                    SourceError::Auth(detail)
                }
                other => other,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Auth(format!("token response unreadable: {}", e)))?;

        debug!("Access token acquired");
        self.token = Some(token.access_token);
        Ok(())
    }

    async fn list_entities(&mut self) -> Result<Vec<DatasetRef>, SourceError> {
        let groups: Vec<Group> = self.get_collection("/groups", "workspace list").await?;
        debug!(count = groups.len(), "Workspaces found");

        let mut datasets = Vec::new();
        for group in groups {
            let path = format!("/groups/{}/datasets", group.id);
            let listed: Vec<Dataset> = match self.get_collection(&path, "dataset list").await {
                Ok(listed) => listed,
                Err(e) => {
                    warn!(workspace = %group.name, error = %e, "Skipping workspace");
                    continue;
                }
            };

            for dataset in listed {
                if !dataset.is_refreshable {
                    debug!(dataset = %dataset.name, "Dataset is not refreshable, skipping");
                    continue;
                }
                datasets.push(DatasetRef {
                    workspace_id: group.id.clone(),
                    workspace_name: group.name.clone(),
                    dataset_id: dataset.id,
                    dataset_name: dataset.name,
                });
            }
        }

        Ok(datasets)
    }

    async fn fetch_latest(
        &mut self,
        entity: &DatasetRef,
    ) -> Result<Option<RefreshOccurrence>, SourceError> {
        let path = format!(
            "/groups/{}/datasets/{}/refreshes?$top=1",
            entity.workspace_id, entity.dataset_id
        );
        let refreshes: Vec<Refresh> = self
            .get_collection(&path, "refresh history")
            .await
            .map_err(entity_error)?;
        Ok(refreshes.into_iter().next().map(RefreshOccurrence::from))
    }
}

/// A failure scoped to one dataset only skips that dataset.
fn entity_error(error: SourceError) -> SourceError {
    match error {
        SourceError::Malformed(reason) => SourceError::Malformed(reason),
        other => SourceError::Malformed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_url() {
        let config = WorkspacesConfig {
            tenant_id: "contoso".to_string(),
            authority_base: "https://login.example.com/".to_string(),
            ..WorkspacesConfig::default()
        };
        let client = WorkspaceClient::new(&config).unwrap();
        assert_eq!(
            client.token_url(),
            "https://login.example.com/contoso/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_status_error_classification() {
        let auth = status_error(StatusCode::FORBIDDEN, "nope", "x");
        assert!(matches!(auth, SourceError::Auth(_)));

        let busy = status_error(StatusCode::TOO_MANY_REQUESTS, "", "x");
        assert!(busy.is_transient());
        assert!(status_error(StatusCode::BAD_GATEWAY, "", "x").is_transient());

        let bad = status_error(StatusCode::NOT_FOUND, "missing", "refresh history");
        assert_eq!(
            bad,
            SourceError::Malformed("refresh history returned 404: missing".to_string())
        );
    }

    #[test]
    fn test_entity_error_is_always_malformed() {
        let auth = entity_error(status_error(StatusCode::FORBIDDEN, "denied", "refresh history"));
        assert!(matches!(auth, SourceError::Malformed(ref r) if r.contains("403")));

        let busy = entity_error(SourceError::Transient("timed out".to_string()));
        assert!(matches!(busy, SourceError::Malformed(ref r) if r.contains("timed out")));
    }

    #[test]
    fn test_refresh_deserialization() {
        let json = r#"{
            "value": [{
                "requestId": "9399bb89-25d1-44f8-8576-136d7e9014b1",
                "id": 1344,
                "refreshType": "Scheduled",
                "startTime": "2025-03-01T13:00:00Z",
                "endTime": "2025-03-01T13:05:09.153Z",
                "serviceExceptionJson": "{\"errorCode\":\"ModelRefreshFailed\"}",
                "status": "Failed"
            }]
        }"#;

        let collection: Collection<Refresh> = serde_json::from_str(json).unwrap();
        let refresh = RefreshOccurrence::from(collection.value.into_iter().next().unwrap());
        assert_eq!(
            refresh.request_id.as_deref(),
            Some("9399bb89-25d1-44f8-8576-136d7e9014b1")
        );
        assert_eq!(refresh.status, "Failed");
        assert!(refresh.error_detail.unwrap().contains("ModelRefreshFailed"));
    }

    #[test]
    fn test_missing_status_is_unknown() {
        let refresh: Refresh = serde_json::from_str("{}").unwrap();
        assert_eq!(RefreshOccurrence::from(refresh).status, "Unknown");
    }

    #[tokio::test]
    async fn test_requests_require_token() {
        let client = WorkspaceClient::new(&WorkspacesConfig::default()).unwrap();
        let err = client
            .get_collection::<Group>("/groups", "workspace list")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Auth(_)));
    }
}
