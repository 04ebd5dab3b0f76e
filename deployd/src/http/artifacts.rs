//! Artifact API client

use reqwest::{header, StatusCode};
use tracing::debug;

use crate::errors::DeployError;
use crate::http::client::CiClient;

impl CiClient {
    /// Resolve the pre-signed blob URL of an artifact archive.
    ///
    /// The service answers the authenticated request with a redirect; anything
    /// else, including a redirect without `Location`, is a failure.
    pub async fn get_artifact_download_location(
        &self,
        artifact_id: u64,
    ) -> Result<String, DeployError> {
        let path = format!("{}/actions/artifacts/{}/zip", self.repo_path(), artifact_id);
        let response = self.get_unfollowed(&path).await?;
        let status = response.status();

        if status != StatusCode::FOUND && status != StatusCode::MOVED_PERMANENTLY {
            let message = response.text().await.unwrap_or_default();
            return Err(DeployError::ApiError {
                status: status.as_u16(),
                message: if message.is_empty() {
                    format!("expected a redirect for artifact {}", artifact_id)
                } else {
                    message
                },
            });
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                DeployError::ProtocolError(format!(
                    "artifact {} redirect ({}) carried no Location header",
                    artifact_id,
                    status.as_u16()
                ))
            })?;

        debug!("Artifact {} resolved to blob storage", artifact_id);
        Ok(location.to_string())
    }
}
