//! Two-hop artifact download
//!
//! Hop one asks the CI service (authenticated, redirects disabled) where the
//! archive lives. Hop two fetches the pre-signed blob URL with a separate
//! client that never carries the CI credential.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::http::client::CiClient;
use crate::utils::user_agent;

/// Downloads build artifacts to local files
pub struct ArtifactFetcher {
    ci: Arc<CiClient>,
    blob: Client,
}

impl ArtifactFetcher {
    pub fn new(ci: Arc<CiClient>, timeout: Duration) -> Result<Self, DeployError> {
        let blob = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .build()?;
        Ok(Self { ci, blob })
    }

    /// Download an artifact archive to `dest`, returning the byte count
    pub async fn fetch(&self, artifact_id: u64, dest: &Path) -> Result<u64, DeployError> {
        let location = self.ci.get_artifact_download_location(artifact_id).await?;
        let bytes = self.fetch_blob(&location, dest).await?;
        info!("Downloaded artifact {} ({} bytes)", artifact_id, bytes);
        Ok(bytes)
    }

    /// Stream an unauthenticated blob URL into `dest`
    pub async fn fetch_blob(&self, url: &str, dest: &Path) -> Result<u64, DeployError> {
        debug!("Fetching artifact blob into {:?}", dest);
        let mut response = self.blob.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(DeployError::ApiError {
                status: status.as_u16(),
                message: "artifact blob download failed".to_string(),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        let result: Result<(), DeployError> = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(e);
        }
        if written == 0 {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(DeployError::ProtocolError(format!(
                "artifact blob was empty (status {})",
                status.as_u16()
            )));
        }

        Ok(written)
    }
}
