//! Workflow run API client

use ci_models::{ArtifactList, WorkflowDispatchRequest, WorkflowRun, WorkflowRunList};
use tracing::info;

use crate::errors::DeployError;
use crate::http::client::CiClient;

impl CiClient {
    /// Dispatch the workflow for a git ref
    pub async fn trigger_workflow(&self, workflow: &str, git_ref: &str) -> Result<(), DeployError> {
        let path = format!("{}/actions/workflows/{}/dispatches", self.repo_path(), workflow);
        let body = WorkflowDispatchRequest {
            git_ref: git_ref.to_string(),
            inputs: None,
        };
        self.post(&path, &body).await?;
        info!("Dispatched workflow {} for {}", workflow, git_ref);
        Ok(())
    }

    /// Get a single run
    pub async fn get_run_status(&self, run_id: u64) -> Result<WorkflowRun, DeployError> {
        let path = format!("{}/actions/runs/{}", self.repo_path(), run_id);
        self.get(&path, &[]).await
    }

    /// Most recent runs of a workflow, newest first
    pub async fn list_recent_runs(
        &self,
        workflow: &str,
        branch: Option<&str>,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, DeployError> {
        let path = format!("{}/actions/workflows/{}/runs", self.repo_path(), workflow);
        let mut query = vec![("per_page", limit.to_string())];
        if let Some(branch) = branch {
            query.push(("branch", branch.to_string()));
        }

        let ttl = self.cache.as_ref().map(|c| c.ttls().runs);
        let list: WorkflowRunList = match ttl {
            Some(ttl) => self.get_cached(&path, &query, ttl).await?,
            None => self.get(&path, &query).await?,
        };
        Ok(list.workflow_runs)
    }

    /// Artifacts produced by a run
    pub async fn list_run_artifacts(&self, run_id: u64) -> Result<ArtifactList, DeployError> {
        let path = format!("{}/actions/runs/{}/artifacts", self.repo_path(), run_id);
        self.get(&path, &[]).await
    }

    /// Request cancellation of a run
    pub async fn cancel_run(&self, run_id: u64) -> Result<(), DeployError> {
        let path = format!("{}/actions/runs/{}/cancel", self.repo_path(), run_id);
        self.post(&path, &serde_json::json!({})).await
    }
}

/// First run whose head commit is `sha`, in the order the service returned them
pub fn match_run<'a>(runs: &'a [WorkflowRun], sha: &str) -> Option<&'a WorkflowRun> {
    runs.iter().find(|run| run.head_sha.eq_ignore_ascii_case(sha))
}
