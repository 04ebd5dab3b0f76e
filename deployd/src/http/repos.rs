//! Repository metadata API client

use ci_models::{Branch, Commit, CommitSummary, Repository, Workflow, WorkflowList};

use crate::errors::DeployError;
use crate::http::client::CiClient;

impl CiClient {
    /// Commit metadata for a SHA
    pub async fn get_commit(&self, sha: &str) -> Result<CommitSummary, DeployError> {
        let path = format!("{}/commits/{}", self.repo_path(), sha);
        let commit: Commit = self.get(&path, &[]).await?;
        Ok(commit.summary())
    }

    /// Latest commits on a branch, newest first
    pub async fn list_commits(
        &self,
        branch: &str,
        limit: u32,
    ) -> Result<Vec<CommitSummary>, DeployError> {
        let path = format!("{}/commits", self.repo_path());
        let query = [("sha", branch.to_string()), ("per_page", limit.to_string())];
        let commits: Vec<Commit> = self.get_listing(&path, &query).await?;
        Ok(commits.iter().map(Commit::summary).collect())
    }

    /// Repositories visible to the credential
    pub async fn list_repositories(&self) -> Result<Vec<Repository>, DeployError> {
        let query = [("per_page", "100".to_string()), ("sort", "updated".to_string())];
        self.get_listing("/user/repos", &query).await
    }

    /// Branches of the configured repository
    pub async fn list_branches(&self) -> Result<Vec<Branch>, DeployError> {
        let path = format!("{}/branches", self.repo_path());
        self.get_listing(&path, &[("per_page", "100".to_string())]).await
    }

    /// Workflows of any repository
    pub async fn list_workflows(&self, owner: &str, repo: &str) -> Result<Vec<Workflow>, DeployError> {
        let path = format!("/repos/{}/{}/actions/workflows", owner, repo);
        let list: WorkflowList = self.get_listing(&path, &[]).await?;
        Ok(list.workflows)
    }

    /// The configured repository, used as a connection check
    pub async fn get_repository(&self) -> Result<Repository, DeployError> {
        self.get(&self.repo_path(), &[]).await
    }

    async fn get_listing<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, DeployError>
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        match self.cache.as_ref().map(|c| c.ttls().listings) {
            Some(ttl) => self.get_cached(path, query, ttl).await,
            None => self.get(path, query).await,
        }
    }
}
