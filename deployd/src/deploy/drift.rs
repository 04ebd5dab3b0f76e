//! File manifests and drift detection

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use hook_models::{DriftReport, FileDiffResponse};
use similar::TextDiff;
use tracing::debug;
use walkdir::WalkDir;

use crate::deploy::archive::{read_archive_entry, relative_name};
use crate::errors::DeployError;
use crate::models::deployment::ManifestEntry;
use crate::storage::deployments::DeploymentRepo;
use crate::storage::layout::StorageLayout;
use crate::utils::sha256_file;

/// Walk `dir` and record every regular file, sorted by path
pub fn build_manifest(dir: &Path) -> Result<Vec<ManifestEntry>, DeployError> {
    let mut entries = Vec::new();
    if !dir.is_dir() {
        return Ok(entries);
    }
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(path) = relative_name(dir, entry.path()) else {
            continue;
        };
        entries.push(ManifestEntry {
            path,
            size: entry.metadata()?.len(),
            sha256: sha256_file(entry.path())?,
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Compare a recorded manifest against the live tree
pub fn diff_tree(manifest: &[ManifestEntry], live_dir: &Path) -> Result<DriftReport, DeployError> {
    let mut live: BTreeMap<String, ManifestEntry> = build_manifest(live_dir)?
        .into_iter()
        .map(|e| (e.path.clone(), e))
        .collect();

    let mut report = DriftReport::default();
    for recorded in manifest {
        match live.remove(&recorded.path) {
            None => report.removed.push(recorded.path.clone()),
            Some(current) => {
                if current.size != recorded.size || current.sha256 != recorded.sha256 {
                    report.modified.push(recorded.path.clone());
                }
            }
        }
    }
    report.added = live.into_keys().collect();
    report.removed.sort();
    report.modified.sort();
    Ok(report)
}

/// Unified diff with three lines of context
pub fn unified_diff(old: &str, new: &str, path: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    diff.unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", path), &format!("b/{}", path))
        .to_string()
}

/// Reports divergence between a deployment's manifest and the live directory
pub struct DriftDetector {
    repo: Arc<dyn DeploymentRepo>,
    layout: StorageLayout,
    target_dir: std::path::PathBuf,
}

impl DriftDetector {
    pub fn new(
        repo: Arc<dyn DeploymentRepo>,
        layout: StorageLayout,
        target_dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            repo,
            layout,
            target_dir: target_dir.into(),
        }
    }

    async fn manifest(&self, deployment_id: u64) -> Result<Vec<ManifestEntry>, DeployError> {
        let deployment = self
            .repo
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("deployment #{}", deployment_id)))?;
        deployment.manifest.ok_or_else(|| {
            DeployError::NotFound(format!("deployment #{} has no manifest", deployment_id))
        })
    }

    /// Added, removed and modified files since the deployment
    pub async fn check(&self, deployment_id: u64) -> Result<DriftReport, DeployError> {
        let manifest = self.manifest(deployment_id).await?;
        let live_dir = self.target_dir.clone();
        let report =
            tokio::task::spawn_blocking(move || diff_tree(&manifest, &live_dir)).await??;
        debug!(
            "Drift for deployment #{}: {} added, {} removed, {} modified",
            deployment_id,
            report.added.len(),
            report.removed.len(),
            report.modified.len()
        );
        Ok(report)
    }

    /// Diff of one file between the deployed artifact and the live tree
    pub async fn file_diff(
        &self,
        deployment_id: u64,
        path: &str,
    ) -> Result<FileDiffResponse, DeployError> {
        let manifest = self.manifest(deployment_id).await?;
        if !manifest.iter().any(|e| e.path == path) {
            return Err(DeployError::NotFound(format!(
                "{} is not part of deployment #{}",
                path, deployment_id
            )));
        }

        let archive = self.layout.artifact_archive(deployment_id).path().to_path_buf();
        let live_file = self.target_dir.join(path);
        let rel = path.to_string();

        let (old, new) = tokio::task::spawn_blocking(move || {
            let old = read_archive_entry(&archive, &rel)?.unwrap_or_default();
            let new = if live_file.is_file() {
                std::fs::read(&live_file)?
            } else {
                Vec::new()
            };
            Ok::<_, DeployError>((old, new))
        })
        .await??;

        let diff = unified_diff(
            &String::from_utf8_lossy(&old),
            &String::from_utf8_lossy(&new),
            path,
        );
        Ok(FileDiffResponse {
            path: path.to_string(),
            diff,
        })
    }
}
