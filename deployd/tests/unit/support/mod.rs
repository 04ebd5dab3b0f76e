//! Shared fixtures: a local stand-in for the CI API and blob storage, and an
//! orchestrator wired against it.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path as UrlPath, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use deployd::deploy::fetcher::ArtifactFetcher;
use deployd::deploy::lock::{DeployLock, KvDeployLock};
use deployd::deploy::orchestrator::{Orchestrator, OrchestratorConfig};
use deployd::http::client::{CiClient, CiClientOptions};
use deployd::storage::deployments::{DeploymentRepo, JsonDeploymentRepo};
use deployd::storage::kv::{KeyValueStore, KvStore};
use deployd::storage::layout::StorageLayout;
use secrecy::SecretString;
use serde_json::{json, Value};
use tempfile::TempDir;

pub const OWNER: &str = "acme";
pub const REPO: &str = "site";
pub const WORKFLOW: &str = "build.yml";
pub const TOKEN: &str = "ci-token";
pub const HEAD_SHA: &str = "c0ffee0000000000000000000000000000000001";

/// Mutable behaviour and observations of the fake service
pub struct FakeState {
    pub dispatch_status: u16,
    pub dispatches: u32,
    pub runs: Vec<Value>,
    pub artifacts: Vec<Value>,
    pub artifact_zip: Vec<u8>,
    pub omit_location: bool,
    pub blob_saw_auth: bool,
    pub cancelled: Vec<u64>,
    pub head_commits: Vec<Value>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            dispatch_status: 204,
            dispatches: 0,
            runs: Vec::new(),
            artifacts: vec![json!({
                "id": 99,
                "name": "site",
                "size_in_bytes": 1024,
                "expired": false
            })],
            artifact_zip: Vec::new(),
            omit_location: false,
            blob_saw_auth: false,
            cancelled: Vec::new(),
            head_commits: vec![json!({
                "sha": HEAD_SHA,
                "commit": {
                    "message": "Release notes",
                    "author": { "name": "Lead", "date": "2026-02-01T08:00:00Z" }
                },
                "author": { "login": "lead" }
            })],
        }
    }
}

type Shared = (Arc<Mutex<FakeState>>, String);

pub struct FakeCi {
    pub base_url: String,
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeCi {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let app = Router::new()
            .route(
                "/repos/{owner}/{repo}/actions/workflows/{workflow}/dispatches",
                post(dispatch),
            )
            .route(
                "/repos/{owner}/{repo}/actions/workflows/{workflow}/runs",
                get(list_runs),
            )
            .route("/repos/{owner}/{repo}/actions/runs/{id}", get(get_run))
            .route(
                "/repos/{owner}/{repo}/actions/runs/{id}/artifacts",
                get(list_artifacts),
            )
            .route("/repos/{owner}/{repo}/actions/runs/{id}/cancel", post(cancel_run))
            .route(
                "/repos/{owner}/{repo}/actions/artifacts/{id}/zip",
                get(artifact_redirect),
            )
            .route("/repos/{owner}/{repo}/commits", get(list_commits))
            .route("/repos/{owner}/{repo}/commits/{sha}", get(get_commit))
            .route("/repos/{owner}/{repo}/branches", get(list_branches))
            .route("/user/repos", get(list_repositories))
            .route("/blob/{id}", get(blob))
            .with_state((state.clone(), base_url.clone()));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, state }
    }

    pub fn add_run(&self, id: u64, sha: &str, status: &str, conclusion: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state.runs.retain(|r| r["id"] != json!(id));
        state.runs.insert(
            0,
            json!({
                "id": id,
                "head_sha": sha,
                "head_branch": "main",
                "status": status,
                "conclusion": conclusion,
                "html_url": format!("https://ci.example/runs/{}", id)
            }),
        );
    }

    pub fn set_artifact(&self, files: &[(&str, &str)]) {
        self.state.lock().unwrap().artifact_zip = zip_bytes("", files);
    }
}

/// Zip archive with every file under `root/`, or at the top when `root` is empty
pub fn zip_bytes(root: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, contents) in files {
        let entry = if root.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", root, name)
        };
        writer.start_file(entry, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

async fn dispatch(State((state, _)): State<Shared>, _body: Bytes) -> StatusCode {
    let mut state = state.lock().unwrap();
    state.dispatches += 1;
    StatusCode::from_u16(state.dispatch_status).unwrap()
}

async fn list_runs(State((state, _)): State<Shared>) -> Json<Value> {
    let state = state.lock().unwrap();
    Json(json!({ "total_count": state.runs.len(), "workflow_runs": state.runs }))
}

async fn get_run(
    State((state, _)): State<Shared>,
    UrlPath((_, _, id)): UrlPath<(String, String, u64)>,
) -> Response {
    let state = state.lock().unwrap();
    match state.runs.iter().find(|r| r["id"] == json!(id)) {
        Some(run) => Json(run.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response(),
    }
}

async fn list_artifacts(State((state, _)): State<Shared>) -> Json<Value> {
    let state = state.lock().unwrap();
    Json(json!({ "total_count": state.artifacts.len(), "artifacts": state.artifacts }))
}

async fn cancel_run(
    State((state, _)): State<Shared>,
    UrlPath((_, _, id)): UrlPath<(String, String, u64)>,
) -> StatusCode {
    state.lock().unwrap().cancelled.push(id);
    StatusCode::ACCEPTED
}

async fn artifact_redirect(
    State((state, base_url)): State<Shared>,
    UrlPath((_, _, id)): UrlPath<(String, String, u64)>,
    headers: HeaderMap,
) -> Response {
    if headers.get(header::AUTHORIZATION).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.lock().unwrap().omit_location {
        return StatusCode::FOUND.into_response();
    }
    (
        StatusCode::FOUND,
        [(header::LOCATION, format!("{}/blob/{}", base_url, id))],
    )
        .into_response()
}

async fn blob(State((state, _)): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = state.lock().unwrap();
    if headers.get(header::AUTHORIZATION).is_some() {
        state.blob_saw_auth = true;
        return StatusCode::FORBIDDEN.into_response();
    }
    (StatusCode::OK, state.artifact_zip.clone()).into_response()
}

async fn list_branches() -> Json<Value> {
    Json(json!([
        { "name": "main", "commit": { "sha": HEAD_SHA }, "protected": true },
        { "name": "staging", "commit": { "sha": "5ca1ab1e" } }
    ]))
}

async fn list_repositories() -> Json<Value> {
    Json(json!([{
        "id": 1,
        "name": REPO,
        "full_name": format!("{}/{}", OWNER, REPO),
        "default_branch": "main",
        "owner": { "login": OWNER }
    }]))
}

async fn list_commits(State((state, _)): State<Shared>) -> Json<Value> {
    Json(Value::Array(state.lock().unwrap().head_commits.clone()))
}

async fn get_commit(UrlPath((_, _, sha)): UrlPath<(String, String, String)>) -> Json<Value> {
    Json(json!({
        "sha": sha,
        "commit": {
            "message": "Update styles",
            "author": { "name": "Dev", "email": "dev@example.com", "date": "2026-01-01T00:00:00Z" }
        },
        "author": null
    }))
}

/// Orchestrator wired to a fake CI service and temp directories
pub struct Harness {
    pub tmp: TempDir,
    pub fake: FakeCi,
    pub ci: Arc<CiClient>,
    pub repo: Arc<dyn DeploymentRepo>,
    pub store: Arc<dyn KeyValueStore>,
    pub lock: Arc<dyn DeployLock>,
    pub layout: StorageLayout,
    pub target: PathBuf,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn ci_client(base_url: &str) -> CiClient {
    CiClient::new(
        CiClientOptions::new(base_url, SecretString::from(TOKEN.to_string()), OWNER, REPO),
        None,
    )
    .unwrap()
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(configure: impl FnOnce(&mut OrchestratorConfig)) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let fake = FakeCi::start().await;
    let layout = StorageLayout::new(tmp.path().join("data"));
    layout.setup().await.unwrap();
    let target = tmp.path().join("www").join("site");

    let ci = Arc::new(ci_client(&fake.base_url));
    let fetcher = Arc::new(ArtifactFetcher::new(ci.clone(), Duration::from_secs(10)).unwrap());
    let repo: Arc<dyn DeploymentRepo> = Arc::new(JsonDeploymentRepo::in_memory());
    let store: Arc<dyn KeyValueStore> = Arc::new(KvStore::in_memory());
    let lock: Arc<dyn DeployLock> = Arc::new(KvDeployLock::new(store.clone()));

    let mut config = OrchestratorConfig {
        workflow: WORKFLOW.to_string(),
        branch: "main".to_string(),
        target_dir: target.clone(),
        create_backups: true,
        clean_install: true,
        max_backups: 10,
        build_timeout: Duration::from_secs(3600),
        lock_ttl: Duration::from_secs(300),
    };
    configure(&mut config);

    let orchestrator = Arc::new(Orchestrator::new(
        ci.clone(),
        fetcher,
        repo.clone(),
        lock.clone(),
        layout.clone(),
        config,
    ));

    Harness {
        tmp,
        fake,
        ci,
        repo,
        store,
        lock,
        layout,
        target,
        orchestrator,
    }
}

/// Write a tree of files below `root`
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (name, contents) in files {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}

pub fn read(root: &Path, name: &str) -> String {
    std::fs::read_to_string(root.join(name)).unwrap()
}
