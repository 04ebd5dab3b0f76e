//! HTTP client for the CI / source hosting API
//!
//! A stateless request/response wrapper. Every call returns either a typed
//! payload or a structured failure; nothing here retries or interprets
//! business meaning beyond the HTTP status.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::cache::response::ResponseCache;
use crate::errors::DeployError;
use crate::utils::user_agent;

/// CI client options
#[derive(Debug, Clone)]
pub struct CiClientOptions {
    /// API root, e.g. `https://api.github.com`
    pub base_url: String,

    /// Bearer credential
    pub token: SecretString,

    /// Repository owner
    pub owner: String,

    /// Repository name
    pub repo: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl CiClientOptions {
    pub fn new(base_url: &str, token: SecretString, owner: &str, repo: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            token,
            owner: owner.to_string(),
            repo: repo.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for CI communication
pub struct CiClient {
    client: Client,
    no_redirect: Client,
    base_url: String,
    token: SecretString,
    owner: String,
    repo: String,
    pub(crate) cache: Option<Arc<ResponseCache>>,
}

impl CiClient {
    /// Create a new CI client
    pub fn new(
        options: CiClientOptions,
        cache: Option<Arc<ResponseCache>>,
    ) -> Result<Self, DeployError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static("2022-11-28"),
        );

        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(user_agent())
            .default_headers(headers.clone())
            .build()?;

        // Artifact downloads answer with a redirect to blob storage, which must
        // be observed rather than followed with our credential attached
        let no_redirect = Client::builder()
            .timeout(options.timeout)
            .user_agent(user_agent())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            no_redirect,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            token: options.token,
            owner: options.owner,
            repo: options.repo,
            cache,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// `/repos/{owner}/{repo}` prefix
    pub fn repo_path(&self) -> String {
        format!("/repos/{}/{}", self.owner, self.repo)
    }

    pub(crate) fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, DeployError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| DeployError::ConfigError(format!("invalid API url: {}", e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(self.token.expose_secret())
    }

    /// Authenticated GET with redirects disabled
    pub(crate) async fn get_unfollowed(&self, path: &str) -> Result<Response, DeployError> {
        let url = self.url(path, &[])?;
        debug!("GET {} (no redirect)", url);
        Ok(self.authorized(self.no_redirect.get(url)).send().await?)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DeployError> {
        let url = self.url(path, query)?;
        debug!("GET {}", url);

        let response = self.authorized(self.client.get(url)).send().await?;
        let response = check_status(response, "GET").await?;
        Ok(response.json().await?)
    }

    /// GET through the response cache
    pub async fn get_cached<T: DeserializeOwned + Serialize>(
        &self,
        path: &str,
        query: &[(&str, String)],
        ttl: Duration,
    ) -> Result<T, DeployError> {
        let Some(cache) = &self.cache else {
            return self.get(path, query).await;
        };

        let key = ResponseCache::key(path, query);
        if let Some(hit) = cache.get::<T>(&key).await {
            return Ok(hit);
        }

        let value: T = self.get(path, query).await?;
        cache.insert(&key, &value, ttl).await;
        Ok(value)
    }

    /// Make a POST request with a JSON body, discarding the response body
    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<(), DeployError> {
        let url = self.url(path, &[])?;
        debug!("POST {}", url);

        let response = self.authorized(self.client.post(url)).json(body).send().await?;
        check_status(response, "POST").await?;
        Ok(())
    }
}

/// Map a non-success response into a structured API error
async fn check_status(response: Response, method: &str) -> Result<Response, DeployError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ci_models::ErrorResponse>(&body)
        .map(|e| e.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or(body);
    error!("HTTP {} failed: {} - {}", method, status, message);

    Err(DeployError::ApiError {
        status: status.as_u16(),
        message,
    })
}
