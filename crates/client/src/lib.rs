//! Typed client for the Grafana HTTP API.
//!
//! Every call authenticates with basic auth, sends and accepts JSON and maps
//! the response status uniformly: 200 is success, 404 is [`ClientError::NotFound`],
//! 409 is [`ClientError::Conflict`] and anything else is [`ClientError::Status`].
//! Transport failures are returned as they come from `reqwest`.

#![forbid(unsafe_code)]

mod error;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

pub use error::ClientError;
pub use types::{folder_title, Endpoint, Folder, RemoteObject, NON_NAMESPACED_FOLDER};

use types::{DashboardRequest, FolderRequest};

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

const USER_AGENT: &str = "grafana-operator";

#[async_trait]
pub trait GrafanaApi: Send + Sync {
    async fn health(&self) -> Result<()>;
    async fn search_dashboards(&self, name: &str) -> Result<Vec<RemoteObject>>;
    /// Submits with `overwrite: true`; the uid inside `dashboard` is authoritative.
    async fn create_or_update_dashboard(&self, dashboard: &[u8], folder_id: i64) -> Result<RemoteObject>;
    async fn delete_dashboard(&self, uid: &str) -> Result<RemoteObject>;
    async fn get_or_create_folder(&self, namespace: &str) -> Result<Folder>;
    async fn get_datasource(&self, name: &str) -> Result<RemoteObject>;
    async fn create_datasource(&self, datasource: &[u8]) -> Result<RemoteObject>;
    async fn delete_datasource(&self, name: &str) -> Result<RemoteObject>;
}

/// Builds API clients for resolved endpoints.
pub trait ClientFactory: Send + Sync {
    fn build(&self, endpoint: &Endpoint) -> Result<Arc<dyn GrafanaApi>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn build(&self, endpoint: &Endpoint) -> Result<Arc<dyn GrafanaApi>> {
        Ok(Arc::new(GrafanaClient::new(endpoint)?))
    }
}

#[derive(Debug, Clone)]
pub struct GrafanaClient {
    base: Url,
    user: String,
    password: String,
    http: reqwest::Client,
}

impl GrafanaClient {
    /// Client for one Grafana instance.
    ///
    /// Certificate verification is disabled: Grafana is addressed through
    /// cluster-internal names or self-signed routes, and the operator trusts
    /// the network path to the instance it deploys. Idle connections are not
    /// pooled so rotated credentials or endpoints never reuse a stale
    /// connection. Every request is bounded by `endpoint.timeout`.
    pub fn new(endpoint: &Endpoint) -> Result<Self> {
        let base = Url::parse(&endpoint.url)?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Url(endpoint.url.clone()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(0)
            .timeout(endpoint.timeout)
            .build()?;
        Ok(Self { base, user: endpoint.user.clone(), password: endpoint.password.clone(), http })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Url(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Option<Vec<u8>>, context: &'static str) -> Result<Vec<u8>> {
        debug!(%method, path = url.path(), "grafana request");
        let mut req = self.http.request(method, url).basic_auth(&self.user, Some(&self.password));
        if let Some(body) = body {
            req = req.body(body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        counter!("grafop_remote_requests_total", 1u64, "op" => context, "code" => status.as_u16().to_string());
        match status {
            StatusCode::OK => Ok(resp.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(ClientError::NotFound),
            StatusCode::CONFLICT => Err(ClientError::Conflict),
            other => {
                warn!(status = other.as_u16(), context, "unexpected grafana response");
                Err(ClientError::Status { status: other.as_u16(), context })
            }
        }
    }

    async fn send_json<T>(&self, method: Method, url: Url, body: Option<Vec<u8>>, context: &'static str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let bytes = self.send(method, url, body, context).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        serde_json::from_slice(&bytes).map_err(|source| ClientError::Json { context, source })
    }

    async fn list_folders(&self) -> Result<Vec<Folder>> {
        let url = self.endpoint(&["api", "folders"])?;
        self.send_json(Method::GET, url, None, "error listing folders").await
    }
}

#[async_trait]
impl GrafanaApi for GrafanaClient {
    async fn health(&self) -> Result<()> {
        let url = self.endpoint(&["api", "health"])?;
        self.send(Method::GET, url, None, "error getting grafana health").await.map(|_| ())
    }

    async fn search_dashboards(&self, name: &str) -> Result<Vec<RemoteObject>> {
        let mut url = self.endpoint(&["api", "search"])?;
        url.query_pairs_mut().append_pair("query", name);
        self.send_json(Method::GET, url, None, "error searching dashboards").await
    }

    async fn create_or_update_dashboard(&self, dashboard: &[u8], folder_id: i64) -> Result<RemoteObject> {
        const CONTEXT: &str = "error creating dashboard";
        let dashboard: serde_json::Value =
            serde_json::from_slice(dashboard).map_err(|source| ClientError::Json { context: CONTEXT, source })?;
        let body = serde_json::to_vec(&DashboardRequest { dashboard: &dashboard, folder_id, overwrite: true })
            .map_err(|source| ClientError::Json { context: CONTEXT, source })?;
        let url = self.endpoint(&["api", "dashboards", "db"])?;
        self.send_json(Method::POST, url, Some(body), CONTEXT).await
    }

    async fn delete_dashboard(&self, uid: &str) -> Result<RemoteObject> {
        let url = self.endpoint(&["api", "dashboards", "uid", uid])?;
        self.send_json(Method::DELETE, url, None, "error deleting dashboard").await
    }

    async fn get_or_create_folder(&self, namespace: &str) -> Result<Folder> {
        const CONTEXT: &str = "error creating folder";
        let title = folder_title(namespace);
        if let Some(existing) = self.list_folders().await?.into_iter().find(|f| f.title == title) {
            return Ok(existing);
        }
        let body = serde_json::to_vec(&FolderRequest { title })
            .map_err(|source| ClientError::Json { context: CONTEXT, source })?;
        let url = self.endpoint(&["api", "folders"])?;
        self.send_json(Method::POST, url, Some(body), CONTEXT).await
    }

    async fn get_datasource(&self, name: &str) -> Result<RemoteObject> {
        let url = self.endpoint(&["api", "datasources", "name", name])?;
        self.send_json(Method::GET, url, None, "error getting datasource").await
    }

    async fn create_datasource(&self, datasource: &[u8]) -> Result<RemoteObject> {
        let url = self.endpoint(&["api", "datasources"])?;
        self.send_json(Method::POST, url, Some(datasource.to_vec()), "error creating datasource").await
    }

    async fn delete_datasource(&self, name: &str) -> Result<RemoteObject> {
        let url = self.endpoint(&["api", "datasources", "name", name])?;
        self.send_json(Method::DELETE, url, None, "error deleting datasource").await
    }
}
