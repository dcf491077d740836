use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Title of the folder used for dashboards without a namespace.
pub const NON_NAMESPACED_FOLDER: &str = "Non-Namespaced";

/// A dashboard or data source as reported by Grafana. Only identity and
/// existence matter to the operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Folder {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Folder title for a namespace.
pub fn folder_title(namespace: &str) -> &str {
    if namespace.is_empty() {
        NON_NAMESPACED_FOLDER
    } else {
        namespace
    }
}

/// Where and as whom to reach one Grafana instance.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DashboardRequest<'a> {
    pub dashboard: &'a serde_json::Value,
    pub folder_id: i64,
    pub overwrite: bool,
}

#[derive(Serialize)]
pub(crate) struct FolderRequest<'a> {
    pub title: &'a str,
}
