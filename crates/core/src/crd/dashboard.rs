use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub const DASHBOARD_FINALIZER: &str = "finalizer.grafanadashboards.monitor.kun";

/// A dashboard to be installed into every matching Grafana.
///
/// Exactly one content source is expected; when several are set they are
/// tried in the order url, configMapRef, json, jsonnet.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "monitor.kun", version = "v1alpha1", kind = "GrafanaDashboard", namespaced)]
#[kube(shortname = "gdash")]
#[serde(rename_all = "camelCase")]
pub struct GrafanaDashboardSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub json: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jsonnet: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<ConfigMapRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasources: Vec<DatasourceInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<GrafanaPlugin>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ConfigMapRef {
    pub name: String,
    pub key: String,
}

/// Replaces `${inputName}` in the dashboard text with `datasourceName`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceInput {
    #[serde(default)]
    pub input_name: String,
    #[serde(default)]
    pub datasource_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
pub struct GrafanaPlugin {
    pub name: String,
    pub version: String,
}

impl std::fmt::Display for GrafanaPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

impl GrafanaDashboard {
    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn name_or_default(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// `namespace/name`, the key under which plugins and registrations are cached.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace_or_default(), self.name_or_default())
    }

    /// Digest of the content-defining fields. Labels, plugins and input
    /// substitutions do not contribute.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.spec.json.as_bytes());
        hasher.update(self.spec.url.as_bytes());
        hasher.update(self.spec.jsonnet.as_bytes());
        hasher.update(self.namespace_or_default().as_bytes());
        if let Some(cm) = &self.spec.config_map_ref {
            hasher.update(cm.name.as_bytes());
            hasher.update(cm.key.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Inline JSON parsed as an object, if present and well-formed.
    pub fn inline_json(&self) -> Option<Map<String, Value>> {
        if self.spec.json.trim().is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(&self.spec.json) {
            Ok(Value::Object(m)) => Some(m),
            _ => None,
        }
    }

    /// Remote key for this dashboard given its resolved content.
    ///
    /// A non-empty string `uid` in the content wins; otherwise the SHA-1 of
    /// namespace and name, which stays within the 40 characters Grafana accepts.
    pub fn uid_for(&self, content: Option<&Map<String, Value>>) -> String {
        if let Some(Value::String(uid)) = content.and_then(|c| c.get("uid")) {
            if !uid.is_empty() {
                return uid.clone();
            }
        }
        let mut hasher = Sha1::new();
        hasher.update(self.namespace_or_default().as_bytes());
        hasher.update(self.name_or_default().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn uid(&self) -> String {
        self.uid_for(self.inline_json().as_ref())
    }

    /// Name used to search for the dashboard on the remote side.
    pub fn title(&self) -> String {
        if let Some(Value::String(t)) = self.inline_json().as_ref().and_then(|c| c.get("title")) {
            if !t.is_empty() {
                return t.clone();
            }
        }
        if !self.spec.name.is_empty() {
            return self.spec.name.clone();
        }
        self.name_or_default().to_string()
    }

    /// Rejects spec changes that would move the dashboard to a different remote identity.
    pub fn validate_update(old: &GrafanaDashboard, new: &GrafanaDashboard) -> Result<()> {
        if old.hash() != new.hash() {
            return Err(Error::validation(format!(
                "dashboard {}: content fields are immutable once created",
                new.key()
            )));
        }
        Ok(())
    }
}
