use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Phase;
use crate::error::{Error, Result};

pub const DATASOURCE_FINALIZER: &str = "finalizer.grafanadatasources.monitor.kun";

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "monitor.kun", version = "v1alpha1", kind = "GrafanaDataSource", namespaced)]
#[kube(status = "GrafanaDataSourceStatus", shortname = "gds")]
#[serde(rename_all = "camelCase")]
pub struct GrafanaDataSourceSpec {
    /// Kubernetes-side display name used in logs and events. Grafana only
    /// ever sees `datasource.name`.
    #[serde(default)]
    pub name: String,
    pub datasource: DataSourceFields,
}

/// Data-source definition submitted verbatim to Grafana.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceFields {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub database: String,
    #[serde(default)]
    pub basic_auth: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub basic_auth_user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub basic_auth_password: String,
    #[serde(default)]
    pub with_credentials: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub editable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_json_data: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaDataSourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub message: String,
}

impl GrafanaDataSource {
    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn name_or_default(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Display name, falling back to the object name.
    pub fn display_name(&self) -> &str {
        if self.spec.name.is_empty() {
            self.name_or_default()
        } else {
            &self.spec.name
        }
    }

    /// Name of the data source on the remote side.
    pub fn remote_name(&self) -> &str {
        &self.spec.datasource.name
    }

    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        // serializing plain fields and json values cannot fail
        hasher.update(serde_json::to_vec(&self.spec.datasource).unwrap_or_default());
        hasher.update(self.namespace_or_default().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn validate_update(old: &GrafanaDataSource, new: &GrafanaDataSource) -> Result<()> {
        if old.hash() != new.hash() {
            return Err(Error::validation(format!(
                "data source {}/{}: definition is immutable once created",
                new.namespace_or_default(),
                new.name_or_default()
            )));
        }
        Ok(())
    }
}
