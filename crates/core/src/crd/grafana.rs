use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    Affinity, Container, PodSecurityContext, ResourceRequirements, SecurityContext, Toleration,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Phase, ResourceRef};

pub const DEFAULT_HTTP_PORT: i32 = 3000;
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

pub const ADMIN_USER_KEY: &str = "GF_SECURITY_ADMIN_USER";
pub const ADMIN_PASSWORD_KEY: &str = "GF_SECURITY_ADMIN_PASSWORD";
pub const DEFAULT_ADMIN_USER: &str = "admin";

const DEPLOYMENT_PREFIX: &str = "grafana-deployment";
const CONFIG_PREFIX: &str = "grafana-config";
const ADMIN_SECRET_PREFIX: &str = "grafana-admin-credentials";
const SERVICE_PREFIX: &str = "grafana-service";
const INGRESS_PREFIX: &str = "grafana-ingress";
const ROUTE_PREFIX: &str = "grafana-route";

/// Desired state of one Grafana installation.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "monitor.kun", version = "v1alpha1", kind = "Grafana", namespaced)]
#[kube(status = "GrafanaStatus", shortname = "graf")]
#[serde(rename_all = "camelCase")]
pub struct GrafanaSpec {
    #[serde(default)]
    pub config: GrafanaConfig,
    /// Extra containers appended to the Grafana pod.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
    /// Secrets mounted under /etc/grafana-secrets/<name>.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    /// Config maps mounted under /etc/grafana-configmaps/<name>.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<GrafanaIngress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<GrafanaService>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<GrafanaDeployment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<GrafanaClientConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dashboard_label_selector: Vec<LabelSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasource_label_selector: Vec<LabelSelector>,
    /// Restricts matching to dashboards/data sources whose namespace carries these labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_namespace_selector: Option<LabelSelector>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<GrafanaSecurity>,
    /// Free-form grafana.ini sections: section -> key -> value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sections: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaSecurity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaIngress {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default)]
    pub tls_enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_secret_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaDeployment {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_security_context: Option<SecurityContext>,
    #[serde(default)]
    pub termination_grace_period_seconds: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Reach Grafana through its service even when a route or ingress exists.
    #[serde(default)]
    pub prefer_service: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub installed_dashboards: Vec<ResourceRef>,
    #[serde(default)]
    pub installed_datasources: Vec<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<String>,
}

impl Grafana {
    fn child_name(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.metadata.name.as_deref().unwrap_or_default())
    }

    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn deployment_name(&self) -> String {
        self.child_name(DEPLOYMENT_PREFIX)
    }

    pub fn config_name(&self) -> String {
        self.child_name(CONFIG_PREFIX)
    }

    pub fn admin_secret_name(&self) -> String {
        self.child_name(ADMIN_SECRET_PREFIX)
    }

    pub fn service_name(&self) -> String {
        self.child_name(SERVICE_PREFIX)
    }

    pub fn ingress_name(&self) -> String {
        self.child_name(INGRESS_PREFIX)
    }

    pub fn route_name(&self) -> String {
        self.child_name(ROUTE_PREFIX)
    }

    pub fn port(&self) -> i32 {
        self.spec.service.as_ref().and_then(|s| s.port).filter(|p| *p > 0).unwrap_or(DEFAULT_HTTP_PORT)
    }

    pub fn prefer_service(&self) -> bool {
        self.spec.client.as_ref().map(|c| c.prefer_service).unwrap_or(false)
    }

    pub fn client_timeout(&self) -> Duration {
        self.spec
            .client
            .as_ref()
            .and_then(|c| c.timeout_seconds)
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CLIENT_TIMEOUT)
    }

    pub fn ingress_enabled(&self) -> bool {
        self.spec.ingress.as_ref().map(|i| i.enabled).unwrap_or(false)
    }
}
