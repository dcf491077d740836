//! Process-wide configuration cache shared by all controllers.
//!
//! Values here only influence image references and plugin lists, so readers
//! may observe a slightly stale view. Every access goes through one mutex.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use crate::crd::{GrafanaPlugin, ResourceRef};

pub const DEFAULT_GRAFANA_IMAGE: &str = "grafana/grafana";
pub const DEFAULT_GRAFANA_TAG: &str = "7.1.1";
pub const DEFAULT_PLUGINS_INIT_IMAGE: &str = "quay.io/integreatly/grafana_plugins_init";
pub const DEFAULT_PLUGINS_INIT_TAG: &str = "0.0.3";
pub const DEFAULT_JSONNET_LOCATION: &str = "/opt/jsonnet";

pub const SECRETS_MOUNT_DIR: &str = "/etc/grafana-secrets/";
pub const CONFIGMAPS_MOUNT_DIR: &str = "/etc/grafana-configmaps/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Images {
    pub grafana_image: String,
    pub grafana_tag: String,
    pub plugins_init_image: String,
    pub plugins_init_tag: String,
}

impl Default for Images {
    fn default() -> Self {
        Self {
            grafana_image: DEFAULT_GRAFANA_IMAGE.into(),
            grafana_tag: DEFAULT_GRAFANA_TAG.into(),
            plugins_init_image: DEFAULT_PLUGINS_INIT_IMAGE.into(),
            plugins_init_tag: DEFAULT_PLUGINS_INIT_TAG.into(),
        }
    }
}

impl Images {
    pub fn grafana(&self) -> String {
        format!("{}:{}", self.grafana_image, self.grafana_tag)
    }

    pub fn plugins_init(&self) -> String {
        format!("{}:{}", self.plugins_init_image, self.plugins_init_tag)
    }
}

#[derive(Debug, Default)]
struct Inner {
    images: Images,
    jsonnet_location: String,
    routes_available: bool,
    // keyed by namespace/name of the dashboard
    plugins: BTreeMap<String, Vec<GrafanaPlugin>>,
    dashboards: BTreeSet<ResourceRef>,
    datasources: BTreeSet<ResourceRef>,
}

#[derive(Debug, Default)]
pub struct ControllerConfig {
    inner: Mutex<Inner>,
}

impl ControllerConfig {
    pub fn new(images: Images, jsonnet_location: impl Into<String>) -> Self {
        let mut jsonnet_location = jsonnet_location.into();
        if jsonnet_location.is_empty() {
            jsonnet_location = DEFAULT_JSONNET_LOCATION.into();
        }
        Self { inner: Mutex::new(Inner { images, jsonnet_location, ..Default::default() }) }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // the guarded data stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn images(&self) -> Images {
        self.lock().images.clone()
    }

    pub fn jsonnet_location(&self) -> String {
        self.lock().jsonnet_location.clone()
    }

    pub fn routes_available(&self) -> bool {
        self.lock().routes_available
    }

    pub fn set_routes_available(&self, available: bool) {
        self.lock().routes_available = available;
    }

    pub fn set_plugins(&self, dashboard_key: &str, plugins: Vec<GrafanaPlugin>) {
        let mut inner = self.lock();
        if plugins.is_empty() {
            inner.plugins.remove(dashboard_key);
        } else {
            inner.plugins.insert(dashboard_key.to_string(), plugins);
        }
    }

    pub fn remove_plugins(&self, dashboard_key: &str) {
        self.lock().plugins.remove(dashboard_key);
    }

    /// Comma-separated `name:version` list of plugins requested by dashboards
    /// in `namespace`, sorted and deduplicated.
    pub fn plugins_for_namespace(&self, namespace: &str) -> String {
        let prefix = format!("{}/", namespace);
        let inner = self.lock();
        let set: BTreeSet<String> = inner
            .plugins
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .flat_map(|(_, v)| v.iter().map(|p| p.to_string()))
            .collect();
        set.into_iter().collect::<Vec<_>>().join(",")
    }

    pub fn register_dashboard(&self, r: ResourceRef) {
        self.lock().dashboards.insert(r);
    }

    pub fn unregister_dashboard(&self, r: &ResourceRef) {
        self.lock().dashboards.remove(r);
    }

    pub fn dashboards(&self, namespace: &str) -> Vec<ResourceRef> {
        self.lock().dashboards.iter().filter(|r| r.namespace == namespace).cloned().collect()
    }

    pub fn register_datasource(&self, r: ResourceRef) {
        self.lock().datasources.insert(r);
    }

    pub fn unregister_datasource(&self, r: &ResourceRef) {
        self.lock().datasources.remove(r);
    }

    pub fn datasources(&self, namespace: &str) -> Vec<ResourceRef> {
        self.lock().datasources.iter().filter(|r| r.namespace == namespace).cloned().collect()
    }
}
