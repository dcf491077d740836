//! Which Grafana instances a dashboard or data source belongs to.

use std::collections::BTreeMap;

use grafop_core::crd::Grafana;
use grafop_core::{selector, Result};
use grafop_kubehub::Cluster;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use tracing::debug;

/// Grafanas in `namespace` whose `selectors` match `labels`, whose namespace
/// selector (if any) matches the namespace labels, and whose deployment is
/// fully rolled out. A malformed selector fails the whole match.
pub async fn matching_instances<C: Cluster>(
    cluster: &C,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    selectors: fn(&Grafana) -> &[LabelSelector],
) -> Result<Vec<Grafana>> {
    let mut namespace_labels: Option<BTreeMap<String, String>> = None;
    let mut out = Vec::new();

    for grafana in cluster.list::<Grafana>(namespace).await? {
        let name = grafana.metadata.name.clone().unwrap_or_default();
        if !selector::matches_any(labels, selectors(&grafana))? {
            continue;
        }

        if let Some(ns_selector) = grafana.spec.dashboard_namespace_selector.as_ref() {
            if !selector::is_empty(ns_selector) {
                if namespace_labels.is_none() {
                    namespace_labels = Some(cluster.namespace_labels(namespace).await?);
                }
                let empty = BTreeMap::new();
                if !selector::matches(namespace_labels.as_ref().unwrap_or(&empty), ns_selector)? {
                    debug!(grafana = %name, namespace, "namespace labels do not match");
                    continue;
                }
            }
        }

        let Some(deployment) = cluster.get::<Deployment>(namespace, &grafana.deployment_name()).await? else {
            debug!(grafana = %name, "grafana deployment missing");
            continue;
        };
        let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = deployment.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
        if ready != desired {
            debug!(grafana = %name, ready, desired, "grafana deployment not ready");
            continue;
        }
        out.push(grafana);
    }
    Ok(out)
}

pub fn dashboard_selectors(grafana: &Grafana) -> &[LabelSelector] {
    &grafana.spec.dashboard_label_selector
}

/// Falls back to the dashboard selectors when no data-source selector is
/// declared.
pub fn datasource_selectors(grafana: &Grafana) -> &[LabelSelector] {
    if grafana.spec.datasource_label_selector.is_empty() {
        &grafana.spec.dashboard_label_selector
    } else {
        &grafana.spec.datasource_label_selector
    }
}
