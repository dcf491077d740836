//! Desired-state planner: compares the snapshot of a Grafana's children with
//! what the builders produce and emits one action per child.

use std::fmt;

use grafop_core::crd::{Grafana, Route};
use grafop_kubehub::ClusterState;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::ObjectMeta;
use kube::Resource;
use serde::Serialize;
use tracing::debug;

use crate::drift::object_diff;
use crate::objects::{self, BuildInputs, LAST_CONFIG_ANNOTATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildKind {
    ConfigMap,
    Secret,
    Service,
    Ingress,
    Route,
    Deployment,
}

impl ChildKind {
    /// Paths the builders fully manage: a live value there that the desired
    /// object leaves out is drift, not a server default.
    pub fn owned_paths(&self) -> &'static [&'static str] {
        match self {
            ChildKind::ConfigMap | ChildKind::Secret | ChildKind::Service => &[],
            ChildKind::Ingress => &["/spec/tls", "/spec/ingressClassName", "/spec/rules/*/host"],
            ChildKind::Route => &["/spec/tls", "/spec/path", "/spec/port"],
            ChildKind::Deployment => &[
                "/spec/template/spec/nodeSelector",
                "/spec/template/spec/tolerations",
                "/spec/template/spec/affinity",
                "/spec/template/spec/securityContext",
                "/spec/template/spec/containers/*/securityContext",
                "/spec/template/spec/containers/*/env",
                "/spec/template/spec/containers/*/args",
                "/spec/template/spec/containers/*/command",
                "/spec/template/spec/containers/*/ports",
                "/spec/template/spec/containers/*/volumeMounts",
                "/spec/template/spec/containers/*/livenessProbe",
                "/spec/template/spec/containers/*/readinessProbe",
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::ConfigMap => "ConfigMap",
            ChildKind::Secret => "Secret",
            ChildKind::Service => "Service",
            ChildKind::Ingress => "Ingress",
            ChildKind::Route => "Route",
            ChildKind::Deployment => "Deployment",
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of objects a Grafana owns.
#[derive(Debug, Clone)]
pub enum Child {
    ConfigMap(ConfigMap),
    Secret(Secret),
    Service(Service),
    Ingress(Ingress),
    Route(Route),
    Deployment(Deployment),
}

impl Child {
    pub fn kind(&self) -> ChildKind {
        match self {
            Child::ConfigMap(_) => ChildKind::ConfigMap,
            Child::Secret(_) => ChildKind::Secret,
            Child::Service(_) => ChildKind::Service,
            Child::Ingress(_) => ChildKind::Ingress,
            Child::Route(_) => ChildKind::Route,
            Child::Deployment(_) => ChildKind::Deployment,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Child::ConfigMap(o) => o.meta(),
            Child::Secret(o) => o.meta(),
            Child::Service(o) => o.meta(),
            Child::Ingress(o) => o.meta(),
            Child::Route(o) => o.meta(),
            Child::Deployment(o) => o.meta(),
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub enum ReconcileAction {
    Create(Child),
    Update { current: Child, desired: Child },
    Delete(Child),
    Noop(ChildKind),
}

impl ReconcileAction {
    pub fn kind(&self) -> ChildKind {
        match self {
            ReconcileAction::Create(c) | ReconcileAction::Delete(c) => c.kind(),
            ReconcileAction::Update { desired, .. } => desired.kind(),
            ReconcileAction::Noop(k) => *k,
        }
    }

    /// Short verb used in logs and metric labels.
    pub fn op(&self) -> &'static str {
        match self {
            ReconcileAction::Create(_) => "create",
            ReconcileAction::Update { .. } => "update",
            ReconcileAction::Delete(_) => "delete",
            ReconcileAction::Noop(_) => "noop",
        }
    }
}

fn step<K: Serialize + Clone>(current: Option<&K>, desired: K, wrap: fn(K) -> Child, kind: ChildKind) -> ReconcileAction {
    match current {
        None => ReconcileAction::Create(wrap(desired)),
        Some(cur) => {
            let diff = object_diff(&desired, cur, kind.owned_paths());
            if diff.needs_update() {
                debug!(kind = %kind, adds = diff.adds, updates = diff.updates, cleared = diff.cleared, "child drifted");
                ReconcileAction::Update { current: wrap(cur.clone()), desired: wrap(desired) }
            } else {
                ReconcileAction::Noop(kind)
            }
        }
    }
}

/// Actions in apply order: config map, admin secret, service, ingress or
/// route, deployment.
pub fn plan(grafana: &Grafana, state: &ClusterState, inputs: &BuildInputs) -> Vec<ReconcileAction> {
    let mut actions = Vec::with_capacity(6);

    let config = objects::config_map(grafana, state.config.as_ref());
    let config_hash = config
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(LAST_CONFIG_ANNOTATION))
        .cloned()
        .unwrap_or_default();
    actions.push(step(state.config.as_ref(), config, Child::ConfigMap, ChildKind::ConfigMap));

    let secret = objects::admin_secret(grafana, state.admin_secret.as_ref());
    actions.push(step(state.admin_secret.as_ref(), secret, Child::Secret, ChildKind::Secret));

    let service = objects::service(grafana, state.service.as_ref());
    actions.push(step(state.service.as_ref(), service, Child::Service, ChildKind::Service));

    let want_ingress = grafana.ingress_enabled() && !inputs.routes_available;
    let want_route = grafana.ingress_enabled() && inputs.routes_available;
    match (&state.ingress, want_ingress) {
        (current, true) => {
            let desired = objects::ingress(grafana, current.as_ref());
            actions.push(step(current.as_ref(), desired, Child::Ingress, ChildKind::Ingress));
        }
        (Some(stale), false) => actions.push(ReconcileAction::Delete(Child::Ingress(stale.clone()))),
        (None, false) => {}
    }
    match (&state.route, want_route) {
        (current, true) => {
            let desired = objects::route(grafana, current.as_ref());
            actions.push(step(current.as_ref(), desired, Child::Route, ChildKind::Route));
        }
        (Some(stale), false) => actions.push(ReconcileAction::Delete(Child::Route(stale.clone()))),
        (None, false) => {}
    }

    let deployment = objects::deployment(grafana, state.deployment.as_ref(), inputs, &config_hash);
    actions.push(step(state.deployment.as_ref(), deployment, Child::Deployment, ChildKind::Deployment));

    actions
}
