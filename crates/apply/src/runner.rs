//! Executes planned actions against the cluster, one at a time.

use std::time::Instant;

use grafop_core::crd::Grafana;
use grafop_core::{Error, Result};
use grafop_kubehub::{Cluster, Object};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::plan::{Child, ReconcileAction};

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub applied: usize,
    pub conflicts: usize,
}

/// A run halted by an error other than a conflict.
#[derive(Debug, thiserror::Error)]
#[error("{error} (after {applied} applied actions)")]
pub struct RunFailure {
    pub applied: usize,
    #[source]
    pub error: Error,
}

/// Applies actions in order with the Grafana as controlling owner.
pub struct ActionRunner<'a, C> {
    cluster: &'a C,
    owner: OwnerReference,
}

fn stamp(meta: &mut ObjectMeta, owner: &OwnerReference) {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.uid != owner.uid);
    refs.push(owner.clone());
}

impl<'a, C: Cluster> ActionRunner<'a, C> {
    /// Fails when the Grafana has not been persisted yet (no uid).
    pub fn new(cluster: &'a C, grafana: &Grafana) -> Result<Self> {
        let owner = grafana
            .controller_owner_ref(&())
            .ok_or_else(|| Error::validation("grafana has no uid, cannot own children"))?;
        Ok(Self { cluster, owner })
    }

    pub async fn run(&self, actions: Vec<ReconcileAction>) -> Result<RunReport, RunFailure> {
        let t0 = Instant::now();
        let mut report = RunReport::default();
        for action in actions {
            let (kind, op) = (action.kind(), action.op());
            match self.apply(action).await {
                Ok(true) => {
                    report.applied += 1;
                    counter!("grafop_actions_total", 1u64, "kind" => kind.as_str(), "op" => op);
                }
                Ok(false) => {}
                Err(e) if e.is_conflict() => {
                    warn!(kind = %kind, op, error = %e, "conflict applying child, skipping");
                    counter!("grafop_actions_total", 1u64, "kind" => kind.as_str(), "op" => "conflict");
                    report.conflicts += 1;
                }
                Err(error) => {
                    warn!(kind = %kind, op, error = %error, applied = report.applied, "halting action run");
                    return Err(RunFailure { applied: report.applied, error });
                }
            }
        }
        histogram!("grafop_actions_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(applied = report.applied, conflicts = report.conflicts, "action run finished");
        Ok(report)
    }

    /// Returns whether the cluster was written to.
    async fn apply(&self, action: ReconcileAction) -> Result<bool> {
        match action {
            ReconcileAction::Noop(_) => Ok(false),
            ReconcileAction::Create(child) => {
                info!(kind = %child.kind(), name = child.name(), "creating child");
                match child {
                    Child::ConfigMap(o) => self.create(o).await,
                    Child::Secret(o) => self.create(o).await,
                    Child::Service(o) => self.create(o).await,
                    Child::Ingress(o) => self.create(o).await,
                    Child::Route(o) => self.create(o).await,
                    Child::Deployment(o) => self.create(o).await,
                }
            }
            ReconcileAction::Update { desired, .. } => {
                info!(kind = %desired.kind(), name = desired.name(), "updating child");
                match desired {
                    Child::ConfigMap(o) => self.replace(o).await,
                    Child::Secret(o) => self.replace(o).await,
                    Child::Service(o) => self.replace(o).await,
                    Child::Ingress(o) => self.replace(o).await,
                    Child::Route(o) => self.replace(o).await,
                    Child::Deployment(o) => self.replace(o).await,
                }
            }
            ReconcileAction::Delete(child) => {
                info!(kind = %child.kind(), name = child.name(), "deleting child");
                match child {
                    Child::ConfigMap(o) => self.delete(o).await,
                    Child::Secret(o) => self.delete(o).await,
                    Child::Service(o) => self.delete(o).await,
                    Child::Ingress(o) => self.delete(o).await,
                    Child::Route(o) => self.delete(o).await,
                    Child::Deployment(o) => self.delete(o).await,
                }
            }
        }
    }

    async fn create<K: Object>(&self, mut obj: K) -> Result<bool> {
        stamp(obj.meta_mut(), &self.owner);
        self.cluster.create(&obj).await?;
        Ok(true)
    }

    async fn replace<K: Object>(&self, mut obj: K) -> Result<bool> {
        stamp(obj.meta_mut(), &self.owner);
        self.cluster.replace(&obj).await?;
        Ok(true)
    }

    async fn delete<K: Object>(&self, obj: K) -> Result<bool> {
        let meta = obj.meta();
        let (ns, name) = (meta.namespace.as_deref().unwrap_or_default(), meta.name.as_deref().unwrap_or_default());
        match self.cluster.delete::<K>(ns, name).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
