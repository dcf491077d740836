//! Finalizer-driven reconcile loop shared by dashboards and data sources.
//!
//! A resource is `Active` once it carries its finalizer, `Deleting` once a
//! deletion timestamp is set, and finalized when the finalizer is removed
//! after every matched Grafana has dropped the remote copy. The finalizer is
//! always written before any remote mutation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grafop_client::GrafanaApi;
use grafop_core::crd::Grafana;
use grafop_core::{ControllerConfig, Error, Result};
use grafop_kubehub::{Cluster, ClusterState, EventNote, Object};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::matching::matching_instances;

/// What the runtime should do after a reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Requeue(Duration),
    /// Nothing left to do until the object changes.
    Done,
}

/// Per-kind capabilities plugged into [`reconcile_remote`].
#[async_trait]
pub trait RemoteResource: Object {
    const FINALIZER: &'static str;

    fn selectors(grafana: &Grafana) -> &[LabelSelector];

    /// Submits the resource to one Grafana unless it already exists there.
    /// Returns whether anything was submitted.
    async fn sync<C: Cluster>(&self, ctx: &Context<C>, api: &dyn GrafanaApi) -> Result<bool>;

    /// Drops the remote copy from one Grafana.
    async fn remove(&self, api: &dyn GrafanaApi) -> Result<()>;

    /// Bookkeeping after a successful sync against one Grafana.
    async fn synced<C: Cluster>(&self, ctx: &Context<C>, submitted: bool) -> Result<()>;

    /// Surfaces a failure on the resource itself.
    async fn failed<C: Cluster>(&self, ctx: &Context<C>, error: &Error);

    /// Forgets the resource once its finalizer is gone.
    fn finalized(&self, config: &ControllerConfig);
}

fn has_finalizer<K: Object>(obj: &K, finalizer: &str) -> bool {
    obj.meta().finalizers.as_ref().map(|f| f.iter().any(|x| x == finalizer)).unwrap_or(false)
}

/// API client for a matched Grafana, built from a fresh snapshot.
pub(crate) async fn connect<C: Cluster>(ctx: &Context<C>, grafana: &Grafana) -> Result<Arc<dyn GrafanaApi>> {
    let state = ClusterState::read(&ctx.cluster, grafana, ctx.config.routes_available()).await?;
    let endpoint = state.admin_endpoint(grafana)?;
    Ok(ctx.clients.build(&endpoint)?)
}

async fn report_failure<R: RemoteResource, C: Cluster>(ctx: &Context<C>, obj: &R, error: &Error) {
    counter!("grafop_remote_failures_total", 1u64, "kind" => R::kind(&()).to_string());
    if let Err(e) = ctx.cluster.record_event(obj, EventNote::warning("ProcessingError", error.to_string())).await {
        warn!(error = %e, "cannot record event");
    }
    obj.failed(ctx, error).await;
}

/// Reconciles one dashboard or data source identified by namespace and name.
pub async fn reconcile_remote<R: RemoteResource, C: Cluster>(
    ctx: &Context<C>,
    namespace: &str,
    name: &str,
) -> Result<Outcome> {
    let Some(obj) = ctx.cluster.get::<R>(namespace, name).await? else {
        debug!(namespace, name, "object gone, nothing to do");
        return Ok(Outcome::Done);
    };

    if obj.meta().deletion_timestamp.is_some() {
        if has_finalizer(&obj, R::FINALIZER) {
            cleanup(ctx, &obj).await?;
            let mut obj = obj;
            if let Some(f) = obj.meta_mut().finalizers.as_mut() {
                f.retain(|x| x != R::FINALIZER);
            }
            ctx.cluster.replace(&obj).await?;
            obj.finalized(&ctx.config);
            info!(namespace, name, "finalized");
        }
        return Ok(Outcome::Done);
    }

    let obj = if has_finalizer(&obj, R::FINALIZER) {
        obj
    } else {
        info!(namespace, name, "adding finalizer");
        let mut obj = obj;
        obj.meta_mut().finalizers.get_or_insert_with(Vec::new).push(R::FINALIZER.to_string());
        match ctx.cluster.replace(&obj).await {
            Ok(updated) => updated,
            Err(e) => {
                if !e.is_conflict() {
                    report_failure(ctx, &obj, &e).await;
                }
                return Err(e);
            }
        }
    };

    if let Err(e) = sync_all(ctx, &obj).await {
        report_failure(ctx, &obj, &e).await;
        return Err(e);
    }
    Ok(Outcome::Requeue(ctx.settings.requeue_after))
}

/// Per-instance failures are surfaced and skipped; only a failed match is
/// returned.
async fn sync_all<R: RemoteResource, C: Cluster>(ctx: &Context<C>, obj: &R) -> Result<()> {
    let meta = obj.meta();
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    let labels = meta.labels.clone().unwrap_or_default();
    for grafana in matching_instances(&ctx.cluster, namespace, &labels, R::selectors).await? {
        let instance = grafana.metadata.name.as_deref().unwrap_or_default();
        let api = match connect(ctx, &grafana).await {
            Ok(api) => api,
            Err(e) => {
                warn!(grafana = instance, error = %e, "cannot reach grafana, skipping");
                continue;
            }
        };
        match obj.sync(ctx, api.as_ref()).await {
            Ok(submitted) => {
                debug!(grafana = instance, submitted, "synced");
                if let Err(e) = obj.synced(ctx, submitted).await {
                    if !e.is_conflict() {
                        warn!(grafana = instance, error = %e, "cannot record success");
                    }
                }
            }
            Err(e) => {
                warn!(grafana = instance, error = %e, "sync failed");
                report_failure(ctx, obj, &e).await;
            }
        }
    }
    Ok(())
}

/// Removes the remote copy from every matched Grafana. A missing remote copy
/// counts as removed; any other failure keeps the finalizer.
async fn cleanup<R: RemoteResource, C: Cluster>(ctx: &Context<C>, obj: &R) -> Result<()> {
    let meta = obj.meta();
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    let labels = meta.labels.clone().unwrap_or_default();
    let mut first_error = None;
    for grafana in matching_instances(&ctx.cluster, namespace, &labels, R::selectors).await? {
        let instance = grafana.metadata.name.as_deref().unwrap_or_default();
        let api = match connect(ctx, &grafana).await {
            Ok(api) => api,
            Err(e) => {
                warn!(grafana = instance, error = %e, "cannot reach grafana during cleanup, skipping");
                continue;
            }
        };
        match obj.remove(api.as_ref()).await {
            Ok(()) => debug!(grafana = instance, "remote copy removed"),
            Err(e) if e.is_not_found() => info!(grafana = instance, "remote copy already gone"),
            Err(e) => {
                warn!(grafana = instance, error = %e, "cannot remove remote copy");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
