//! Wires the reconcilers into kube-runtime controllers.
//!
//! One controller per kind, each bounded to `settings.concurrency` parallel
//! reconciles. Reconciles of the same object never overlap. All three stop
//! when the context's shutdown token is cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use grafop_core::crd::{Grafana, GrafanaDashboard, GrafanaDataSource};
use grafop_core::{Error, Result};
use grafop_kubehub::{KubeCluster, Object};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::controller::{self, Action};
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, instrument, warn};

use crate::context::Context;
use crate::engine::{reconcile_remote, Outcome};
use crate::grafana::reconcile_grafana;

type Ctx = Arc<Context<KubeCluster>>;

impl Outcome {
    pub fn into_action(self) -> Action {
        match self {
            Outcome::Requeue(after) => Action::requeue(after),
            Outcome::Done => Action::await_change(),
        }
    }
}

fn identity<K: Object>(obj: &K) -> (String, String) {
    let meta = obj.meta();
    (meta.namespace.clone().unwrap_or_default(), meta.name.clone().unwrap_or_default())
}

/// Races a reconcile against shutdown and records its outcome.
async fn observe<F>(kind: &'static str, shutdown: CancellationToken, work: F) -> Result<Action>
where
    F: Future<Output = Result<Outcome>>,
{
    let t0 = Instant::now();
    let res = tokio::select! {
        // shutdown first: a cancelled token never lets the work start
        biased;
        _ = shutdown.cancelled() => Err(Error::Cancelled),
        res = work => res,
    };
    counter!("grafop_reconcile_total", 1u64, "kind" => kind);
    histogram!("grafop_reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "kind" => kind);
    if let Err(e) = &res {
        counter!("grafop_reconcile_errors_total", 1u64, "kind" => kind, "error" => format!("{:?}", e.kind()));
    }
    res.map(Outcome::into_action)
}

#[instrument(skip_all, fields(namespace = field::Empty, name = field::Empty))]
async fn reconcile_grafana_object(obj: Arc<Grafana>, ctx: Ctx) -> Result<Action> {
    let (namespace, name) = identity(obj.as_ref());
    tracing::Span::current().record("namespace", namespace.as_str()).record("name", name.as_str());
    observe("grafana", ctx.shutdown.clone(), reconcile_grafana(&ctx, &namespace, &name)).await
}

#[instrument(skip_all, fields(namespace = field::Empty, name = field::Empty))]
async fn reconcile_dashboard_object(obj: Arc<GrafanaDashboard>, ctx: Ctx) -> Result<Action> {
    let (namespace, name) = identity(obj.as_ref());
    tracing::Span::current().record("namespace", namespace.as_str()).record("name", name.as_str());
    observe("dashboard", ctx.shutdown.clone(), reconcile_remote::<GrafanaDashboard, _>(&ctx, &namespace, &name)).await
}

#[instrument(skip_all, fields(namespace = field::Empty, name = field::Empty))]
async fn reconcile_datasource_object(obj: Arc<GrafanaDataSource>, ctx: Ctx) -> Result<Action> {
    let (namespace, name) = identity(obj.as_ref());
    tracing::Span::current().record("namespace", namespace.as_str()).record("name", name.as_str());
    observe("datasource", ctx.shutdown.clone(), reconcile_remote::<GrafanaDataSource, _>(&ctx, &namespace, &name)).await
}

fn error_policy<K: Object>(obj: Arc<K>, error: &Error, ctx: Ctx) -> Action {
    let (namespace, name) = identity(obj.as_ref());
    if !matches!(error, Error::Cancelled) {
        warn!(kind = %K::kind(&()), namespace, name, error = %error, "reconcile failed, requeueing");
    }
    Action::requeue(ctx.settings.requeue_after)
}

fn api<K: Object>(client: &Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Runs all controllers until the shutdown token is cancelled.
pub async fn run(ctx: Ctx) {
    let client = ctx.cluster.client().clone();
    let ns = ctx.settings.namespace.clone();
    let ns = ns.as_deref();
    let config = controller::Config::default().concurrency(ctx.settings.concurrency);
    let wc = watcher::Config::default;

    info!(namespace = ns.unwrap_or("*"), concurrency = ctx.settings.concurrency, "starting controllers");

    let grafanas = Controller::new(api::<Grafana>(&client, ns), wc())
        .owns(api::<Deployment>(&client, ns), wc())
        .owns(api::<ConfigMap>(&client, ns), wc())
        .owns(api::<Secret>(&client, ns), wc())
        .owns(api::<Service>(&client, ns), wc())
        .owns(api::<Ingress>(&client, ns), wc())
        .with_config(config.clone())
        .graceful_shutdown_on(ctx.shutdown.clone().cancelled_owned())
        .run(reconcile_grafana_object, error_policy::<Grafana>, ctx.clone())
        .for_each(|res| async move {
            if let Ok((obj, _)) = res {
                debug!(grafana = %obj.name, "reconciled");
            }
        });

    let dashboards = Controller::new(api::<GrafanaDashboard>(&client, ns), wc())
        .with_config(config.clone())
        .graceful_shutdown_on(ctx.shutdown.clone().cancelled_owned())
        .run(reconcile_dashboard_object, error_policy::<GrafanaDashboard>, ctx.clone())
        .for_each(|res| async move {
            if let Ok((obj, _)) = res {
                debug!(dashboard = %obj.name, "reconciled");
            }
        });

    let datasources = Controller::new(api::<GrafanaDataSource>(&client, ns), wc())
        .with_config(config)
        .graceful_shutdown_on(ctx.shutdown.clone().cancelled_owned())
        .run(reconcile_datasource_object, error_policy::<GrafanaDataSource>, ctx.clone())
        .for_each(|res| async move {
            if let Ok((obj, _)) = res {
                debug!(datasource = %obj.name, "reconciled");
            }
        });

    tokio::join!(grafanas, dashboards, datasources);
    info!("controllers stopped");
}
