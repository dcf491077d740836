//! Converges the children of one Grafana and reports the result on its status.

use chrono::{SecondsFormat, Utc};
use grafop_apply::{plan, ActionRunner, BuildInputs, RunReport};
use grafop_core::crd::{Grafana, GrafanaStatus, Phase};
use grafop_core::Result;
use grafop_kubehub::{Cluster, ClusterState, EventNote};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::engine::Outcome;

const SUCCESS_MESSAGE: &str = "success";

async fn converge<C: Cluster>(ctx: &Context<C>, grafana: &Grafana) -> Result<RunReport> {
    let routes_available = ctx.config.routes_available();
    let state = ClusterState::read(&ctx.cluster, grafana, routes_available).await?;
    let inputs = BuildInputs {
        images: ctx.config.images(),
        plugins: ctx.config.plugins_for_namespace(grafana.namespace_or_default()),
        routes_available,
    };
    let actions = plan(grafana, &state, &inputs);
    let runner = ActionRunner::new(&ctx.cluster, grafana)?;
    runner.run(actions).await.map_err(|failure| failure.error)
}

/// Writes the status unless nothing but the timestamp would change, so a
/// steady state does not trigger its own watch events.
async fn write_status<C: Cluster>(ctx: &Context<C>, grafana: &Grafana, mut status: GrafanaStatus) -> Result<()> {
    if let Some(current) = grafana.status.as_ref() {
        status.last_reconciled = current.last_reconciled.clone();
        if *current == status {
            return Ok(());
        }
    }
    status.last_reconciled = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    let mut updated = grafana.clone();
    updated.status = Some(status);
    match ctx.cluster.update_status(&updated).await {
        Err(e) if e.is_conflict() => {
            debug!("status conflict, leaving it to the next reconcile");
            Ok(())
        }
        other => other,
    }
}

pub async fn reconcile_grafana<C: Cluster>(ctx: &Context<C>, namespace: &str, name: &str) -> Result<Outcome> {
    let Some(grafana) = ctx.cluster.get::<Grafana>(namespace, name).await? else {
        debug!(namespace, name, "grafana gone, nothing to do");
        return Ok(Outcome::Done);
    };
    if grafana.metadata.deletion_timestamp.is_some() {
        // children go with their owner
        return Ok(Outcome::Done);
    }

    match converge(ctx, &grafana).await {
        Ok(report) => {
            if report.applied > 0 {
                info!(namespace, name, applied = report.applied, conflicts = report.conflicts, "grafana converged");
            }
            let status = GrafanaStatus {
                phase: Some(Phase::Reconciling),
                message: SUCCESS_MESSAGE.into(),
                installed_dashboards: ctx.config.dashboards(namespace),
                installed_datasources: ctx.config.datasources(namespace),
                last_reconciled: None,
            };
            write_status(ctx, &grafana, status).await?;
            Ok(Outcome::Requeue(ctx.settings.requeue_after))
        }
        Err(error) => {
            warn!(namespace, name, error = %error, "grafana reconcile failed");
            if let Err(e) = ctx.cluster.record_event(&grafana, EventNote::warning("ProcessingError", error.to_string())).await {
                warn!(error = %e, "cannot record event");
            }
            let status = GrafanaStatus {
                phase: Some(Phase::Failing),
                message: error.to_string(),
                ..grafana.status.clone().unwrap_or_default()
            };
            if let Err(e) = write_status(ctx, &grafana, status).await {
                warn!(error = %e, "cannot record failing status");
            }
            Err(error)
        }
    }
}
