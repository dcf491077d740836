use async_trait::async_trait;
use grafop_client::GrafanaApi;
use grafop_core::crd::{Grafana, GrafanaDashboard, ResourceRef, DASHBOARD_FINALIZER};
use grafop_core::{ControllerConfig, Error, Result};
use grafop_kubehub::{Cluster, EventNote};
use grafop_pipeline::DashboardPipeline;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use tracing::{info, warn};

use crate::context::Context;
use crate::engine::RemoteResource;
use crate::matching::dashboard_selectors;

fn reference(d: &GrafanaDashboard) -> ResourceRef {
    ResourceRef::new(d.namespace_or_default(), d.name_or_default())
}

#[async_trait]
impl RemoteResource for GrafanaDashboard {
    const FINALIZER: &'static str = DASHBOARD_FINALIZER;

    fn selectors(grafana: &Grafana) -> &[LabelSelector] {
        dashboard_selectors(grafana)
    }

    /// Dashboards already present under the same title are left alone.
    async fn sync<C: Cluster>(&self, ctx: &Context<C>, api: &dyn GrafanaApi) -> Result<bool> {
        let title = self.title();
        let existing = match api.search_dashboards(&title).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if !existing.is_empty() {
            return Ok(false);
        }

        let pipeline = DashboardPipeline::new(
            &ctx.cluster,
            ctx.fetcher.as_ref(),
            ctx.templates.as_ref(),
            ctx.config.jsonnet_location(),
        );
        let resolved = pipeline.process(self).await?;
        let folder = api.get_or_create_folder(self.namespace_or_default()).await?;
        api.create_or_update_dashboard(&resolved.payload, folder.id).await?;
        info!(dashboard = %self.key(), uid = %resolved.uid, folder = folder.id, "dashboard submitted");
        Ok(true)
    }

    async fn remove(&self, api: &dyn GrafanaApi) -> Result<()> {
        let title = self.title();
        let found = match api.search_dashboards(&title).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if found.len() > 1 {
            info!(dashboard = %self.key(), matches = found.len(), "several dashboards share this title, deleting the first");
        }
        let uid = found.first().and_then(|d| d.uid.clone()).unwrap_or_else(|| self.uid());
        api.delete_dashboard(&uid).await?;
        info!(dashboard = %self.key(), %uid, "dashboard deleted");
        Ok(())
    }

    async fn synced<C: Cluster>(&self, ctx: &Context<C>, submitted: bool) -> Result<()> {
        ctx.config.set_plugins(&self.key(), self.spec.plugins.clone());
        ctx.config.register_dashboard(reference(self));
        if submitted {
            let note = format!("dashboard {} successfully submitted", self.key());
            if let Err(e) = ctx.cluster.record_event(self, EventNote::normal("Success", note)).await {
                warn!(error = %e, "cannot record event");
            }
        }
        Ok(())
    }

    async fn failed<C: Cluster>(&self, _ctx: &Context<C>, _error: &Error) {}

    fn finalized(&self, config: &ControllerConfig) {
        config.remove_plugins(&self.key());
        config.unregister_dashboard(&reference(self));
    }
}
