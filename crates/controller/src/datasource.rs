use async_trait::async_trait;
use grafop_client::GrafanaApi;
use grafop_core::crd::{Grafana, GrafanaDataSource, GrafanaDataSourceStatus, Phase, ResourceRef, DATASOURCE_FINALIZER};
use grafop_core::{ControllerConfig, Error, Result};
use grafop_kubehub::Cluster;
use grafop_pipeline::datasource_payload;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use tracing::{info, warn};

use crate::context::Context;
use crate::engine::RemoteResource;
use crate::matching::datasource_selectors;

const SUCCESS_MESSAGE: &str = "success";

fn reference(d: &GrafanaDataSource) -> ResourceRef {
    ResourceRef::new(d.namespace_or_default(), d.name_or_default())
}

/// Writes the status only when phase or message change. Conflicts are left
/// to the next reconcile.
async fn set_status<C: Cluster>(cluster: &C, ds: &GrafanaDataSource, phase: Phase, message: String) -> Result<()> {
    let status = GrafanaDataSourceStatus { phase: Some(phase), message };
    if ds.status.as_ref() == Some(&status) {
        return Ok(());
    }
    let mut updated = ds.clone();
    updated.status = Some(status);
    match cluster.update_status(&updated).await {
        Err(e) if e.is_conflict() => Ok(()),
        other => other,
    }
}

#[async_trait]
impl RemoteResource for GrafanaDataSource {
    const FINALIZER: &'static str = DATASOURCE_FINALIZER;

    fn selectors(grafana: &Grafana) -> &[LabelSelector] {
        datasource_selectors(grafana)
    }

    async fn sync<C: Cluster>(&self, _ctx: &Context<C>, api: &dyn GrafanaApi) -> Result<bool> {
        match api.get_datasource(self.remote_name()).await {
            Ok(_) => Ok(false),
            Err(e) if e.is_not_found() => {
                api.create_datasource(&datasource_payload(self)?).await?;
                info!(
                    datasource = self.display_name(),
                    remote = self.remote_name(),
                    namespace = self.namespace_or_default(),
                    "data source created"
                );
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, api: &dyn GrafanaApi) -> Result<()> {
        api.delete_datasource(self.remote_name()).await?;
        info!(datasource = self.display_name(), remote = self.remote_name(), "data source deleted");
        Ok(())
    }

    async fn synced<C: Cluster>(&self, ctx: &Context<C>, _submitted: bool) -> Result<()> {
        ctx.config.register_datasource(reference(self));
        set_status(&ctx.cluster, self, Phase::Reconciling, SUCCESS_MESSAGE.into()).await
    }

    async fn failed<C: Cluster>(&self, ctx: &Context<C>, error: &Error) {
        if let Err(e) = set_status(&ctx.cluster, self, Phase::Failing, error.to_string()).await {
            warn!(datasource = self.display_name(), error = %e, "cannot record failing status");
        }
    }

    fn finalized(&self, config: &ControllerConfig) {
        config.unregister_datasource(&reference(self));
    }
}
