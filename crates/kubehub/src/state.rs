//! Point-in-time view of the objects a Grafana owns. Built fresh on every
//! reconcile and never cached.

use grafop_client::Endpoint;
use grafop_core::crd::{Grafana, Route, ADMIN_PASSWORD_KEY, ADMIN_USER_KEY};
use grafop_core::{Error, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use tracing::debug;

use crate::cluster::Cluster;

#[derive(Debug, Clone, Default)]
pub struct ClusterState {
    pub deployment: Option<Deployment>,
    pub config: Option<ConfigMap>,
    pub admin_secret: Option<Secret>,
    pub service: Option<Service>,
    pub ingress: Option<Ingress>,
    pub route: Option<Route>,
}

impl ClusterState {
    /// Reads every child of `grafana`. The route is only looked up when the
    /// route API is served.
    pub async fn read<C: Cluster>(cluster: &C, grafana: &Grafana, routes_available: bool) -> Result<Self> {
        let ns = grafana.namespace_or_default();
        let route = if routes_available { cluster.get::<Route>(ns, &grafana.route_name()).await? } else { None };
        let state = Self {
            deployment: cluster.get(ns, &grafana.deployment_name()).await?,
            config: cluster.get(ns, &grafana.config_name()).await?,
            admin_secret: cluster.get(ns, &grafana.admin_secret_name()).await?,
            service: cluster.get(ns, &grafana.service_name()).await?,
            ingress: cluster.get(ns, &grafana.ingress_name()).await?,
            route,
        };
        debug!(
            grafana = %grafana.metadata.name.as_deref().unwrap_or_default(),
            deployment = state.deployment.is_some(),
            config = state.config.is_some(),
            secret = state.admin_secret.is_some(),
            service = state.service.is_some(),
            ingress = state.ingress.is_some(),
            route = state.route.is_some(),
            "cluster state read"
        );
        Ok(state)
    }

    /// True when the deployment exists and all desired replicas are ready.
    pub fn deployment_ready(&self) -> bool {
        let Some(d) = &self.deployment else { return false };
        let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
        ready == desired
    }

    fn secret_value(&self, key: &str) -> Option<String> {
        let secret = self.admin_secret.as_ref()?;
        let raw = secret.data.as_ref().and_then(|d| d.get(key)).map(|b| b.0.clone());
        raw.and_then(|b| String::from_utf8(b).ok()).filter(|s| !s.is_empty())
    }

    /// Admin user and password stored in the admin secret.
    pub fn admin_credentials(&self) -> Result<(String, String)> {
        if self.admin_secret.is_none() {
            return Err(Error::fatal("admin credentials secret not found"));
        }
        let user = self.secret_value(ADMIN_USER_KEY).ok_or_else(|| Error::fatal("invalid credentials (username)"))?;
        let password =
            self.secret_value(ADMIN_PASSWORD_KEY).ok_or_else(|| Error::fatal("invalid credentials (password)"))?;
        Ok((user, password))
    }

    /// Base URL for the admin API, first match wins: route, ingress
    /// hostname from the spec, ingress load-balancer hostname or IP, service
    /// cluster IP, service DNS name. Route and ingress are skipped with
    /// `preferService`.
    pub fn admin_url(&self, grafana: &Grafana) -> Result<String> {
        let prefer_service = grafana.prefer_service();

        if !prefer_service {
            if let Some(host) = self.route.as_ref().and_then(|r| r.spec.host.as_deref()).filter(|h| !h.is_empty()) {
                return Ok(format!("https://{}", host));
            }
            if let Some(ingress) = &self.ingress {
                if let Some(host) = grafana.spec.ingress.as_ref().map(|i| i.hostname.as_str()).filter(|h| !h.is_empty()) {
                    return Ok(format!("https://{}", host));
                }
                let first_lb = ingress
                    .status
                    .as_ref()
                    .and_then(|s| s.load_balancer.as_ref())
                    .and_then(|lb| lb.ingress.as_ref())
                    .and_then(|entries| entries.first());
                if let Some(entry) = first_lb {
                    match (entry.hostname.as_deref(), entry.ip.as_deref()) {
                        (Some(h), _) if !h.is_empty() => return Ok(format!("https://{}", h)),
                        (_, Some(ip)) if !ip.is_empty() => return Ok(format!("https://{}", ip)),
                        _ => {}
                    }
                }
            }
        }

        if let Some(svc) = &self.service {
            let port = grafana.port();
            let cluster_ip = svc.spec.as_ref().and_then(|s| s.cluster_ip.as_deref());
            if let Some(ip) = cluster_ip.filter(|ip| !ip.is_empty() && *ip != "None") {
                return Ok(format!("http://{}:{}", ip, port));
            }
            let name = svc.metadata.name.clone().unwrap_or_else(|| grafana.service_name());
            return Ok(format!("http://{}.{}.svc:{}", name, grafana.namespace_or_default(), port));
        }

        Err(Error::fatal("no admin URL resolvable"))
    }

    pub fn admin_endpoint(&self, grafana: &Grafana) -> Result<Endpoint> {
        let (user, password) = self.admin_credentials()?;
        let url = self.admin_url(grafana)?;
        Ok(Endpoint { url, user, password, timeout: grafana.client_timeout() })
    }
}
