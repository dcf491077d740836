use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use grafop_core::{Error, Result};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

/// Namespaced, statically typed object the operator reads or writes.
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Human-readable event attached to an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNote {
    pub kind: EventKind,
    pub reason: String,
    pub note: String,
    pub action: String,
}

impl EventNote {
    pub fn normal(reason: impl Into<String>, note: impl Into<String>) -> Self {
        Self { kind: EventKind::Normal, reason: reason.into(), note: note.into(), action: "Reconcile".into() }
    }

    pub fn warning(reason: impl Into<String>, note: impl Into<String>) -> Self {
        Self { kind: EventKind::Warning, reason: reason.into(), note: note.into(), action: "Reconcile".into() }
    }
}

/// Typed access to the orchestrator.
///
/// `replace` carries the object's resourceVersion, so a stale write fails
/// with [`Error::Conflict`]. Reads of absent objects return `None`.
#[async_trait]
pub trait Cluster: Send + Sync + 'static {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>>;
    async fn list<K: Object>(&self, namespace: &str) -> Result<Vec<K>>;
    async fn create<K: Object>(&self, obj: &K) -> Result<K>;
    async fn replace<K: Object>(&self, obj: &K) -> Result<K>;
    /// Writes only the status of `obj`.
    async fn update_status<K: Object>(&self, obj: &K) -> Result<()>;
    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()>;
    async fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>>;
    async fn record_event<K: Object>(&self, obj: &K, event: EventNote) -> Result<()>;
}

pub(crate) fn identity<K: Object>(obj: &K) -> Result<(String, String)> {
    let meta = obj.meta();
    let name = meta.name.clone().filter(|n| !n.is_empty());
    let ns = meta.namespace.clone().filter(|n| !n.is_empty());
    match (ns, name) {
        (Some(ns), Some(name)) => Ok((ns, name)),
        _ => Err(Error::validation(format!("{} is missing namespace or name", K::kind(&())))),
    }
}

fn map_kube_error(e: kube::Error, what: &str) -> Error {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound(what.to_string()),
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict(format!("{}: {}", what, ae.message)),
        kube::Error::Api(ae) => Error::Orchestrator(format!("{}: {} ({})", what, ae.message, ae.code)),
        other => Error::Network(format!("{}: {}", what, other)),
    }
}

/// [`Cluster`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    reporter: Reporter,
}

impl KubeCluster {
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter { controller: controller.to_string(), instance: std::env::var("POD_NAME").ok() };
        Self { client, reporter }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let what = format!("{} {}/{}", K::kind(&()), namespace, name);
        self.api::<K>(namespace).get_opt(name).await.map_err(|e| map_kube_error(e, &what))
    }

    async fn list<K: Object>(&self, namespace: &str) -> Result<Vec<K>> {
        let what = format!("{} in {}", K::plural(&()), namespace);
        let list = self.api::<K>(namespace).list(&ListParams::default()).await.map_err(|e| map_kube_error(e, &what))?;
        Ok(list.items)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let (ns, name) = identity(obj)?;
        let what = format!("{} {}/{}", K::kind(&()), ns, name);
        debug!(object = %what, "create");
        self.api::<K>(&ns).create(&PostParams::default(), obj).await.map_err(|e| map_kube_error(e, &what))
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        let (ns, name) = identity(obj)?;
        let what = format!("{} {}/{}", K::kind(&()), ns, name);
        debug!(object = %what, "replace");
        self.api::<K>(&ns).replace(&name, &PostParams::default(), obj).await.map_err(|e| map_kube_error(e, &what))
    }

    async fn update_status<K: Object>(&self, obj: &K) -> Result<()> {
        let (ns, name) = identity(obj)?;
        let what = format!("{} {}/{} status", K::kind(&()), ns, name);
        let value = serde_json::to_value(obj)?;
        let status = value.get("status").cloned().unwrap_or(serde_json::Value::Null);
        let patch = Patch::Merge(json!({ "status": status }));
        self.api::<K>(&ns)
            .patch_status(&name, &PatchParams::default(), &patch)
            .await
            .map_err(|e| map_kube_error(e, &what))?;
        Ok(())
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        let what = format!("{} {}/{}", K::kind(&()), namespace, name);
        debug!(object = %what, "delete");
        self.api::<K>(namespace).delete(name, &DeleteParams::default()).await.map_err(|e| map_kube_error(e, &what))?;
        Ok(())
    }

    async fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let what = format!("namespace {}", namespace);
        let ns = api.get_opt(namespace).await.map_err(|e| map_kube_error(e, &what))?;
        Ok(ns.and_then(|n| n.metadata.labels).unwrap_or_default())
    }

    async fn record_event<K: Object>(&self, obj: &K, event: EventNote) -> Result<()> {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), obj.object_ref(&()));
        let type_ = match event.kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        recorder
            .publish(Event { type_, reason: event.reason, note: Some(event.note), action: event.action, secondary: None })
            .await
            .map_err(|e| map_kube_error(e, "event"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grafop_core::ErrorKind;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: "boom".into(), reason: String::new(), code })
    }

    #[test]
    fn kube_errors_are_classified() {
        assert_eq!(map_kube_error(api_error(404), "x").kind(), ErrorKind::NotFound);
        assert_eq!(map_kube_error(api_error(409), "x").kind(), ErrorKind::Conflict);
        assert_eq!(map_kube_error(api_error(500), "x").kind(), ErrorKind::TransientNetwork);
    }
}
