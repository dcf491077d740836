#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use grafop_client::{ClientError, ClientFactory, Endpoint, Folder, GrafanaApi, RemoteObject};
use grafop_controller::{reconcile_grafana, Context, Settings};
use grafop_core::crd::{Grafana, GrafanaSpec};
use grafop_core::{ControllerConfig, Error, Images};
use grafop_kubehub::{Cluster, MemoryCluster};
use grafop_pipeline::{TemplateEngine, UrlFetcher};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde_json::{json, Value};
use url::Url;

pub const NS: &str = "monitoring";

fn failure(code: u16) -> ClientError {
    match code {
        404 => ClientError::NotFound,
        409 => ClientError::Conflict,
        status => ClientError::Status { status, context: "fake grafana" },
    }
}

/// In-process stand-in for one Grafana instance.
#[derive(Default)]
pub struct FakeGrafana {
    pub dashboards: Mutex<Vec<RemoteObject>>,
    pub submitted: Mutex<Vec<(Value, i64)>>,
    pub deleted: Mutex<Vec<String>>,
    pub datasources: Mutex<Vec<Value>>,
    pub fail_delete: Mutex<Option<u16>>,
    pub fail_datasource_create: Mutex<Option<u16>>,
    pub calls: Mutex<Vec<&'static str>>,
}

impl FakeGrafana {
    fn call(&self, what: &'static str) {
        self.calls.lock().unwrap().push(what);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GrafanaApi for FakeGrafana {
    async fn health(&self) -> Result<(), ClientError> {
        self.call("health");
        Ok(())
    }

    async fn search_dashboards(&self, name: &str) -> Result<Vec<RemoteObject>, ClientError> {
        self.call("search");
        let all = self.dashboards.lock().unwrap();
        Ok(all.iter().filter(|d| d.title.as_deref().unwrap_or_default().contains(name)).cloned().collect())
    }

    async fn create_or_update_dashboard(&self, dashboard: &[u8], folder_id: i64) -> Result<RemoteObject, ClientError> {
        self.call("create_dashboard");
        let board: Value = serde_json::from_slice(dashboard).unwrap();
        let remote = RemoteObject {
            uid: board["uid"].as_str().map(String::from),
            title: board["title"].as_str().map(String::from),
            ..Default::default()
        };
        self.dashboards.lock().unwrap().push(remote.clone());
        self.submitted.lock().unwrap().push((board, folder_id));
        Ok(remote)
    }

    async fn delete_dashboard(&self, uid: &str) -> Result<RemoteObject, ClientError> {
        self.call("delete_dashboard");
        self.deleted.lock().unwrap().push(uid.to_string());
        if let Some(code) = *self.fail_delete.lock().unwrap() {
            return Err(failure(code));
        }
        let mut all = self.dashboards.lock().unwrap();
        let before = all.len();
        all.retain(|d| d.uid.as_deref() != Some(uid));
        if all.len() == before {
            return Err(ClientError::NotFound);
        }
        Ok(RemoteObject::default())
    }

    async fn get_or_create_folder(&self, namespace: &str) -> Result<Folder, ClientError> {
        self.call("folder");
        Ok(Folder { id: 7, title: namespace.to_string(), uid: None })
    }

    async fn get_datasource(&self, name: &str) -> Result<RemoteObject, ClientError> {
        self.call("get_datasource");
        let all = self.datasources.lock().unwrap();
        match all.iter().find(|d| d["name"] == name) {
            Some(_) => Ok(RemoteObject { title: Some(name.to_string()), ..Default::default() }),
            None => Err(ClientError::NotFound),
        }
    }

    async fn create_datasource(&self, datasource: &[u8]) -> Result<RemoteObject, ClientError> {
        self.call("create_datasource");
        if let Some(code) = *self.fail_datasource_create.lock().unwrap() {
            return Err(failure(code));
        }
        self.datasources.lock().unwrap().push(serde_json::from_slice(datasource).unwrap());
        Ok(RemoteObject::default())
    }

    async fn delete_datasource(&self, name: &str) -> Result<RemoteObject, ClientError> {
        self.call("delete_datasource");
        let mut all = self.datasources.lock().unwrap();
        let before = all.len();
        all.retain(|d| d["name"] != name);
        if all.len() == before {
            return Err(ClientError::NotFound);
        }
        Ok(RemoteObject::default())
    }
}

pub struct FakeFactory {
    pub api: Arc<FakeGrafana>,
    pub endpoints: Mutex<Vec<Endpoint>>,
}

impl ClientFactory for FakeFactory {
    fn build(&self, endpoint: &Endpoint) -> Result<Arc<dyn GrafanaApi>, ClientError> {
        self.endpoints.lock().unwrap().push(endpoint.clone());
        Ok(self.api.clone())
    }
}

struct Offline;

#[async_trait]
impl UrlFetcher for Offline {
    async fn fetch(&self, _url: &Url) -> grafop_core::Result<String> {
        Err(Error::Network("offline".into()))
    }
}

#[async_trait]
impl TemplateEngine for Offline {
    async fn evaluate(&self, _name: &str, _source: &str, _base_path: &str) -> grafop_core::Result<String> {
        Err(Error::validation("jsonnet unavailable"))
    }
}

pub struct Harness {
    pub ctx: Context<MemoryCluster>,
    pub api: Arc<FakeGrafana>,
    pub factory: Arc<FakeFactory>,
}

pub fn harness() -> Harness {
    let api = Arc::new(FakeGrafana::default());
    let factory = Arc::new(FakeFactory { api: api.clone(), endpoints: Mutex::new(Vec::new()) });
    let config = Arc::new(ControllerConfig::new(Images::default(), ""));
    let ctx = Context::new(
        MemoryCluster::new(),
        config,
        factory.clone(),
        Arc::new(Offline),
        Arc::new(Offline),
        Settings::default(),
    );
    Harness { ctx, api, factory }
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn selector(pairs: &[(&str, &str)]) -> LabelSelector {
    LabelSelector { match_labels: Some(labels(pairs)), match_expressions: None }
}

/// Grafana selecting `app=grafana` dashboards and data sources.
pub fn grafana_spec() -> GrafanaSpec {
    GrafanaSpec {
        dashboard_label_selector: vec![selector(&[("app", "grafana")])],
        datasource_label_selector: vec![selector(&[("app", "grafana")])],
        ..Default::default()
    }
}

/// Stores a Grafana, reconciles its children and marks the deployment ready.
pub async fn ready_grafana(h: &Harness, spec: GrafanaSpec) -> Grafana {
    let mut g = Grafana::new("main", spec);
    g.metadata.namespace = Some(NS.into());
    let g = h.ctx.cluster.create(&g).await.unwrap();
    reconcile_grafana(&h.ctx, NS, "main").await.unwrap();
    h.ctx.cluster.set_status::<Deployment>(NS, &g.deployment_name(), json!({ "readyReplicas": 1 }));
    g
}
