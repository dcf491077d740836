use grafop_core::crd::{DatasourceInput, GrafanaDashboard};
use grafop_core::{Error, Result};
use grafop_kubehub::Cluster;
use k8s_openapi::api::core::v1::ConfigMap;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::source::{TemplateEngine, UrlFetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Json,
    Jsonnet,
    Unknown,
}

/// Classifies a URL path by the text after its last `.`.
pub fn classify(path: &str) -> SourceType {
    let ext = path.rsplit('.').next().unwrap_or_default().trim();
    match ext.to_ascii_lowercase().as_str() {
        "json" => SourceType::Json,
        "jsonnet" | "grafonnet" => SourceType::Jsonnet,
        _ => SourceType::Unknown,
    }
}

/// Replaces every `${input}` with its data-source name.
pub fn resolve_inputs(raw: &str, inputs: &[DatasourceInput]) -> Result<String> {
    let mut out = raw.to_string();
    for input in inputs {
        if input.input_name.is_empty() || input.datasource_name.is_empty() {
            return Err(Error::validation("invalid datasource input rule, input or datasource empty"));
        }
        debug!(input = %input.input_name, datasource = %input.datasource_name, "resolving input");
        out = out.replace(&format!("${{{}}}", input.input_name), &input.datasource_name);
    }
    Ok(out)
}

/// Dashboard ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDashboard {
    pub uid: String,
    pub title: Option<String>,
    pub payload: Vec<u8>,
}

/// Turns a dashboard resource into the exact bytes sent to Grafana.
pub struct DashboardPipeline<'a, C> {
    cluster: &'a C,
    fetcher: &'a dyn UrlFetcher,
    templates: &'a dyn TemplateEngine,
    jsonnet_location: String,
}

impl<'a, C: Cluster> DashboardPipeline<'a, C> {
    pub fn new(
        cluster: &'a C,
        fetcher: &'a dyn UrlFetcher,
        templates: &'a dyn TemplateEngine,
        jsonnet_location: impl Into<String>,
    ) -> Self {
        Self { cluster, fetcher, templates, jsonnet_location: jsonnet_location.into() }
    }

    pub async fn process(&self, dashboard: &GrafanaDashboard) -> Result<ResolvedDashboard> {
        let raw = self.obtain(dashboard).await?;
        let resolved = resolve_inputs(&raw, &dashboard.spec.datasources)?;
        finalize(dashboard, &resolved)
    }

    /// First source that yields content wins: url, config map, inline json,
    /// inline jsonnet. Failures of url, config map and jsonnet fall through.
    async fn obtain(&self, dashboard: &GrafanaDashboard) -> Result<String> {
        let key = dashboard.key();
        if !dashboard.spec.url.is_empty() {
            match self.from_url(dashboard).await {
                Ok(raw) => return Ok(raw),
                Err(e) => warn!(dashboard = %key, error = %e, "failed to request dashboard url, falling back"),
            }
        }

        if dashboard.spec.config_map_ref.is_some() {
            match self.from_config_map(dashboard).await {
                Ok(raw) => return Ok(raw),
                Err(e) => warn!(dashboard = %key, error = %e, "failed to read config map, falling back"),
            }
        }

        if !dashboard.spec.json.is_empty() {
            return Ok(dashboard.spec.json.clone());
        }

        if !dashboard.spec.jsonnet.is_empty() {
            match self.templates.evaluate(dashboard.name_or_default(), &dashboard.spec.jsonnet, &self.jsonnet_location).await {
                Ok(raw) => return Ok(raw),
                Err(e) => warn!(dashboard = %key, error = %e, "failed to evaluate jsonnet"),
            }
        }

        Err(Error::validation(format!("{}: unable to obtain dashboard contents", key)))
    }

    async fn from_url(&self, dashboard: &GrafanaDashboard) -> Result<String> {
        let url = Url::parse(&dashboard.spec.url)
            .map_err(|e| Error::validation(format!("invalid url {}: {}", dashboard.spec.url, e)))?;
        let body = self.fetcher.fetch(&url).await?;
        match classify(url.path()) {
            SourceType::Json | SourceType::Unknown => Ok(body),
            SourceType::Jsonnet => {
                self.templates.evaluate(dashboard.name_or_default(), &body, &self.jsonnet_location).await
            }
        }
    }

    async fn from_config_map(&self, dashboard: &GrafanaDashboard) -> Result<String> {
        let Some(r) = &dashboard.spec.config_map_ref else {
            return Err(Error::validation("no config map reference"));
        };
        let ns = dashboard.namespace_or_default();
        let cm = self
            .cluster
            .get::<ConfigMap>(ns, &r.name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("config map {}/{}", ns, r.name)))?;
        cm.data
            .and_then(|mut d| d.remove(&r.key))
            .ok_or_else(|| Error::NotFound(format!("key {} in config map {}/{}", r.key, ns, r.name)))
    }
}

/// Parses resolved text, clears `id` and pins `uid`.
pub fn finalize(dashboard: &GrafanaDashboard, text: &str) -> Result<ResolvedDashboard> {
    let mut board: Map<String, Value> = match serde_json::from_str::<Value>(text)? {
        Value::Object(m) => m,
        _ => return Err(Error::validation(format!("{}: dashboard is not a json object", dashboard.key()))),
    };
    let uid = dashboard.uid_for(Some(&board));
    board.insert("id".into(), Value::Null);
    board.insert("uid".into(), Value::String(uid.clone()));
    let title = board.get("title").and_then(Value::as_str).map(String::from);
    let payload = serde_json::to_string(&Value::Object(board))?;
    Ok(ResolvedDashboard { uid, title, payload: payload.trim().as_bytes().to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use grafop_core::crd::GrafanaDashboardSpec;
    use grafop_core::ErrorKind;

    fn input(name: &str, ds: &str) -> DatasourceInput {
        DatasourceInput { input_name: name.into(), datasource_name: ds.into() }
    }

    #[test]
    fn classification_uses_last_fragment() {
        assert_eq!(classify("/dashboards/node.json"), SourceType::Json);
        assert_eq!(classify("/dashboards/node.JSONNET"), SourceType::Jsonnet);
        assert_eq!(classify("/a.b/node.grafonnet"), SourceType::Jsonnet);
        assert_eq!(classify("/dashboards/node"), SourceType::Unknown);
        assert_eq!(classify("/dashboards/node.yaml"), SourceType::Unknown);
    }

    #[test]
    fn inputs_replace_every_occurrence() {
        let raw = r#"{"a":"${db}","b":["${db}","${other}"]}"#;
        let out = resolve_inputs(raw, &[input("db", "prod-influx")]).unwrap();
        assert_eq!(out, r#"{"a":"prod-influx","b":["prod-influx","${other}"]}"#);
    }

    #[test]
    fn empty_input_sides_are_rejected() {
        for bad in [input("", "x"), input("db", "")] {
            let err = resolve_inputs("{}", &[bad]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[test]
    fn finalize_pins_identity() {
        let mut d = GrafanaDashboard::new("overview", GrafanaDashboardSpec::default());
        d.metadata.namespace = Some("monitoring".into());
        let out = finalize(&d, "  {\"id\": 42, \"title\": \"x\"}\n").unwrap();
        let v: Value = serde_json::from_slice(&out.payload).unwrap();
        assert!(v["id"].is_null());
        assert_eq!(v["uid"], Value::String(out.uid.clone()));
        assert_eq!(out.uid, d.uid_for(None));
        assert_eq!(out.title.as_deref(), Some("x"));

        let declared = finalize(&d, r#"{"uid":"mine","title":"x"}"#).unwrap();
        assert_eq!(declared.uid, "mine");
    }

    #[test]
    fn finalize_rejects_non_objects() {
        let d = GrafanaDashboard::new("overview", GrafanaDashboardSpec::default());
        assert_eq!(finalize(&d, "[1,2]").unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(finalize(&d, "{oops").unwrap_err().kind(), ErrorKind::Validation);
    }
}
