//! grafop content pipelines.
//!
//! A dashboard's declared content (remote URL, config map, inline JSON or
//! jsonnet) is resolved into the exact payload submitted to Grafana. Data
//! sources need no resolution and are serialized as declared.

#![forbid(unsafe_code)]

mod dashboard;
mod source;

use grafop_core::crd::GrafanaDataSource;
use grafop_core::Result;

pub use dashboard::{classify, finalize, resolve_inputs, DashboardPipeline, ResolvedDashboard, SourceType};
pub use source::{HttpFetcher, JsonnetCli, TemplateEngine, UrlFetcher};

/// Payload for `POST /api/datasources`.
pub fn datasource_payload(ds: &GrafanaDataSource) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ds.spec.datasource)?)
}
