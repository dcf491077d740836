//! Custom resources watched by the operator, plus the OpenShift route type it
//! manages when the route API is served.

mod dashboard;
mod datasource;
mod grafana;
mod route;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use dashboard::*;
pub use datasource::*;
pub use grafana::*;
pub use route::*;

pub const GROUP: &str = "monitor.kun";

/// Observed phase written to the status of Grafana and data-source objects.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Reconciling,
    Failing,
}

/// `{name, namespace}` back-reference listed in a Grafana status.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, JsonSchema)]
pub struct ResourceRef {
    pub name: String,
    pub namespace: String,
}

impl ResourceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into() }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
