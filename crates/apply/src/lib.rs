//! grafop apply: builds the desired children of a Grafana, plans the actions
//! that bring the cluster in line, and runs them.

#![forbid(unsafe_code)]

mod drift;
mod objects;
mod plan;
mod runner;

pub use drift::{diff_owned, diff_summary, object_diff, strip_noisy, DiffSummary};
pub use objects::{
    admin_secret, config_hash, config_map, deployment, ingress, render_ini, route, service, BuildInputs,
    GRAFANA_CONTAINER, HTTP_PORT_NAME, INI_KEY, LAST_CONFIG_ANNOTATION, LAST_CONFIG_ENV, PLUGINS_ENV,
    PLUGINS_INIT_CONTAINER, SERVICE_PORT_NAME,
};
pub use plan::{plan, Child, ChildKind, ReconcileAction};
pub use runner::{ActionRunner, RunFailure, RunReport};
