//! grafop controllers: the Grafana child reconciler, the finalizer-driven
//! dashboard and data-source reconcilers, and their kube-runtime wiring.

#![forbid(unsafe_code)]

mod context;
mod dashboard;
mod datasource;
mod engine;
mod grafana;
mod matching;
mod runtime;

pub use context::{Context, Settings, DEFAULT_CONCURRENCY, DEFAULT_REQUEUE};
pub use engine::{reconcile_remote, Outcome, RemoteResource};
pub use grafana::reconcile_grafana;
pub use matching::matching_instances;
pub use runtime::run;
