use std::sync::Arc;
use std::time::Duration;

use grafop_client::ClientFactory;
use grafop_core::ControllerConfig;
use grafop_pipeline::{TemplateEngine, UrlFetcher};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(10);
pub const DEFAULT_CONCURRENCY: u16 = 10;

/// Runtime knobs shared by all controllers.
#[derive(Debug, Clone)]
pub struct Settings {
    pub requeue_after: Duration,
    /// Concurrent reconciles per kind.
    pub concurrency: u16,
    /// Restrict watches to one namespace; all namespaces when `None`.
    pub namespace: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self { requeue_after: DEFAULT_REQUEUE, concurrency: DEFAULT_CONCURRENCY, namespace: None }
    }
}

/// Everything a reconcile needs, threaded explicitly through every call.
pub struct Context<C> {
    pub cluster: C,
    pub config: Arc<ControllerConfig>,
    pub clients: Arc<dyn ClientFactory>,
    pub fetcher: Arc<dyn UrlFetcher>,
    pub templates: Arc<dyn TemplateEngine>,
    pub settings: Settings,
    /// Cancelled on shutdown; in-flight reconciles abort at their next await.
    pub shutdown: CancellationToken,
}

impl<C> Context<C> {
    pub fn new(
        cluster: C,
        config: Arc<ControllerConfig>,
        clients: Arc<dyn ClientFactory>,
        fetcher: Arc<dyn UrlFetcher>,
        templates: Arc<dyn TemplateEngine>,
        settings: Settings,
    ) -> Self {
        Self { cluster, config, clients, fetcher, templates, settings, shutdown: CancellationToken::new() }
    }
}
