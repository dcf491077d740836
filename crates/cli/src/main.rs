use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use grafop_client::HttpClientFactory;
use grafop_controller::{Context, Settings, DEFAULT_CONCURRENCY};
use grafop_core::config::{
    DEFAULT_GRAFANA_IMAGE, DEFAULT_GRAFANA_TAG, DEFAULT_JSONNET_LOCATION, DEFAULT_PLUGINS_INIT_IMAGE,
    DEFAULT_PLUGINS_INIT_TAG,
};
use grafop_core::crd::{Grafana, GrafanaDashboard, GrafanaDataSource};
use grafop_core::{ControllerConfig, Images};
use grafop_kubehub::KubeCluster;
use grafop_pipeline::{HttpFetcher, JsonnetCli};
use kube::CustomResourceExt;
use tokio::signal;
use tracing::{info, warn};

const CONTROLLER_NAME: &str = "grafana-operator";

#[derive(Parser, Debug)]
#[command(name = "grafop", version, about = "Operator for Grafana instances, dashboards and data sources")]
struct Cli {
    /// Grafana image used when the instance does not pin one
    #[arg(long, env = "GRAFOP_GRAFANA_IMAGE", default_value = DEFAULT_GRAFANA_IMAGE)]
    grafana_image: String,

    #[arg(long, env = "GRAFOP_GRAFANA_IMAGE_TAG", default_value = DEFAULT_GRAFANA_TAG)]
    grafana_image_tag: String,

    /// Image of the init container that installs dashboard plugins
    #[arg(long, env = "GRAFOP_PLUGINS_INIT_IMAGE", default_value = DEFAULT_PLUGINS_INIT_IMAGE)]
    plugins_init_image: String,

    #[arg(long, env = "GRAFOP_PLUGINS_INIT_TAG", default_value = DEFAULT_PLUGINS_INIT_TAG)]
    plugins_init_tag: String,

    /// Library path handed to jsonnet when evaluating dashboards
    #[arg(long, env = "GRAFOP_JSONNET_LOCATION", default_value = DEFAULT_JSONNET_LOCATION)]
    jsonnet_location: String,

    #[arg(long, env = "GRAFOP_JSONNET_BIN", default_value = "jsonnet")]
    jsonnet_bin: PathBuf,

    /// Watch a single namespace instead of the whole cluster
    #[arg(long, env = "GRAFOP_NAMESPACE")]
    namespace: Option<String>,

    /// Concurrent reconciles per resource kind
    #[arg(long, env = "GRAFOP_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: u16,

    #[arg(long, env = "GRAFOP_REQUEUE_SECS", default_value_t = 10)]
    requeue_secs: u64,

    /// Bound on dashboard downloads and jsonnet evaluation
    #[arg(long, env = "GRAFOP_CLIENT_TIMEOUT_SECS", default_value_t = 10)]
    client_timeout_secs: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator until interrupted (default)
    Run,
    /// Print the custom resource definitions as YAML
    Crds,
}

fn init_tracing() {
    let env = std::env::var("GRAFOP_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("GRAFOP_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid GRAFOP_METRICS_ADDR; expected host:port");
        }
    }
}

fn print_crds() -> Result<()> {
    let docs = [
        serde_yaml::to_string(&Grafana::crd())?,
        serde_yaml::to_string(&GrafanaDashboard::crd())?,
        serde_yaml::to_string(&GrafanaDataSource::crd())?,
    ];
    print!("{}", docs.join("---\n"));
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let images = Images {
        grafana_image: cli.grafana_image,
        grafana_tag: cli.grafana_image_tag,
        plugins_init_image: cli.plugins_init_image,
        plugins_init_tag: cli.plugins_init_tag,
    };
    info!(grafana = %images.grafana(), plugins_init = %images.plugins_init(), "images");
    let config = Arc::new(ControllerConfig::new(images, cli.jsonnet_location));

    let client = kube::Client::try_default().await.context("connecting to the cluster")?;
    let routes = grafop_kubehub::routes_available(client.clone()).await.context("discovering route api")?;
    config.set_routes_available(routes);

    let timeout = Duration::from_secs(cli.client_timeout_secs);
    let settings = Settings {
        requeue_after: Duration::from_secs(cli.requeue_secs),
        concurrency: cli.concurrency,
        namespace: cli.namespace,
    };
    let ctx = Arc::new(Context::new(
        KubeCluster::new(client, CONTROLLER_NAME),
        config,
        Arc::new(HttpClientFactory),
        Arc::new(HttpFetcher::new(timeout).context("building dashboard fetcher")?),
        Arc::new(JsonnetCli::new(cli.jsonnet_bin, timeout)),
        settings,
    ));

    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        shutdown.cancel();
    });

    grafop_controller::run(ctx).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Crds) => print_crds(),
        Some(Commands::Run) | None => {
            init_tracing();
            init_metrics();
            run(cli).await
        }
    }
}
