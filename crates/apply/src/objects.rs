//! Builders for the child objects of a Grafana.
//!
//! Every builder takes the object currently in the cluster (if any) and
//! returns the desired object. Fields the operator does not manage are carried
//! over from the current object untouched, so the drift check only sees the
//! managed fields.

use std::collections::BTreeMap;

use grafop_core::config::{Images, CONFIGMAPS_MOUNT_DIR, SECRETS_MOUNT_DIR};
use grafop_core::crd::{
    Grafana, Route, RoutePort, RouteSpec, RouteTargetReference, RouteTls, ADMIN_PASSWORD_KEY, ADMIN_USER_KEY,
    DEFAULT_ADMIN_USER,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    HTTPGetAction, PodSpec, Probe, ResourceRequirements, Secret, SecretKeySelector,
    SecretVolumeSource, Service, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
    IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

pub const INI_KEY: &str = "grafana.ini";
pub const LAST_CONFIG_ANNOTATION: &str = "last-config";
pub const LAST_CONFIG_ENV: &str = "LAST_CONFIG";
pub const PLUGINS_ENV: &str = "GRAFANA_PLUGINS";

pub const GRAFANA_CONTAINER: &str = "grafana";
pub const PLUGINS_INIT_CONTAINER: &str = "grafana-plugins-init";
pub const HTTP_PORT_NAME: &str = "grafana-http";
pub const SERVICE_PORT_NAME: &str = "grafana";

const POD_LABEL_KEY: &str = "app";
const POD_LABEL_VALUE: &str = "grafana";

const LOGS_VOLUME: &str = "grafana-logs";
const DATA_VOLUME: &str = "grafana-data";
const PLUGINS_VOLUME: &str = "grafana-plugins";

const CONFIG_MOUNT: &str = "/etc/grafana/";
const DATA_MOUNT: &str = "/var/lib/grafana";
const PLUGINS_MOUNT: &str = "/var/lib/grafana/plugins";
const LOGS_MOUNT: &str = "/var/log/grafana";
const PLUGINS_INIT_MOUNT: &str = "/opt/plugins";

const PASSWORD_LEN: usize = 10;
const DEFAULT_TERMINATION_GRACE: i64 = 30;

/// Inputs to the builders that come from outside the Grafana object.
#[derive(Debug, Clone, Default)]
pub struct BuildInputs {
    pub images: Images,
    /// Comma-separated plugin list for the init container.
    pub plugins: String,
    pub routes_available: bool,
}

fn pod_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(POD_LABEL_KEY.to_string(), POD_LABEL_VALUE.to_string())])
}

fn non_empty<K: Ord, V>(m: BTreeMap<K, V>) -> Option<BTreeMap<K, V>> {
    (!m.is_empty()).then_some(m)
}

/// Keeps everything in `meta` but pins name and namespace.
fn base_meta(mut meta: ObjectMeta, grafana: &Grafana, name: String) -> ObjectMeta {
    meta.name = Some(name);
    meta.namespace = Some(grafana.namespace_or_default().to_string());
    meta
}

fn merge_into(target: &mut Option<BTreeMap<String, String>>, extra: &BTreeMap<String, String>) {
    if extra.is_empty() {
        return;
    }
    let map = target.get_or_insert_with(BTreeMap::new);
    map.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([("cpu".to_string(), Quantity(cpu.into())), ("memory".to_string(), Quantity(memory.into()))])
}

// ---- config map ----

/// Renders `grafana.ini`. Admin credentials never land in the ini; they are
/// injected from the admin secret.
pub fn render_ini(grafana: &Grafana) -> String {
    let mut sections = grafana.spec.config.sections.clone();
    let paths = sections.entry("paths".to_string()).or_default();
    for (k, v) in [("data", DATA_MOUNT), ("logs", LOGS_MOUNT), ("plugins", PLUGINS_MOUNT)] {
        paths.entry(k.to_string()).or_insert_with(|| v.to_string());
    }
    if let Some(security) = sections.get_mut("security") {
        security.remove("admin_user");
        security.remove("admin_password");
    }

    let mut out = String::new();
    for (section, keys) in sections.iter().filter(|(_, keys)| !keys.is_empty()) {
        out.push_str(&format!("[{}]\n", section));
        for (k, v) in keys {
            out.push_str(&format!("{} = {}\n", k, v));
        }
        out.push('\n');
    }
    out
}

pub fn config_hash(ini: &str) -> String {
    hex::encode(Sha256::digest(ini.as_bytes()))
}

pub fn config_map(grafana: &Grafana, current: Option<&ConfigMap>) -> ConfigMap {
    let ini = render_ini(grafana);
    let mut cm = current.cloned().unwrap_or_default();
    cm.metadata = base_meta(cm.metadata, grafana, grafana.config_name());
    cm.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(LAST_CONFIG_ANNOTATION.to_string(), config_hash(&ini));
    cm.data.get_or_insert_with(BTreeMap::new).insert(INI_KEY.to_string(), ini);
    cm
}

// ---- admin secret ----

fn random_password() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(PASSWORD_LEN).map(char::from).collect()
}

fn current_value(current: Option<&Secret>, key: &str) -> Option<String> {
    let bytes = current?.data.as_ref()?.get(key)?;
    String::from_utf8(bytes.0.clone()).ok().filter(|s| !s.is_empty())
}

/// Declared credentials win, then those already stored, then `admin` and a
/// random password.
pub fn admin_secret(grafana: &Grafana, current: Option<&Secret>) -> Secret {
    let security = grafana.spec.config.security.clone().unwrap_or_default();
    let user = security
        .admin_user
        .filter(|v| !v.is_empty())
        .or_else(|| current_value(current, ADMIN_USER_KEY))
        .unwrap_or_else(|| DEFAULT_ADMIN_USER.to_string());
    let password = security
        .admin_password
        .filter(|v| !v.is_empty())
        .or_else(|| current_value(current, ADMIN_PASSWORD_KEY))
        .unwrap_or_else(random_password);

    let mut secret = current.cloned().unwrap_or_default();
    secret.metadata = base_meta(secret.metadata, grafana, grafana.admin_secret_name());
    let data = secret.data.get_or_insert_with(BTreeMap::new);
    data.insert(ADMIN_USER_KEY.to_string(), ByteString(user.into_bytes()));
    data.insert(ADMIN_PASSWORD_KEY.to_string(), ByteString(password.into_bytes()));
    secret.type_ = Some("Opaque".into());
    secret
}

// ---- service ----

pub fn service(grafana: &Grafana, current: Option<&Service>) -> Service {
    let declared = grafana.spec.service.clone().unwrap_or_default();
    let mut svc = current.cloned().unwrap_or_default();
    svc.metadata = base_meta(svc.metadata, grafana, grafana.service_name());
    merge_into(&mut svc.metadata.labels, &pod_labels());
    merge_into(&mut svc.metadata.labels, &declared.labels);
    merge_into(&mut svc.metadata.annotations, &declared.annotations);

    let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
    let mut port = spec
        .ports
        .as_ref()
        .and_then(|ports| ports.iter().find(|p| p.name.as_deref() == Some(SERVICE_PORT_NAME)).cloned())
        .unwrap_or_default();
    port.name = Some(SERVICE_PORT_NAME.into());
    port.port = grafana.port();
    port.protocol = Some("TCP".into());
    port.target_port = Some(IntOrString::String(HTTP_PORT_NAME.into()));
    spec.ports = Some(vec![port]);
    spec.selector = Some(pod_labels());
    spec.type_ = Some(declared.type_.filter(|t| !t.is_empty()).unwrap_or_else(|| "ClusterIP".into()));
    svc
}

// ---- ingress / route ----

pub fn ingress(grafana: &Grafana, current: Option<&Ingress>) -> Ingress {
    let declared = grafana.spec.ingress.clone().unwrap_or_default();
    let mut ing = current.cloned().unwrap_or_default();
    ing.metadata = base_meta(ing.metadata, grafana, grafana.ingress_name());
    merge_into(&mut ing.metadata.labels, &declared.labels);
    merge_into(&mut ing.metadata.annotations, &declared.annotations);

    let host = (!declared.hostname.is_empty()).then(|| declared.hostname.clone());
    let path = if declared.path.is_empty() { "/".to_string() } else { declared.path.clone() };
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: grafana.service_name(),
            port: Some(ServiceBackendPort { name: Some(SERVICE_PORT_NAME.into()), number: None }),
        }),
        resource: None,
    };
    let tls = declared.tls_enabled.then(|| {
        vec![IngressTLS {
            hosts: host.clone().map(|h| vec![h]),
            secret_name: (!declared.tls_secret_name.is_empty()).then(|| declared.tls_secret_name.clone()),
        }]
    });

    let spec = ing.spec.get_or_insert_with(IngressSpec::default);
    spec.ingress_class_name = declared.ingress_class_name.clone();
    spec.tls = tls;
    spec.rules = Some(vec![IngressRule {
        host,
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath { backend, path: Some(path), path_type: "Prefix".into() }],
        }),
    }]);
    ing
}

pub fn route(grafana: &Grafana, current: Option<&Route>) -> Route {
    let declared = grafana.spec.ingress.clone().unwrap_or_default();
    let spec = RouteSpec {
        host: (!declared.hostname.is_empty()).then(|| declared.hostname.clone()),
        path: (!declared.path.is_empty()).then(|| declared.path.clone()),
        to: RouteTargetReference { kind: "Service".into(), name: grafana.service_name(), weight: Some(100) },
        port: Some(RoutePort { target_port: IntOrString::String(SERVICE_PORT_NAME.into()) }),
        tls: declared.tls_enabled.then(|| RouteTls {
            termination: "edge".into(),
            insecure_edge_termination_policy: Some("Redirect".into()),
        }),
        wildcard_policy: Some("None".into()),
    };
    let mut route = match current {
        Some(r) => {
            let mut r = r.clone();
            // the router assigns a host when none is declared
            let assigned = r.spec.host.take();
            r.spec = RouteSpec { host: spec.host.clone().or(assigned), ..spec };
            r
        }
        None => Route::new(&grafana.route_name(), spec),
    };
    route.metadata = base_meta(route.metadata, grafana, grafana.route_name());
    merge_into(&mut route.metadata.labels, &declared.labels);
    merge_into(&mut route.metadata.annotations, &declared.annotations);
    route
}

// ---- deployment ----

fn volumes(grafana: &Grafana) -> Vec<Volume> {
    let mut out = vec![Volume {
        name: grafana.config_name(),
        config_map: Some(ConfigMapVolumeSource { name: Some(grafana.config_name()), ..Default::default() }),
        ..Default::default()
    }];
    for name in [LOGS_VOLUME, DATA_VOLUME, PLUGINS_VOLUME] {
        out.push(Volume { name: name.into(), empty_dir: Some(EmptyDirVolumeSource::default()), ..Default::default() });
    }
    for secret in &grafana.spec.secrets {
        out.push(Volume {
            name: format!("secret-{}", secret),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.clone()),
                optional: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    for cm in &grafana.spec.config_maps {
        out.push(Volume {
            name: format!("configmap-{}", cm),
            config_map: Some(ConfigMapVolumeSource { name: Some(cm.clone()), ..Default::default() }),
            ..Default::default()
        });
    }
    out
}

/// Mounts for the declared secrets and config maps, shared by every container.
fn extra_mounts(grafana: &Grafana) -> Vec<VolumeMount> {
    let secrets = grafana.spec.secrets.iter().map(|s| VolumeMount {
        name: format!("secret-{}", s),
        mount_path: format!("{}{}", SECRETS_MOUNT_DIR, s),
        ..Default::default()
    });
    let config_maps = grafana.spec.config_maps.iter().map(|c| VolumeMount {
        name: format!("configmap-{}", c),
        mount_path: format!("{}{}", CONFIGMAPS_MOUNT_DIR, c),
        ..Default::default()
    });
    secrets.chain(config_maps).collect()
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount { name: name.into(), mount_path: path.into(), ..Default::default() }
}

fn secret_env(name: &str, secret: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector { key: name.into(), name: Some(secret.into()), optional: None }),
            ..Default::default()
        }),
    }
}

fn health_probe(port: i32, delay: i32, timeout: i32, failures: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/api/health".into()),
            port: IntOrString::Int(port),
            host: None,
            http_headers: None,
            scheme: None,
        }),
        initial_delay_seconds: Some(delay),
        timeout_seconds: Some(timeout),
        failure_threshold: Some(failures),
        ..Default::default()
    }
}

fn grafana_container(grafana: &Grafana, images: &Images, config_hash: &str) -> Container {
    let port = grafana.port();
    let resources = grafana.spec.resources.clone().unwrap_or_else(|| ResourceRequirements {
        requests: Some(quantities("100m", "256Mi")),
        limits: Some(quantities("500m", "1Gi")),
        ..Default::default()
    });
    let mut mounts = vec![
        mount(&grafana.config_name(), CONFIG_MOUNT),
        mount(DATA_VOLUME, DATA_MOUNT),
        mount(PLUGINS_VOLUME, PLUGINS_MOUNT),
        mount(LOGS_VOLUME, LOGS_MOUNT),
    ];
    mounts.extend(extra_mounts(grafana));
    let secret = grafana.admin_secret_name();

    Container {
        name: GRAFANA_CONTAINER.into(),
        image: Some(images.grafana()),
        args: Some(vec![format!("-config={}{}", CONFIG_MOUNT, INI_KEY)]),
        ports: Some(vec![ContainerPort {
            name: Some(HTTP_PORT_NAME.into()),
            container_port: port,
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        env: Some(vec![
            EnvVar { name: LAST_CONFIG_ENV.into(), value: Some(config_hash.into()), value_from: None },
            secret_env(ADMIN_USER_KEY, &secret),
            secret_env(ADMIN_PASSWORD_KEY, &secret),
        ]),
        resources: Some(resources),
        volume_mounts: Some(mounts),
        liveness_probe: Some(health_probe(port, 60, 30, 10)),
        readiness_probe: Some(health_probe(port, 5, 3, 1)),
        image_pull_policy: Some("IfNotPresent".into()),
        termination_message_path: Some("/dev/termination-log".into()),
        termination_message_policy: Some("File".into()),
        security_context: grafana.spec.deployment.as_ref().and_then(|d| d.container_security_context.clone()),
        ..Default::default()
    }
}

fn plugins_init_container(grafana: &Grafana, inputs: &BuildInputs) -> Container {
    let resources = grafana.spec.init_resources.clone().unwrap_or_else(|| ResourceRequirements {
        requests: Some(quantities("250m", "128Mi")),
        limits: Some(quantities("1", "512Mi")),
        ..Default::default()
    });
    Container {
        name: PLUGINS_INIT_CONTAINER.into(),
        image: Some(inputs.images.plugins_init()),
        env: Some(vec![EnvVar { name: PLUGINS_ENV.into(), value: Some(inputs.plugins.clone()), value_from: None }]),
        resources: Some(resources),
        volume_mounts: Some(vec![mount(PLUGINS_VOLUME, PLUGINS_INIT_MOUNT)]),
        image_pull_policy: Some("IfNotPresent".into()),
        termination_message_path: Some("/dev/termination-log".into()),
        termination_message_policy: Some("File".into()),
        ..Default::default()
    }
}

/// Declared extra containers, each given the shared mounts it does not
/// already define by name or path.
fn extra_containers(grafana: &Grafana) -> Vec<Container> {
    let shared = extra_mounts(grafana);
    grafana
        .spec
        .containers
        .iter()
        .cloned()
        .map(|mut c| {
            let mounts = c.volume_mounts.get_or_insert_with(Vec::new);
            for m in &shared {
                if !mounts.iter().any(|e| e.name == m.name || e.mount_path == m.mount_path) {
                    mounts.push(m.clone());
                }
            }
            if mounts.is_empty() {
                c.volume_mounts = None;
            }
            c
        })
        .collect()
}

/// `config_hash` is the `last-config` value of the desired config map; a
/// change rolls the pods.
pub fn deployment(grafana: &Grafana, current: Option<&Deployment>, inputs: &BuildInputs, config_hash: &str) -> Deployment {
    let declared = grafana.spec.deployment.clone().unwrap_or_default();
    let mut dep = current.cloned().unwrap_or_default();
    dep.metadata = base_meta(dep.metadata, grafana, grafana.deployment_name());
    merge_into(&mut dep.metadata.labels, &declared.labels);
    merge_into(&mut dep.metadata.annotations, &declared.annotations);

    let spec = dep.spec.get_or_insert_with(DeploymentSpec::default);
    spec.replicas = Some(if declared.replicas > 0 { declared.replicas } else { 1 });
    spec.selector = LabelSelector { match_labels: Some(pod_labels()), match_expressions: None };
    spec.strategy = Some(DeploymentStrategy {
        type_: Some("RollingUpdate".into()),
        rolling_update: Some(RollingUpdateDeployment {
            max_unavailable: Some(IntOrString::String("25%".into())),
            max_surge: Some(IntOrString::String("25%".into())),
        }),
    });

    let template = &mut spec.template;
    let meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    meta.name = Some(grafana.deployment_name());
    merge_into(&mut meta.labels, &pod_labels());
    merge_into(&mut meta.labels, &declared.labels);
    let scrape = BTreeMap::from([
        ("prometheus.io/scrape".to_string(), "true".to_string()),
        ("prometheus.io/port".to_string(), grafana.port().to_string()),
    ]);
    merge_into(&mut meta.annotations, &scrape);
    merge_into(&mut meta.annotations, &declared.annotations);

    let pod = template.spec.get_or_insert_with(PodSpec::default);
    pod.node_selector = non_empty(declared.node_selector);
    pod.tolerations = (!declared.tolerations.is_empty()).then_some(declared.tolerations);
    pod.affinity = declared.affinity;
    pod.security_context = declared.security_context;
    pod.termination_grace_period_seconds = Some(if declared.termination_grace_period_seconds > 0 {
        declared.termination_grace_period_seconds
    } else {
        DEFAULT_TERMINATION_GRACE
    });
    pod.volumes = Some(volumes(grafana));
    pod.init_containers = Some(vec![plugins_init_container(grafana, inputs)]);
    let mut containers = vec![grafana_container(grafana, &inputs.images, config_hash)];
    containers.extend(extra_containers(grafana));
    pod.containers = containers;

    dep
}
