use grafop_apply::{plan, ActionRunner, BuildInputs, ChildKind, ReconcileAction};
use std::collections::BTreeMap;

use grafop_core::crd::{Grafana, GrafanaDeployment, GrafanaSpec, ADMIN_PASSWORD_KEY};
use grafop_core::ErrorKind;
use grafop_kubehub::{Cluster, ClusterState, MemoryCluster};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};

async fn stored_grafana(cluster: &MemoryCluster) -> Grafana {
    let mut g = Grafana::new("main", GrafanaSpec::default());
    g.metadata.namespace = Some("monitoring".into());
    cluster.create(&g).await.unwrap()
}

async fn reconcile_once(cluster: &MemoryCluster, g: &Grafana, inputs: &BuildInputs) -> Vec<ReconcileAction> {
    let state = ClusterState::read(cluster, g, inputs.routes_available).await.unwrap();
    plan(g, &state, inputs)
}

#[tokio::test]
async fn first_reconcile_creates_children_owned_by_grafana() {
    let cluster = MemoryCluster::new();
    let g = stored_grafana(&cluster).await;
    let inputs = BuildInputs::default();

    let actions = reconcile_once(&cluster, &g, &inputs).await;
    let report = ActionRunner::new(&cluster, &g).unwrap().run(actions).await.unwrap();
    assert_eq!(report.applied, 4);
    assert_eq!(report.conflicts, 0);

    let secret: Secret = cluster.get("monitoring", "grafana-admin-credentials-main").await.unwrap().unwrap();
    let password = &secret.data.as_ref().unwrap()[ADMIN_PASSWORD_KEY];
    assert_eq!(password.0.len(), 10);

    let dep: Deployment = cluster.get("monitoring", "grafana-deployment-main").await.unwrap().unwrap();
    let owner = &dep.metadata.owner_references.as_ref().unwrap()[0];
    assert_eq!(owner.kind, "Grafana");
    assert_eq!(owner.uid, g.metadata.uid.clone().unwrap());
    assert_eq!(owner.controller, Some(true));
    assert!(cluster.contains::<ConfigMap>("monitoring", "grafana-config-main"));
    assert!(cluster.contains::<Service>("monitoring", "grafana-service-main"));
}

#[tokio::test]
async fn second_reconcile_is_a_noop() {
    let cluster = MemoryCluster::new();
    let g = stored_grafana(&cluster).await;
    let inputs = BuildInputs::default();
    let runner = ActionRunner::new(&cluster, &g).unwrap();
    runner.run(reconcile_once(&cluster, &g, &inputs).await).await.unwrap();

    let before: Secret = cluster.get("monitoring", "grafana-admin-credentials-main").await.unwrap().unwrap();
    let writes = cluster.writes();
    let again = reconcile_once(&cluster, &g, &inputs).await;
    assert!(again.iter().all(|a| matches!(a, ReconcileAction::Noop(_))), "{:?}", again);
    assert_eq!(runner.run(again).await.unwrap().applied, 0);
    assert_eq!(cluster.writes(), writes);

    let after: Secret = cluster.get("monitoring", "grafana-admin-credentials-main").await.unwrap().unwrap();
    assert_eq!(before.data, after.data);
}

#[tokio::test]
async fn conflicts_are_skipped() {
    let cluster = MemoryCluster::new();
    let g = stored_grafana(&cluster).await;
    cluster.fail_next_write::<ConfigMap>("monitoring", "grafana-config-main", ErrorKind::Conflict);

    let actions = reconcile_once(&cluster, &g, &BuildInputs::default()).await;
    let report = ActionRunner::new(&cluster, &g).unwrap().run(actions).await.unwrap();
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.applied, 3);
    assert!(!cluster.contains::<ConfigMap>("monitoring", "grafana-config-main"));

    let retry = reconcile_once(&cluster, &g, &BuildInputs::default()).await;
    assert_eq!(retry[0].kind(), ChildKind::ConfigMap);
    assert_eq!(retry[0].op(), "create");
}

#[tokio::test]
async fn other_errors_halt_with_applied_count() {
    let cluster = MemoryCluster::new();
    let g = stored_grafana(&cluster).await;
    cluster.fail_next_write::<Service>("monitoring", "grafana-service-main", ErrorKind::TransientNetwork);

    let actions = reconcile_once(&cluster, &g, &BuildInputs::default()).await;
    let failure = ActionRunner::new(&cluster, &g).unwrap().run(actions).await.unwrap_err();
    assert_eq!(failure.applied, 2);
    assert_eq!(failure.error.kind(), ErrorKind::TransientNetwork);
    assert!(!cluster.contains::<Deployment>("monitoring", "grafana-deployment-main"));
}

#[tokio::test]
async fn plugin_change_rolls_the_deployment() {
    let cluster = MemoryCluster::new();
    let g = stored_grafana(&cluster).await;
    let runner = ActionRunner::new(&cluster, &g).unwrap();
    runner.run(reconcile_once(&cluster, &g, &BuildInputs::default()).await).await.unwrap();

    let inputs = BuildInputs { plugins: "grafana-piechart-panel:1.3.9".into(), ..Default::default() };
    let actions = reconcile_once(&cluster, &g, &inputs).await;
    let report = runner.run(actions).await.unwrap();
    assert_eq!(report.applied, 1);

    let dep: Deployment = cluster.get("monitoring", "grafana-deployment-main").await.unwrap().unwrap();
    let init = &dep.spec.unwrap().template.spec.unwrap().init_containers.unwrap()[0];
    assert_eq!(init.env.as_ref().unwrap()[0].value.as_deref(), Some("grafana-piechart-panel:1.3.9"));
}

#[tokio::test]
async fn removed_node_selector_is_cleared_from_the_deployment() {
    let cluster = MemoryCluster::new();
    let mut g = Grafana::new("main", GrafanaSpec::default());
    g.metadata.namespace = Some("monitoring".into());
    g.spec.deployment = Some(GrafanaDeployment {
        node_selector: BTreeMap::from([("disk".to_string(), "ssd".to_string())]),
        ..Default::default()
    });
    let mut g = cluster.create(&g).await.unwrap();
    let inputs = BuildInputs::default();
    let actions = reconcile_once(&cluster, &g, &inputs).await;
    ActionRunner::new(&cluster, &g).unwrap().run(actions).await.unwrap();

    g.spec.deployment = None;
    let actions = reconcile_once(&cluster, &g, &inputs).await;
    let deployment = actions.iter().find(|a| a.kind() == ChildKind::Deployment).unwrap();
    assert_eq!(deployment.op(), "update");
    ActionRunner::new(&cluster, &g).unwrap().run(actions).await.unwrap();

    let dep: Deployment = cluster.get("monitoring", "grafana-deployment-main").await.unwrap().unwrap();
    assert!(dep.spec.unwrap().template.spec.unwrap().node_selector.is_none());
    let again = reconcile_once(&cluster, &g, &inputs).await;
    assert!(again.iter().all(|a| matches!(a, ReconcileAction::Noop(_))), "{:?}", again);
}

#[test]
fn unsaved_grafana_cannot_own_children() {
    let cluster = MemoryCluster::new();
    let g = Grafana::new("main", GrafanaSpec::default());
    assert!(ActionRunner::new(&cluster, &g).is_err());
}
