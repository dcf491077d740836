mod support;

use grafop_controller::{reconcile_grafana, reconcile_remote, Outcome};
use grafop_core::crd::{GrafanaDashboard, GrafanaDashboardSpec, GrafanaPlugin, ResourceRef, DASHBOARD_FINALIZER};
use grafop_core::ErrorKind;
use grafop_kubehub::{Cluster, EventKind};
use k8s_openapi::api::apps::v1::Deployment;
use serde_json::Value;
use sha1::{Digest, Sha1};
use support::*;

async fn stored_dashboard(h: &Harness, spec: GrafanaDashboardSpec) -> GrafanaDashboard {
    let mut d = GrafanaDashboard::new("overview", spec);
    d.metadata.namespace = Some(NS.into());
    d.metadata.labels = Some(labels(&[("app", "grafana")]));
    h.ctx.cluster.create(&d).await.unwrap()
}

fn inline(json: &str) -> GrafanaDashboardSpec {
    GrafanaDashboardSpec { json: json.into(), ..Default::default() }
}

async fn reconcile(h: &Harness) -> grafop_core::Result<Outcome> {
    reconcile_remote::<GrafanaDashboard, _>(&h.ctx, NS, "overview").await
}

#[tokio::test]
async fn inline_dashboard_is_submitted_once() {
    let h = harness();
    ready_grafana(&h, grafana_spec()).await;
    stored_dashboard(&h, inline(r#"{"title":"x"}"#)).await;

    let outcome = reconcile(&h).await.unwrap();
    assert_eq!(outcome, Outcome::Requeue(h.ctx.settings.requeue_after));

    let submitted = h.api.submitted.lock().unwrap().clone();
    assert_eq!(submitted.len(), 1);
    let (board, folder) = &submitted[0];
    assert_eq!(*folder, 7);
    assert_eq!(board["id"], Value::Null);
    assert_eq!(board["title"], "x");
    let expected_uid = hex::encode(Sha1::digest(format!("{}{}", NS, "overview").as_bytes()));
    assert_eq!(board["uid"], expected_uid.as_str());

    let stored: GrafanaDashboard = h.ctx.cluster.get(NS, "overview").await.unwrap().unwrap();
    assert_eq!(stored.metadata.finalizers, Some(vec![DASHBOARD_FINALIZER.to_string()]));
    assert_eq!(h.ctx.config.dashboards(NS), [ResourceRef::new(NS, "overview")]);
    let events = h.ctx.cluster.events();
    assert!(events.iter().any(|e| e.event.kind == EventKind::Normal
        && e.event.reason == "Success"
        && e.event.note == "dashboard monitoring/overview successfully submitted"));

    reconcile(&h).await.unwrap();
    assert_eq!(h.api.submitted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn finalizer_is_written_before_remote_work() {
    let h = harness();
    ready_grafana(&h, grafana_spec()).await;
    stored_dashboard(&h, inline(r#"{"title":"x"}"#)).await;
    h.ctx.cluster.fail_next_write::<GrafanaDashboard>(NS, "overview", ErrorKind::Conflict);

    let err = reconcile(&h).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(h.api.call_count(), 0);
}

#[tokio::test]
async fn deletion_removes_remote_copy_then_finalizer() {
    let h = harness();
    ready_grafana(&h, grafana_spec()).await;
    stored_dashboard(&h, inline(r#"{"title":"x"}"#)).await;
    reconcile(&h).await.unwrap();

    h.ctx.cluster.delete::<GrafanaDashboard>(NS, "overview").await.unwrap();
    assert!(h.ctx.cluster.contains::<GrafanaDashboard>(NS, "overview"));

    assert_eq!(reconcile(&h).await.unwrap(), Outcome::Done);
    assert!(!h.ctx.cluster.contains::<GrafanaDashboard>(NS, "overview"));
    assert!(h.api.dashboards.lock().unwrap().is_empty());
    assert!(h.ctx.config.dashboards(NS).is_empty());
}

#[tokio::test]
async fn remote_not_found_still_releases_finalizer() {
    let h = harness();
    ready_grafana(&h, grafana_spec()).await;
    stored_dashboard(&h, inline(r#"{"title":"x"}"#)).await;
    reconcile(&h).await.unwrap();
    *h.api.fail_delete.lock().unwrap() = Some(404);

    h.ctx.cluster.delete::<GrafanaDashboard>(NS, "overview").await.unwrap();
    reconcile(&h).await.unwrap();
    assert_eq!(h.api.deleted.lock().unwrap().len(), 1);
    assert!(!h.ctx.cluster.contains::<GrafanaDashboard>(NS, "overview"));
}

#[tokio::test]
async fn failed_remote_delete_keeps_finalizer() {
    let h = harness();
    ready_grafana(&h, grafana_spec()).await;
    stored_dashboard(&h, inline(r#"{"title":"x"}"#)).await;
    reconcile(&h).await.unwrap();
    *h.api.fail_delete.lock().unwrap() = Some(500);

    h.ctx.cluster.delete::<GrafanaDashboard>(NS, "overview").await.unwrap();
    assert!(reconcile(&h).await.is_err());
    let stored: GrafanaDashboard = h.ctx.cluster.get(NS, "overview").await.unwrap().unwrap();
    assert!(stored.metadata.deletion_timestamp.is_some());
    assert_eq!(stored.metadata.finalizers, Some(vec![DASHBOARD_FINALIZER.to_string()]));
}

#[tokio::test]
async fn unready_grafana_is_skipped() {
    let h = harness();
    ready_grafana(&h, grafana_spec()).await;
    h.ctx.cluster.set_status::<Deployment>(NS, "grafana-deployment-main", serde_json::json!({ "readyReplicas": 0 }));
    stored_dashboard(&h, inline(r#"{"title":"x"}"#)).await;

    reconcile(&h).await.unwrap();
    assert_eq!(h.api.call_count(), 0);
    assert!(h.factory.endpoints.lock().unwrap().is_empty());
}

#[tokio::test]
async fn namespace_selector_gates_matching() {
    let h = harness();
    let spec = grafop_core::crd::GrafanaSpec {
        dashboard_namespace_selector: Some(selector(&[("team", "observability")])),
        ..grafana_spec()
    };
    ready_grafana(&h, spec).await;
    stored_dashboard(&h, inline(r#"{"title":"x"}"#)).await;

    reconcile(&h).await.unwrap();
    assert!(h.api.submitted.lock().unwrap().is_empty());

    h.ctx.cluster.set_namespace_labels(NS, labels(&[("team", "observability")]));
    reconcile(&h).await.unwrap();
    assert_eq!(h.api.submitted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unresolvable_dashboard_records_warning() {
    let h = harness();
    ready_grafana(&h, grafana_spec()).await;
    stored_dashboard(&h, inline("not json")).await;

    reconcile(&h).await.unwrap();
    assert!(h.api.submitted.lock().unwrap().is_empty());
    let events = h.ctx.cluster.events();
    assert!(events.iter().any(|e| e.event.kind == EventKind::Warning && e.event.reason == "ProcessingError"));
}

#[tokio::test]
async fn dashboard_plugins_reach_the_grafana_deployment() {
    let h = harness();
    ready_grafana(&h, grafana_spec()).await;
    let spec = GrafanaDashboardSpec {
        plugins: vec![GrafanaPlugin { name: "grafana-clock-panel".into(), version: "1.0.3".into() }],
        ..inline(r#"{"title":"clock"}"#)
    };
    stored_dashboard(&h, spec).await;
    reconcile(&h).await.unwrap();

    reconcile_grafana(&h.ctx, NS, "main").await.unwrap();
    let dep: Deployment = h.ctx.cluster.get(NS, "grafana-deployment-main").await.unwrap().unwrap();
    let init = &dep.spec.unwrap().template.spec.unwrap().init_containers.unwrap()[0];
    assert_eq!(init.env.as_ref().unwrap()[0].value.as_deref(), Some("grafana-clock-panel:1.0.3"));
}
