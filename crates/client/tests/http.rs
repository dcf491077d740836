use std::time::Duration;

use grafop_client::{ClientError, Endpoint, GrafanaApi, GrafanaClient};
use serde_json::json;
use wiremock::matchers::{basic_auth, body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> GrafanaClient {
    GrafanaClient::new(&Endpoint {
        url: server.uri(),
        user: "admin".into(),
        password: "secret".into(),
        timeout: Duration::from_secs(2),
    })
    .unwrap()
}

#[tokio::test]
async fn health_sends_auth_and_json_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .and(basic_auth("admin", "secret"))
        .and(header("accept", "application/json"))
        .and(header("content-type", "application/json"))
        .and(header("user-agent", "grafana-operator"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"database": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server).health().await.unwrap();
}

#[tokio::test]
async fn health_non_200_is_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client_for(&server).health().await.unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 503, .. }));
}

#[tokio::test]
async fn search_encodes_query_and_maps_404() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/search"))
        .and(query_param("query", "My Board & more"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 7, "uid": "u1", "title": "My Board & more", "type": "dash-db"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/search"))
        .and(query_param("query", "missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let hits = client.search_dashboards("My Board & more").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uid.as_deref(), Some("u1"));
    assert!(client.search_dashboards("missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn create_dashboard_wraps_payload_with_overwrite() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/dashboards/db"))
        .and(body_json(json!({
            "dashboard": {"id": null, "uid": "abc", "title": "x"},
            "folderId": 4,
            "overwrite": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 12, "uid": "abc", "slug": "x", "version": 1, "status": "success", "url": "/d/abc/x"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = client_for(&server)
        .create_or_update_dashboard(br#"{"id":null,"uid":"abc","title":"x"}"#, 4)
        .await
        .unwrap();
    assert_eq!(created.id, Some(12));
    assert_eq!(created.slug.as_deref(), Some("x"));
}

#[tokio::test]
async fn delete_dashboard_maps_404_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/dashboards/uid/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/dashboards/uid/here"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "x"})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.delete_dashboard("gone").await.unwrap_err().is_not_found());
    assert_eq!(client.delete_dashboard("here").await.unwrap().title.as_deref(), Some("x"));
}

#[tokio::test]
async fn folder_is_reused_on_exact_title_match() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/folders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "title": "monitoring-dev"},
            {"id": 2, "title": "monitoring"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/folders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 99, "title": "unexpected"})))
        .expect(0)
        .mount(&server)
        .await;

    let folder = client_for(&server).get_or_create_folder("monitoring").await.unwrap();
    assert_eq!(folder.id, 2);
}

#[tokio::test]
async fn folder_for_empty_namespace_is_created_with_sentinel_title() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/folders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "title": "monitoring"}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/folders"))
        .and(body_partial_json(json!({"title": "Non-Namespaced"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 5, "title": "Non-Namespaced"})))
        .expect(1)
        .mount(&server)
        .await;

    let folder = client_for(&server).get_or_create_folder("").await.unwrap();
    assert_eq!(folder.id, 5);
}

#[tokio::test]
async fn datasource_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/datasources"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "data source with the same name already exists"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/datasources/name/Prometheus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 3, "name": "Prometheus"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/datasources/name/Loki"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/datasources/name/Prometheus"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.create_datasource(br#"{"name":"Prometheus"}"#).await.unwrap_err().is_conflict());
    assert_eq!(client.get_datasource("Prometheus").await.unwrap().id, Some(3));
    assert!(client.delete_datasource("Loki").await.unwrap_err().is_not_found());
    assert!(matches!(
        client.delete_datasource("Prometheus").await.unwrap_err(),
        ClientError::Status { status: 500, .. }
    ));
}

#[tokio::test]
async fn slow_server_hits_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let client = GrafanaClient::new(&Endpoint {
        url: server.uri(),
        user: "admin".into(),
        password: "secret".into(),
        timeout: Duration::from_millis(50),
    })
    .unwrap();
    match client.health().await.unwrap_err() {
        ClientError::Transport(e) => assert!(e.is_timeout()),
        other => panic!("expected timeout, got {other:?}"),
    }
}
