mod support;

use std::sync::Arc;

use firespec_core::{InspectionId, ProjectId};
use firespec_offline::{
    ApiError, AppState, ConnectivityState, OfflineConfig, OfflineError, WriteError, WriteOutcome,
};
use serde_json::json;
use support::{FakeApi, app_with};

#[tokio::test]
async fn online_reads_refresh_the_cache() {
    let api = Arc::new(
        FakeApi::new()
            .with_project(1, "in_progress")
            .with_inspections(1, &[10, 11]),
    );
    let app = app_with(api, ConnectivityState::Online);

    assert_eq!(app.projects().await.len(), 1);
    assert_eq!(app.inspections(ProjectId::new(1)).await.len(), 2);
    assert!(
        app.inspection(ProjectId::new(1), InspectionId::new(10))
            .await
            .is_some()
    );

    assert_eq!(app.cache().get_project_list().await.len(), 1);
    assert_eq!(app.cache().get_inspection_list(ProjectId::new(1)).await.len(), 2);
    assert!(
        app.cache()
            .get_inspection_detail(InspectionId::new(10))
            .await
            .is_some()
    );
}

#[tokio::test]
async fn failed_live_read_falls_back_without_changing_state() {
    let api = Arc::new(FakeApi::new().with_project(1, "in_progress"));
    let app = app_with(api.clone(), ConnectivityState::Online);
    app.projects().await;

    api.set_unreachable(true);

    assert_eq!(app.projects().await, vec![json!({ "id": 1, "name": "Project 1", "status": "in_progress" })]);
    assert!(app.project(ProjectId::new(1)).await.is_some());
    assert_eq!(app.connectivity(), ConnectivityState::Online);
}

#[tokio::test]
async fn offline_writes_are_queued_in_order() {
    let api = Arc::new(FakeApi::new());
    let app = app_with(api.clone(), ConnectivityState::Offline);

    let first = app.create_project(json!({ "name": "Tower A" })).await.unwrap();
    let second = app.delete_inspection(ProjectId::new(1), InspectionId::new(2)).await.unwrap();

    let (WriteOutcome::SavedLocally { sequence_id: a }, WriteOutcome::SavedLocally { sequence_id: b }) =
        (first, second)
    else {
        panic!("expected both writes to be queued");
    };
    assert!(a < b);
    assert_eq!(app.pending_count().await, 2);
    assert!(api.executed().is_empty());

    let pending = app.queue().list_pending().await.unwrap();
    assert_eq!(pending[1].request.resource_path, "projects/1/inspections/2");
}

#[tokio::test]
async fn online_write_reports_the_server_response() {
    let api = Arc::new(FakeApi::new());
    let app = app_with(api, ConnectivityState::Online);

    let outcome = app.create_project(json!({ "name": "Tower A" })).await.unwrap();

    assert_eq!(outcome, WriteOutcome::SavedToServer { response: json!({ "id": 1001 }) });
    assert_eq!(app.pending_count().await, 0);
}

#[tokio::test]
async fn server_rejection_is_not_queued() {
    let api = Arc::new(FakeApi::new());
    api.reject_write("projects/1", ApiError::Status { status: 403, message: None });
    let app = app_with(api, ConnectivityState::Online);

    let err = app
        .update_project(ProjectId::new(1), json!({ "name": "x" }))
        .await
        .unwrap_err();

    assert!(matches!(err, WriteError::Api(ApiError::Status { status: 403, .. })));
    assert_eq!(app.pending_count().await, 0);
}

#[tokio::test]
async fn online_only_reads_refuse_when_offline() {
    let api = Arc::new(FakeApi::new().with_inspections(1, &[10]));
    let app = app_with(api, ConnectivityState::Offline);

    assert_eq!(app.latest_inspection(ProjectId::new(1)).await, Err(ApiError::Offline));
    assert_eq!(
        app.change_log(ProjectId::new(1), InspectionId::new(10)).await,
        Err(ApiError::Offline)
    );
    assert!(matches!(app.sync_now().await, Err(OfflineError::Offline)));

    app.monitor().handle_online();
    let latest = app.latest_inspection(ProjectId::new(1)).await.unwrap();
    assert_eq!(latest.unwrap()["id"], json!(10));
}

#[tokio::test]
async fn opening_from_config_uses_the_configured_database() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let config = OfflineConfig {
        api_url: format!("http://{addr}/api"),
        auth_token: None,
        data_dir: dir.path().join("state"),
        active_status: "in_progress".to_string(),
    };

    let app = AppState::open(&config).await.unwrap();
    assert_eq!(app.connectivity(), ConnectivityState::Offline);

    let outcome = app.delete_project(ProjectId::new(3)).await.unwrap();
    assert!(outcome.is_local());
    assert!(config.database_path().exists());
}
