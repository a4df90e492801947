use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Intake routes. Every mutating route answers `202` with the queued task.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route(
            "/datasets/{dataset}",
            post(handlers::create_dataset).delete(handlers::delete_dataset),
        )
        .route("/datasets/{dataset}/commits", post(handlers::commit_files))
        .route("/datasets/{dataset}/unlock", post(handlers::unlock_files))
        .route("/datasets/{dataset}/files", get(handlers::get_files))
        .route(
            "/datasets/{dataset}/snapshots/{tag}",
            post(handlers::create_snapshot),
        )
        .route(
            "/datasets/{dataset}/publish/{tag}",
            post(handlers::publish_snapshot),
        )
        .route("/datasets/{dataset}/migrate", post(handlers::migrate_dataset))
        .route("/tasks/{task_id}", get(handlers::task_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tessera_core::TaskSystem;
    use tessera_core::orchestration::OrchestratorConfig;
    use tessera_core::publish::{GithubClient, PublishSettings};
    use tessera_core::store::InMemoryStore;
    use tower::ServiceExt;

    use super::*;
    use crate::callback::UnreportedVersions;

    fn system(store: InMemoryStore) -> TaskSystem {
        TaskSystem::build(
            &OrchestratorConfig::default(),
            Arc::new(store),
            PublishSettings::default(),
            Arc::new(GithubClient::new("", "").unwrap()),
            Arc::new(UnreportedVersions),
        )
        .unwrap()
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post(uri: &str, body: Option<&str>) -> Request<Body> {
        let builder = Request::builder().method("POST").uri(uri);
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn finished(app: &Router, accepted: &Value) -> Value {
        let uri = format!("/tasks/{}", accepted["task_id"].as_str().unwrap());
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (status, body) = call(app, get(&uri)).await;
                assert_eq!(status, StatusCode::OK);
                if body["state"] != "pending" {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_is_accepted_and_runs_to_completion() {
        let system = system(InMemoryStore::new());
        system.start().await;
        let app = create_app(AppState::new(system.submitter()));

        let (status, accepted) = call(&app, post("/datasets/ds000001", None)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["kind"], "create_dataset");
        assert_eq!(accepted["queue"], "dataset-worker-0");

        let finished = finished(&app, &accepted).await;
        assert_eq!(finished["state"], "succeeded", "{finished}");
        assert!(finished["output"]["commit"].is_string());

        system.shutdown().await;
    }

    #[tokio::test]
    async fn snapshot_body_is_optional_and_routed_to_the_dataset_queue() {
        let system = system(InMemoryStore::new());
        let app = create_app(AppState::new(system.submitter()));

        let (status, accepted) = call(
            &app,
            post(
                "/datasets/ds000002/snapshots/1.0.0",
                Some(r#"{"snapshot_changes": ["Initial release"]}"#),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["kind"], "create_snapshot");
        assert_eq!(accepted["queue"], "dataset-worker-0");

        let (status, accepted) = call(&app, post("/datasets/ds000002/publish/1.0.0", None)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["kind"], "publish_snapshot");
    }

    #[tokio::test]
    async fn file_routes_list_and_unlock_on_the_dataset_queue() {
        let store = InMemoryStore::new();
        let dataset = tessera_core::DatasetId::new("ds000003").unwrap();
        store
            .seed(&dataset, [("sub-01/anat/sub-01_T1w.nii.gz", "voxels")])
            .await
            .unwrap();
        let system = system(store.clone());
        system.start().await;
        let app = create_app(AppState::new(system.submitter()));

        let (status, accepted) = call(&app, get("/datasets/ds000003/files")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["kind"], "get_files");
        assert_eq!(accepted["queue"], "dataset-worker-0");
        let listed = finished(&app, &accepted).await;
        assert_eq!(listed["state"], "succeeded", "{listed}");
        assert_eq!(
            listed["output"]["files"][0]["filename"],
            "sub-01/anat/sub-01_T1w.nii.gz"
        );

        let (status, accepted) = call(
            &app,
            post(
                "/datasets/ds000003/unlock",
                Some(r#"{"files": ["sub-01/anat/sub-01_T1w.nii.gz"]}"#),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["kind"], "unlock_files");
        let unlocked = finished(&app, &accepted).await;
        assert_eq!(unlocked["state"], "succeeded", "{unlocked}");
        assert_eq!(store.unlocked(&dataset).await.len(), 1);

        system.shutdown().await;
    }

    #[tokio::test]
    async fn rejects_bad_requests_before_enqueueing() {
        let system = system(InMemoryStore::new());
        let app = create_app(AppState::new(system.submitter()));

        let (status, _) = call(&app, post("/datasets/.hidden", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            post("/datasets/ds000001/publish/1.0.0", Some(r#"{"realm": "SECRET"}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("SECRET"));

        let (status, _) = call(
            &app,
            post("/datasets/ds000001/commits", Some(r#"{"files": []}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, post("/datasets/ds000001/snapshots/-l", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("-l"));

        let (status, _) = call(&app, post("/datasets/ds000001/publish/--delete", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, get("/datasets/ds000001/files?branch=--all")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            post("/datasets/ds000001/unlock", Some(r#"{"files": []}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, get(&format!("/tasks/{}", uuid::Uuid::now_v7()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(system.broker().queues().len() >= 2);
    }
}
