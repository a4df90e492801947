//! Intake handlers. Each one validates the request, enqueues a task on the
//! router-selected queue and answers `202 Accepted` with the task id.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::COOKIE},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tessera_core::orchestration::{
    CommitFilesTask, CreateDatasetTask, CreateSnapshotTask, DeleteDatasetTask, GetFilesTask,
    MigrateToBucketTask, PublishSnapshotTask, TaskHandle, TaskPayload, TaskState,
    UnlockFilesTask,
};
use tessera_core::publish::DatasetRealm;
use tessera_core::store::validate_ref_name;
use tessera_core::{CommitAuthor, DatasetId, TaskId};
use tracing::info;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub task_id: TaskId,
    pub kind: String,
    pub queue: String,
}

impl From<&TaskHandle> for Accepted {
    fn from(handle: &TaskHandle) -> Self {
        Self {
            task_id: handle.task_id,
            kind: handle.kind.to_string(),
            queue: handle.queue.to_string(),
        }
    }
}

type AcceptedResponse = (StatusCode, Json<Accepted>);

#[derive(Debug, Default, Deserialize)]
pub struct AuthorBody {
    #[serde(default)]
    pub author: CommitAuthor,
}

#[derive(Debug, Deserialize)]
pub struct CommitFilesBody {
    pub files: Vec<String>,
    #[serde(default)]
    pub author: CommitAuthor,
}

#[derive(Debug, Deserialize)]
pub struct UnlockFilesBody {
    pub files: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilesQuery {
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotBody {
    #[serde(default)]
    pub description_fields: Map<String, Value>,
    #[serde(default)]
    pub snapshot_changes: Vec<String>,
    #[serde(default)]
    pub author: CommitAuthor,
}

#[derive(Debug, Default, Deserialize)]
pub struct RealmBody {
    #[serde(default)]
    pub realm: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub state: TaskState,
}

async fn submit(state: &AppState, payload: TaskPayload) -> AppResult<AcceptedResponse> {
    let handle = state.submitter.submit(payload).await?;
    info!(
        task_id = %handle.task_id,
        kind = %handle.kind,
        queue = %handle.queue,
        "task accepted"
    );
    Ok((StatusCode::ACCEPTED, Json(Accepted::from(&handle))))
}

fn dataset_id(raw: String) -> AppResult<DatasetId> {
    Ok(DatasetId::new(raw)?)
}

fn validate_realm(realm: Option<&str>) -> AppResult<()> {
    if let Some(realm) = realm {
        realm.parse::<DatasetRealm>()?;
    }
    Ok(())
}

fn forwarded_cookies(headers: &HeaderMap) -> Option<String> {
    headers
        .get(COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub async fn create_dataset(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    body: Option<Json<AuthorBody>>,
) -> AppResult<AcceptedResponse> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let payload = TaskPayload::CreateDataset(CreateDatasetTask {
        dataset: dataset_id(dataset)?,
        author: body.author,
    });
    submit(&state, payload).await
}

pub async fn delete_dataset(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
) -> AppResult<AcceptedResponse> {
    let payload = TaskPayload::DeleteDataset(DeleteDatasetTask {
        dataset: dataset_id(dataset)?,
    });
    submit(&state, payload).await
}

pub async fn commit_files(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Json(body): Json<CommitFilesBody>,
) -> AppResult<AcceptedResponse> {
    if body.files.is_empty() {
        return Err(AppError::bad_request("files must not be empty"));
    }
    let payload = TaskPayload::CommitFiles(CommitFilesTask {
        dataset: dataset_id(dataset)?,
        files: body.files,
        author: body.author,
    });
    submit(&state, payload).await
}

pub async fn unlock_files(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Json(body): Json<UnlockFilesBody>,
) -> AppResult<AcceptedResponse> {
    if body.files.is_empty() {
        return Err(AppError::bad_request("files must not be empty"));
    }
    let payload = TaskPayload::UnlockFiles(UnlockFilesTask {
        dataset: dataset_id(dataset)?,
        files: body.files,
    });
    submit(&state, payload).await
}

/// Lists the tree at `?branch=` (HEAD when absent). The listing is the
/// task's output, read back through `/tasks/{task_id}`.
pub async fn get_files(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Query(query): Query<FilesQuery>,
) -> AppResult<AcceptedResponse> {
    if let Some(branch) = query.branch.as_deref() {
        validate_ref_name(branch)?;
    }
    let payload = TaskPayload::GetFiles(GetFilesTask {
        dataset: dataset_id(dataset)?,
        branch: query.branch,
    });
    submit(&state, payload).await
}

pub async fn create_snapshot(
    State(state): State<AppState>,
    Path((dataset, tag)): Path<(String, String)>,
    body: Option<Json<SnapshotBody>>,
) -> AppResult<AcceptedResponse> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    validate_ref_name(&tag)?;
    let payload = TaskPayload::CreateSnapshot(CreateSnapshotTask {
        dataset: dataset_id(dataset)?,
        tag,
        description_fields: body.description_fields,
        snapshot_changes: body.snapshot_changes,
        author: body.author,
    });
    submit(&state, payload).await
}

pub async fn publish_snapshot(
    State(state): State<AppState>,
    Path((dataset, tag)): Path<(String, String)>,
    headers: HeaderMap,
    body: Option<Json<RealmBody>>,
) -> AppResult<AcceptedResponse> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    validate_ref_name(&tag)?;
    validate_realm(body.realm.as_deref())?;
    let payload = TaskPayload::PublishSnapshot(PublishSnapshotTask {
        dataset: dataset_id(dataset)?,
        tag,
        realm: body.realm,
        cookies: forwarded_cookies(&headers),
    });
    submit(&state, payload).await
}

pub async fn migrate_dataset(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    headers: HeaderMap,
    body: Option<Json<RealmBody>>,
) -> AppResult<AcceptedResponse> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let realm = body.realm.unwrap_or_else(|| DatasetRealm::Public.to_string());
    validate_realm(Some(&realm))?;
    let payload = TaskPayload::MigrateToBucket(MigrateToBucketTask {
        dataset: dataset_id(dataset)?,
        realm,
        cookies: forwarded_cookies(&headers),
    });
    submit(&state, payload).await
}

pub async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> AppResult<Json<TaskStatus>> {
    let task_id = TaskId(task_id);
    let state = state
        .submitter
        .broker()
        .state(task_id)
        .await
        .ok_or_else(|| AppError::not_found(format!("unknown task {task_id}")))?;
    Ok(Json(TaskStatus { task_id, state }))
}
