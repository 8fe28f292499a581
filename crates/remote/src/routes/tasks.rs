use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use kanban_db::models::task::{CreateTask, Task, UpdateTask};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::require_member;
use crate::{AppState, ApiError, RequestContext, db::tasks::TaskRepository};

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(board_id): Path<Uuid>,
) -> Result<Json<Vec<Task>>, ApiError> {
    require_member(&state, board_id, ctx.user_id).await?;
    let tasks = TaskRepository::new(state.pool()).list(board_id).await?;
    Ok(Json(tasks))
}

/// Appends to the end of the column unless a position is given. The
/// creator is always the caller.
#[instrument(skip(state, ctx, payload), fields(user_id = %ctx.user_id))]
pub async fn create_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(board_id): Path<Uuid>,
    Json(payload): Json<CreateTask>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    if payload.board_id != board_id {
        return Err(ApiError::validation("board id does not match the request path"));
    }
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::validation("Task title is required"));
    }
    if payload.position.is_some_and(|p| p < 0) {
        return Err(ApiError::validation("Task position must be non-negative"));
    }
    require_member(&state, board_id, ctx.user_id).await?;

    let repo = TaskRepository::new(state.pool());
    let position = match payload.position {
        Some(position) => position,
        None => repo.count_in(board_id, payload.status).await?,
    };
    let data = CreateTask {
        title: title.to_string(),
        created_by: ctx.user_id,
        ..payload
    };

    let task = repo.insert(&data, position).await?;
    info!(task_id = %task.id, status = %task.status, "task created");
    Ok((StatusCode::CREATED, Json(task)))
}

#[instrument(skip(state, ctx, payload), fields(user_id = %ctx.user_id))]
pub async fn update_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<UpdateTask>,
) -> Result<Json<Task>, ApiError> {
    if payload.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::validation("Task title is required"));
    }
    if payload.position.is_some_and(|p| p < 0) {
        return Err(ApiError::validation("Task position must be non-negative"));
    }

    let mut tx = state.pool().begin().await?;
    let current = TaskRepository::lock(&mut tx, task_id)
        .await?
        .ok_or_else(|| ApiError::not_found("task"))?;
    require_member(&state, current.board_id, ctx.user_id).await?;

    let mut updated = current.clone();
    payload.apply(&mut updated);
    if updated == current {
        debug!("update is a no-op");
        return Ok(Json(current));
    }

    let task = TaskRepository::save(&mut tx, &updated).await?;
    tx.commit().await?;

    info!(status = %task.status, position = task.position, "task updated");
    Ok(Json(task))
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn delete_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(task_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let repo = TaskRepository::new(state.pool());
    let task = repo
        .find_by_id(task_id)
        .await?
        .ok_or_else(|| ApiError::not_found("task"))?;
    require_member(&state, task.board_id, ctx.user_id).await?;

    if !repo.delete(task_id).await? {
        return Err(ApiError::not_found("task"));
    }
    info!("task deleted");
    Ok(StatusCode::NO_CONTENT)
}
