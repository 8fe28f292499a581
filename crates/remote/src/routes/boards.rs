use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use kanban_db::models::board::{Board, CreateBoard};
use tracing::{info, instrument};
use uuid::Uuid;

use super::require_member;
use crate::{AppState, ApiError, RequestContext, db::boards::BoardRepository};

pub async fn list_boards(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<Board>>, ApiError> {
    let boards = BoardRepository::new(state.pool())
        .list_for_user(ctx.user_id)
        .await?;
    Ok(Json(boards))
}

/// Creates the board row only; the owner's membership is a separate call.
#[instrument(skip(state, ctx, payload), fields(user_id = %ctx.user_id))]
pub async fn create_board(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<CreateBoard>,
) -> Result<(StatusCode, Json<Board>), ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("Board name is required"));
    }
    if payload.owner_id != ctx.user_id {
        return Err(ApiError::forbidden("boards can only be created for yourself"));
    }
    let description = payload
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let board = BoardRepository::new(state.pool())
        .insert(name, description, ctx.user_id)
        .await?;
    info!(board_id = %board.id, "board created");
    Ok((StatusCode::CREATED, Json(board)))
}

pub async fn get_board(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(board_id): Path<Uuid>,
) -> Result<Json<Board>, ApiError> {
    require_member(&state, board_id, ctx.user_id).await.map(Json)
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn delete_board(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(board_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut tx = state.pool().begin().await?;

    let board = BoardRepository::lock(&mut tx, board_id)
        .await?
        .ok_or_else(|| ApiError::not_found("board"))?;
    if board.owner_id != ctx.user_id {
        return Err(ApiError::forbidden("only the board owner can delete it"));
    }

    BoardRepository::delete(&mut tx, board_id).await?;
    tx.commit().await?;

    info!("board deleted");
    Ok(StatusCode::NO_CONTENT)
}
