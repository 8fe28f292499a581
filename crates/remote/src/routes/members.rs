use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use kanban_db::models::board_member::{BoardMember, CreateBoardMember, MemberRole};
use tracing::{info, instrument};
use uuid::Uuid;

use super::require_member;
use crate::{
    AppState, ApiError, RequestContext,
    db::{boards::BoardRepository, members::MemberRepository, profiles::ProfileRepository},
};

pub async fn list_members(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(board_id): Path<Uuid>,
) -> Result<Json<Vec<BoardMember>>, ApiError> {
    require_member(&state, board_id, ctx.user_id).await?;
    let members = MemberRepository::new(state.pool()).list(board_id).await?;
    Ok(Json(members))
}

pub async fn get_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((board_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<BoardMember>, ApiError> {
    require_member(&state, board_id, ctx.user_id).await?;
    MemberRepository::new(state.pool())
        .find(board_id, user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("board member"))
}

/// The board owner may add the first (owner) row; after that any member
/// may add others.
#[instrument(skip(state, ctx, payload), fields(user_id = %ctx.user_id))]
pub async fn add_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(board_id): Path<Uuid>,
    Json(payload): Json<CreateBoardMember>,
) -> Result<(StatusCode, Json<BoardMember>), ApiError> {
    if payload.board_id != board_id {
        return Err(ApiError::validation("board id does not match the request path"));
    }

    let board = BoardRepository::new(state.pool())
        .find_by_id(board_id)
        .await?
        .ok_or_else(|| ApiError::not_found("board"))?;

    let members = MemberRepository::new(state.pool());
    let is_owner = board.owner_id == ctx.user_id;
    if !is_owner && !members.is_member(board_id, ctx.user_id).await? {
        return Err(ApiError::forbidden("not a member of this board"));
    }
    if payload.role == MemberRole::Owner && payload.user_id != board.owner_id {
        return Err(ApiError::forbidden("only the board owner can hold the owner role"));
    }
    if ProfileRepository::new(state.pool())
        .find_by_id(payload.user_id)
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("user"));
    }
    if members.find(board_id, payload.user_id).await?.is_some() {
        return Err(ApiError::validation(
            "This user is already a member of this board.",
        ));
    }

    let member = members
        .insert(board_id, payload.user_id, payload.role)
        .await?;
    info!(member_id = %member.id, role = %member.role, "member added");
    Ok((StatusCode::CREATED, Json(member)))
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(member_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let members = MemberRepository::new(state.pool());
    let member = members
        .find_by_id(member_id)
        .await?
        .ok_or_else(|| ApiError::not_found("board member"))?;
    let board = BoardRepository::new(state.pool())
        .find_by_id(member.board_id)
        .await?
        .ok_or_else(|| ApiError::not_found("board"))?;

    if member.role == MemberRole::Owner {
        return Err(ApiError::validation("The board owner cannot be removed"));
    }
    if board.owner_id != ctx.user_id && member.user_id != ctx.user_id {
        return Err(ApiError::forbidden(
            "only the board owner can remove other members",
        ));
    }

    if !members.delete(member_id).await? {
        return Err(ApiError::not_found("board member"));
    }
    info!(%member_id, "member removed");
    Ok(StatusCode::NO_CONTENT)
}
