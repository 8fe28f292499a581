use axum::{
    Router, middleware,
    routing::{delete, get, patch},
};
use kanban_db::models::board::Board;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::{
    AppState, ApiError,
    auth::require_session,
    db::{boards::BoardRepository, members::MemberRepository},
};

mod boards;
mod members;
mod profiles;
mod tasks;

pub fn router(state: AppState) -> Router {
    let api = Router::<AppState>::new()
        .route("/v1/me", get(profiles::me))
        .route("/v1/profiles/lookup", get(profiles::lookup))
        .route(
            "/v1/boards",
            get(boards::list_boards).post(boards::create_board),
        )
        .route(
            "/v1/boards/{board_id}",
            get(boards::get_board).delete(boards::delete_board),
        )
        .route(
            "/v1/boards/{board_id}/tasks",
            get(tasks::list_tasks).post(tasks::create_task),
        )
        .route(
            "/v1/tasks/{task_id}",
            patch(tasks::update_task).delete(tasks::delete_task),
        )
        .route(
            "/v1/boards/{board_id}/members",
            get(members::list_members).post(members::add_member),
        )
        .route(
            "/v1/boards/{board_id}/members/{user_id}",
            get(members::get_member),
        )
        .route("/v1/members/{member_id}", delete(members::remove_member))
        .merge(crate::ws::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::<AppState>::new()
        .route("/health", get(health))
        .merge(api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Loads the board and checks `user_id` belongs to it: `404` when the board
/// is missing, `403` when the caller is not a member.
pub(crate) async fn require_member(
    state: &AppState,
    board_id: Uuid,
    user_id: Uuid,
) -> Result<Board, ApiError> {
    let board = BoardRepository::new(state.pool())
        .find_by_id(board_id)
        .await?
        .ok_or_else(|| ApiError::not_found("board"))?;

    if MemberRepository::new(state.pool())
        .is_member(board_id, user_id)
        .await?
    {
        Ok(board)
    } else {
        Err(ApiError::forbidden("not a member of this board"))
    }
}
