use axum::{
    Router,
    extract::{Extension, Path, State, ws::WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
};
use uuid::Uuid;

use crate::{AppState, ApiError, RequestContext, routes::require_member};

mod session;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/boards/{board_id}/ws", get(upgrade))
}

/// Membership is checked before the upgrade so refusals are plain HTTP.
async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(board_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    require_member(&state, board_id, ctx.user_id).await?;
    let receiver = state.broker().subscribe();
    let pool = state.pool().clone();
    Ok(ws
        .on_upgrade(move |socket| session::handle(socket, receiver, pool, ctx, board_id))
        .into_response())
}
