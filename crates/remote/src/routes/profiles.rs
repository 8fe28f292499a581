use axum::{
    Json,
    extract::{Extension, Query, State},
};
use kanban_db::models::profile::Profile;
use serde::Deserialize;

use crate::{AppState, ApiError, RequestContext, db::profiles::ProfileRepository};

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub email: String,
}

pub async fn me(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Profile>, ApiError> {
    ProfileRepository::new(state.pool())
        .find_by_id(ctx.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("profile"))
}

pub async fn lookup(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Profile>, ApiError> {
    let email = query.email.trim();
    if email.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }

    ProfileRepository::new(state.pool())
        .find_by_email(email)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("user"))
}
