use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kanban_db::{StoreError, wire::ErrorBody};

/// Handler error; renders as an [`ErrorBody`] with a status the client maps
/// back onto [`StoreError`].
#[derive(Debug)]
pub struct ApiError(StoreError);

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self(StoreError::not_found(what))
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self(StoreError::forbidden(reason))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self(StoreError::validation(message))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            StoreError::Validation(_) => StatusCode::BAD_REQUEST,
            StoreError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_inner(self) -> StoreError {
        self.0
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        Self(error)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::RowNotFound => Self::not_found("record"),
            sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
                Self::validation("record already exists")
            }
            sqlx::Error::Database(db_error)
                if db_error.is_check_violation() || db_error.is_foreign_key_violation() =>
            {
                Self::validation(db_error.message().to_string())
            }
            _ => {
                tracing::error!(?error, "database error");
                Self(StoreError::transport(&error))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody::from(&self.0))).into_response()
    }
}
